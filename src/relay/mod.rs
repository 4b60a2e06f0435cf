//! Relay core - drives tunnels from handshake to teardown

mod buffer;
mod engine;
mod keepalive;

pub use buffer::AdaptiveBuffer;
pub use engine::{RelayEngine, TunnelState};
pub use keepalive::PING_FRAME;
