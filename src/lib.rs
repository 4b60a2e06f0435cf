//! Shroud - disguise tunneling forward proxy
//!
//! Accepts TCP connections that open with an HTTP-looking header
//! block, pulls the real destination out of the `X-Real-Host`
//! pseudo-header, optionally checks a shared secret, then answers
//! with a fake protocol-upgrade line and relays raw bytes both ways.
//! Typically carries SSH or VPN streams through middleboxes that only
//! inspect the first packets of a flow.
//!
//! # Architecture
//!
//! ```text
//!              +-----------+
//!   client --> |  inbound  |
//!              +-----+-----+
//!                    |
//!              +-----v-----+     +------------+
//!              |   relay   +-----> handshake  |
//!              +-----+-----+     +------------+
//!                    |
//!              +-----v-----+     +------------+
//!              | outbound  |     | statistic  |
//!              +-----------+     +------------+
//! ```
//!
//! Three disguise modes share the one engine: `connect` (fresh dial
//! per tunnel), `pooled` (idle outbound connections reused per
//! destination) and `keep-alive` (periodic WebSocket-style pings on
//! the client-bound stream).

pub mod common;
pub mod config;
pub mod handshake;
pub mod inbound;
pub mod outbound;
pub mod relay;
pub mod statistic;

pub use common::error::{Error, Result};
pub use config::{Config, ProxyMode};

use inbound::Listener;
use outbound::Establisher;
use relay::RelayEngine;
use statistic::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub const VERSION: &str = "0.3.0";

/// Proxy instance owning the listener, engine and counters.
///
/// The bootstrap constructs one from an immutable [`Config`], calls
/// [`start`](Gateway::start), and later [`stop`](Gateway::stop); the
/// core itself never touches argv or OS signals.
pub struct Gateway {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    listener: Arc<Listener>,
    serving: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    /// Create a new Gateway from configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let metrics = Arc::new(Metrics::new());
        let establisher = Establisher::new(&config);
        let engine = Arc::new(RelayEngine::new(
            config.clone(),
            establisher,
            metrics.clone(),
        ));
        let listener = Arc::new(Listener::new(engine, config.timeouts.grace_period()));

        Ok(Gateway {
            config,
            metrics,
            listener,
            serving: parking_lot::Mutex::new(None),
        })
    }

    /// Bind and start accepting. Returns the bound address once the
    /// socket is live; failure to bind is the one fatal error.
    pub async fn start(&self) -> Result<SocketAddr> {
        let socket = self.listener.bind(self.config.listen_addr())?;
        let local = socket.local_addr()?;

        let listener = self.listener.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = listener.serve(socket).await {
                error!("listener error: {}", e);
            }
        });
        *self.serving.lock() = Some(handle);

        info!(
            "shroud v{} listening on {} ({} mode)",
            VERSION, local, self.config.mode
        );
        Ok(local)
    }

    /// Signal shutdown, wait for the drain, log the final counters.
    pub async fn stop(&self) {
        self.listener.stop();
        let handle = self.serving.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        if let Ok(json) = serde_json::to_string(&self.metrics.snapshot()) {
            info!("final metrics: {}", json);
        }
        info!("gateway stopped");
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_running()
    }

    /// Counters shared with the observability collaborator
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
