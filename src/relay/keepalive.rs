//! Periodic liveness frames for the keep-alive mode
//!
//! Middleboxes that cut idle flows see a WebSocket ping opcode with an
//! empty payload every interval. This is not a conformant WebSocket
//! implementation; the two bytes below are the only frame ever sent.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// WebSocket ping opcode, zero-length payload
pub const PING_FRAME: [u8; 2] = [0x89, 0x00];

/// Write the ping frame to the client-bound stream every `interval`
/// until the stream starts closing (the first failed write).
pub async fn run<W>(writer: Arc<Mutex<W>>, interval: Duration)
where
    W: AsyncWrite + Unpin + Send,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately; skip it so pings start one
    // full interval after the tunnel opens
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let mut writer = writer.lock().await;
        if writer.write_all(&PING_FRAME).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
        trace!("liveness ping sent");
    }
}
