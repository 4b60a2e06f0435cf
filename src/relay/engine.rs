//! Relay engine - tunnel lifecycle and the bidirectional byte pump

use super::buffer::AdaptiveBuffer;
use super::keepalive;
use crate::config::{Config, ProxyMode};
use crate::handshake::{self, AuthOutcome};
use crate::outbound::Establisher;
use crate::statistic::{Metrics, TrackedTunnel};
use crate::{Error, Result};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace, warn};

/// Tunnel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Init,
    Authenticating,
    Connecting,
    Relaying,
    Closing,
    Closed,
}

/// Why one pump direction stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    /// Clean zero-length read; the peer's write side was shut
    Eof,
    /// No bytes read within the inactivity deadline
    Timeout,
    /// Read or write fault
    Error,
}

/// Drives every accepted connection: handshake read, classification,
/// authorization, outbound establishment and the relay pumps.
pub struct RelayEngine {
    config: Arc<Config>,
    establisher: Establisher,
    metrics: Arc<Metrics>,
}

impl RelayEngine {
    pub fn new(config: Arc<Config>, establisher: Establisher, metrics: Arc<Metrics>) -> Self {
        RelayEngine {
            config,
            establisher,
            metrics,
        }
    }

    /// Drive one accepted connection to completion. All tunnel-level
    /// failures end here; nothing propagates to the listener.
    pub async fn handle(&self, stream: TcpStream, peer: SocketAddr, mut shutdown: watch::Receiver<bool>) {
        self.metrics.connection_opened();
        trace!("accepted connection from {}", peer);

        if let Err(e) = self.run(stream, peer, &mut shutdown).await {
            match &e {
                Error::HandshakeTimeout => debug!("handshake timed out for {}", peer),
                Error::Shutdown => debug!("shutting down while {} was handshaking", peer),
                Error::AuthRejected(reason) => debug!("rejected {}: {}", peer, reason),
                e => debug!("tunnel for {} ended: {}", peer, e),
            }
        }

        self.metrics.connection_closed();
    }

    async fn run(
        &self,
        mut client: TcpStream,
        peer: SocketAddr,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut state = TunnelState::Init;
        advance(&mut state, TunnelState::Authenticating, peer);

        let handshake_timeout = self.config.timeouts.handshake_timeout();
        let mut head = BytesMut::with_capacity(self.config.buffer.handshake);
        tokio::select! {
            read = tokio::time::timeout(handshake_timeout, client.read_buf(&mut head)) => {
                match read {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(Error::HandshakeTimeout),
                }
            }
            _ = shutdown.changed() => return Err(Error::Shutdown),
        }

        let destination = handshake::find_header(&head, handshake::REAL_HOST_HEADER)
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .or_else(|| self.config.default_destination());

        if handshake::find_header(&head, handshake::SPLIT_HEADER).is_some() {
            // second fragment is padding against handshake-size
            // fingerprinting; read it and throw it away
            let mut padding = BytesMut::with_capacity(self.config.buffer.handshake);
            match tokio::time::timeout(handshake_timeout, client.read_buf(&mut padding)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(Error::HandshakeTimeout),
            }
        }

        let supplied = handshake::find_header(&head, handshake::PASS_HEADER);
        let outcome = handshake::authorize(
            &self.config.secret,
            supplied,
            destination.as_deref(),
            self.config.mode,
        );
        if let Some(line) = outcome.response() {
            client.write_all(line).await?;
            return Err(match outcome {
                AuthOutcome::RejectNoHost => Error::NoDestination,
                AuthOutcome::RejectForbidden => Error::auth("destination not allowed"),
                _ => Error::auth("wrong password"),
            });
        }
        let destination = match destination {
            Some(d) => d,
            None => return Err(Error::NoDestination),
        };

        advance(&mut state, TunnelState::Connecting, peer);
        let target = match self.establisher.connect(&destination).await {
            Ok(target) => target,
            Err(e) => {
                warn!("failed to reach {} for {}: {}", destination, peer, e);
                return Err(e);
            }
        };

        let response = handshake::success_response(self.config.mode);
        if let Err(e) = client.write_all(response).await {
            // client vanished before the tunnel opened; the outbound
            // stream is untouched and may be reused
            self.establisher.recycle(&destination, target);
            return Err(e.into());
        }

        advance(&mut state, TunnelState::Relaying, peer);
        debug!("connected {} -> {}", peer, destination);
        let tracked = self.metrics.track(peer, &destination);

        let (up, down) = self.relay(client, target, &tracked).await;

        advance(&mut state, TunnelState::Closing, peer);
        self.metrics.untrack(&tracked.id);
        debug!(
            "relay {} -> {} ended (up: {:?}, down: {:?}, tx: {} B, rx: {} B)",
            peer,
            destination,
            up,
            down,
            tracked.upload(),
            tracked.download()
        );
        advance(&mut state, TunnelState::Closed, peer);

        if up == PumpEnd::Timeout || down == PumpEnd::Timeout {
            return Err(Error::RelayTimeout);
        }
        Ok(())
    }

    /// Run both pump directions (plus the liveness prober in
    /// keep-alive mode) until each has terminated.
    async fn relay(
        &self,
        client: TcpStream,
        target: TcpStream,
        tracked: &Arc<TrackedTunnel>,
    ) -> (PumpEnd, PumpEnd) {
        let (client_read, client_write) = client.into_split();
        let (target_read, target_write) = target.into_split();
        let client_write = Arc::new(Mutex::new(client_write));
        let target_write = Arc::new(Mutex::new(target_write));

        let prober = if self.config.mode == ProxyMode::KeepAlive {
            Some(tokio::spawn(keepalive::run(
                client_write.clone(),
                self.config.timeouts.keepalive_interval(),
            )))
        } else {
            None
        };

        let idle_timeout = self.config.timeouts.idle_timeout();
        let buffer = &self.config.buffer;
        let metrics = &self.metrics;

        let upstream = pump(
            client_read,
            target_write,
            AdaptiveBuffer::with_bounds(buffer.initial, buffer.min, buffer.max),
            idle_timeout,
            |n| {
                metrics.add_upload(n);
                tracked.add_upload(n);
            },
        );
        let downstream = pump(
            target_read,
            client_write,
            AdaptiveBuffer::with_bounds(buffer.initial, buffer.min, buffer.max),
            idle_timeout,
            |n| {
                metrics.add_download(n);
                tracked.add_download(n);
            },
        );

        let ends = tokio::join!(upstream, downstream);
        if let Some(prober) = prober {
            prober.abort();
        }
        ends
    }
}

fn advance(state: &mut TunnelState, next: TunnelState, peer: SocketAddr) {
    trace!("tunnel {}: {:?} -> {:?}", peer, state, next);
    *state = next;
}

/// Forward bytes one way until EOF, inactivity or a fault, then shut
/// the peer's write side. Chunk size follows the adaptive controller,
/// re-judged from every read/write cycle; each chunk is written in
/// full before the next read.
async fn pump<R, W>(
    mut reader: R,
    writer: Arc<Mutex<W>>,
    mut buffer: AdaptiveBuffer,
    idle_timeout: Duration,
    on_bytes: impl Fn(u64),
) -> PumpEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; buffer.size()];

    let end = loop {
        if chunk.len() != buffer.size() {
            chunk.resize(buffer.size(), 0);
        }
        let started = Instant::now();

        let n = match tokio::time::timeout(idle_timeout, reader.read(&mut chunk)).await {
            Ok(Ok(0)) => break PumpEnd::Eof,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                trace!("pump read error: {}", e);
                break PumpEnd::Error;
            }
            Err(_) => break PumpEnd::Timeout,
        };

        {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.write_all(&chunk[..n]).await {
                trace!("pump write error: {}", e);
                break PumpEnd::Error;
            }
        }

        on_bytes(n as u64);
        buffer.adjust(n as u64, started.elapsed());
    };

    // EOF propagates as a half-close; on timeout or error the shut
    // write side nudges the opposite direction towards its own EOF
    let mut writer = writer.lock().await;
    let _ = writer.shutdown().await;
    end
}
