//! Inbound listener - accepts disguised client connections

use crate::common::net;
use crate::relay::RelayEngine;
use crate::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Accept loop feeding the relay engine, with signal-driven shutdown:
/// the watch channel stops the accept loop and interrupts handshake
/// waits, relaying tunnels drain within the grace period, stragglers
/// are aborted.
pub struct Listener {
    engine: Arc<RelayEngine>,
    shutdown: watch::Sender<bool>,
    // receiver held since channel creation: clones observe a stop()
    // signalled at any point, even before serve() first polls
    signal: watch::Receiver<bool>,
    grace: Duration,
    running: AtomicBool,
}

impl Listener {
    pub fn new(engine: Arc<RelayEngine>, grace: Duration) -> Self {
        let (shutdown, signal) = watch::channel(false);
        Listener {
            engine,
            shutdown,
            signal,
            grace,
            running: AtomicBool::new(false),
        }
    }

    /// Bind the listening socket. Failure here is fatal and surfaces
    /// to the caller; everything after it is per-tunnel.
    pub fn bind(&self, addr: SocketAddr) -> Result<TcpListener> {
        let listener = net::bind_reuse(addr, 1024)?;
        self.running.store(true, Ordering::SeqCst);
        Ok(listener)
    }

    /// Accept until the shutdown signal fires, then drain.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.signal.clone();
        let mut tunnels: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            net::configure_tcp_stream(&stream);
                            let engine = self.engine.clone();
                            let signal = self.signal.clone();
                            tunnels.spawn(async move {
                                engine.handle(stream, peer, signal).await;
                            });
                            // reap tunnels that already finished
                            while tunnels.try_join_next().is_some() {}
                        }
                        Err(e) => {
                            if *shutdown.borrow() {
                                break;
                            }
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        drop(listener);
        self.drain(tunnels).await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn drain(&self, mut tunnels: JoinSet<()>) {
        if tunnels.is_empty() {
            return;
        }
        info!("draining {} active tunnels", tunnels.len());
        let drained = tokio::time::timeout(self.grace, async {
            while tunnels.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("grace period elapsed, aborting {} tunnels", tunnels.len());
            tunnels.shutdown().await;
        }
    }

    /// Stop accepting and begin the drain. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
