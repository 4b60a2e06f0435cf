//! Bounded idle-connection cache keyed by destination
//!
//! The mutex guards only the mapping; dialing and closing always
//! happen outside it. Checkout hands out the most recently returned
//! connection without probing the peer, so a connection the remote
//! already dropped can surface as an immediate read failure on first
//! use. Accepted as a known limitation.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::net::TcpStream;
use tracing::trace;

pub struct ConnectionPool {
    entries: Mutex<HashMap<String, VecDeque<TcpStream>>>,
    max_idle: usize,
}

impl ConnectionPool {
    pub fn new(max_idle: usize) -> Self {
        ConnectionPool {
            entries: Mutex::new(HashMap::new()),
            max_idle,
        }
    }

    fn key(host: &str, port: u16) -> String {
        format!("{}:{}", host, port)
    }

    /// Most recently returned idle connection for the key, if any
    pub fn checkout(&self, host: &str, port: u16) -> Option<TcpStream> {
        let mut entries = self.entries.lock();
        entries.get_mut(&Self::key(host, port))?.pop_back()
    }

    /// Return a connection for future reuse. A locally dead socket, or
    /// one past the per-key cap, is closed instead; the close happens
    /// after the lock is dropped.
    pub fn release(&self, host: &str, port: u16, stream: TcpStream) {
        if stream.peer_addr().is_err() {
            trace!("dropping dead connection to {}:{}", host, port);
            return;
        }

        let evicted = {
            let mut entries = self.entries.lock();
            let idle = entries.entry(Self::key(host, port)).or_default();
            if idle.len() < self.max_idle {
                idle.push_back(stream);
                None
            } else {
                Some(stream)
            }
        };
        if evicted.is_some() {
            trace!("idle cap reached for {}:{}, closing", host, port);
        }
        drop(evicted);
    }

    /// Idle connections currently held for the key
    pub fn idle_count(&self, host: &str, port: u16) -> usize {
        let entries = self.entries.lock();
        entries.get(&Self::key(host, port)).map_or(0, |idle| idle.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn local_listener() -> (TcpListener, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn test_release_caps_idle_per_key() {
        tokio_test::block_on(async {
            let (listener, addr) = local_listener().await;
            tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((stream, _)) = listener.accept().await {
                    held.push(stream);
                }
            });

            let pool = ConnectionPool::new(2);
            for _ in 0..3 {
                let stream = TcpStream::connect(addr).await.unwrap();
                pool.release("127.0.0.1", addr.port(), stream);
            }

            // the third release closed its connection instead
            assert_eq!(pool.idle_count("127.0.0.1", addr.port()), 2);
        });
    }

    #[test]
    fn test_checkout_is_lifo() {
        tokio_test::block_on(async {
            let (listener, addr) = local_listener().await;
            tokio::spawn(async move {
                let mut held = Vec::new();
                while let Ok((stream, _)) = listener.accept().await {
                    held.push(stream);
                }
            });

            let pool = ConnectionPool::new(8);
            let mut last_local = None;
            for _ in 0..2 {
                let stream = TcpStream::connect(addr).await.unwrap();
                last_local = Some(stream.local_addr().unwrap());
                pool.release("127.0.0.1", addr.port(), stream);
            }

            let reused = pool.checkout("127.0.0.1", addr.port()).unwrap();
            assert_eq!(reused.local_addr().unwrap(), last_local.unwrap());
            assert_eq!(pool.idle_count("127.0.0.1", addr.port()), 1);
        });
    }

    #[test]
    fn test_checkout_empty_key() {
        let pool = ConnectionPool::new(4);
        assert!(pool.checkout("127.0.0.1", 22).is_none());
        assert_eq!(pool.idle_count("127.0.0.1", 22), 0);
    }
}
