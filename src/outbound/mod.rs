//! Outbound establishment - destination parsing, dialing and reuse

mod pool;

pub use pool::ConnectionPool;

use crate::common::net;
use crate::config::{Config, ProxyMode};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Split a destination on its LAST colon into host and port; a bare
/// host gets the default port. IPv6 literals with multiple colons are
/// not bracket-escaped: decimal-dotted addresses and hostnames are the
/// supported subset.
pub fn parse_destination(destination: &str, default_port: u16) -> Result<(String, u16)> {
    match destination.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::parse(format!("invalid port in destination {:?}", destination)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((destination.to_string(), default_port)),
    }
}

/// Strategy for producing an outbound connection to a resolved target
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream>;

    /// Hand a finished connection back. Dropped (closed) by default.
    fn recycle(&self, _host: &str, _port: u16, _stream: TcpStream) {}
}

/// Dials a fresh connection for every tunnel
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);
        debug!("dialing {}", addr);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::dial(format!("failed to connect to {}: {}", addr, e)))?;
        net::configure_tcp_stream(&stream);
        Ok(stream)
    }
}

/// Checks the idle pool before dialing fresh
pub struct PooledDialer {
    pool: Arc<ConnectionPool>,
    direct: DirectDialer,
}

impl PooledDialer {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        PooledDialer {
            pool,
            direct: DirectDialer,
        }
    }
}

#[async_trait]
impl Dialer for PooledDialer {
    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        if let Some(stream) = self.pool.checkout(host, port) {
            trace!("reusing idle connection to {}:{}", host, port);
            return Ok(stream);
        }
        self.direct.dial(host, port).await
    }

    fn recycle(&self, host: &str, port: u16, stream: TcpStream) {
        self.pool.release(host, port, stream);
    }
}

/// Resolves a destination string and produces the outbound stream.
/// Dial failures are terminal for the tunnel; there is no retry.
pub struct Establisher {
    dialer: Box<dyn Dialer>,
    default_port: u16,
}

impl Establisher {
    pub fn new(config: &Config) -> Self {
        let dialer: Box<dyn Dialer> = match config.mode {
            ProxyMode::Pooled => Box::new(PooledDialer::new(Arc::new(ConnectionPool::new(
                config.pool.max_idle,
            )))),
            _ => Box::new(DirectDialer),
        };
        Establisher {
            dialer,
            default_port: config.mode.default_port(),
        }
    }

    pub async fn connect(&self, destination: &str) -> Result<TcpStream> {
        let (host, port) = parse_destination(destination, self.default_port)?;
        self.dialer.dial(&host, port).await
    }

    /// Offer a still-usable connection back to the dialer
    pub fn recycle(&self, destination: &str, stream: TcpStream) {
        if let Ok((host, port)) = parse_destination(destination, self.default_port) {
            self.dialer.recycle(&host, port, stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_destination_with_port() {
        let (host, port) = parse_destination("example.com:443", 22).unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_destination_default_port() {
        let (host, port) = parse_destination("example.com", 22).unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 22);

        let (_, port) = parse_destination("example.com", 80).unwrap();
        assert_eq!(port, 80);
    }

    #[test]
    fn test_parse_destination_invalid_port() {
        assert!(parse_destination("example.com:ssh", 22).is_err());
        assert!(parse_destination("example.com:99999", 22).is_err());
    }

    #[test]
    fn test_parse_destination_last_colon_wins() {
        // unbracketed IPv6 splits at the last colon; this is the
        // documented limitation of the format
        let (host, port) = parse_destination("fe80::1:8080", 22).unwrap();
        assert_eq!(host, "fe80::1");
        assert_eq!(port, 8080);
    }

    #[tokio::test]
    async fn test_direct_dial_refused() {
        // bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = DirectDialer.dial("127.0.0.1", addr.port()).await.unwrap_err();
        assert!(matches!(err, Error::Dial(_)));
    }
}
