//! Tunnel tracking and traffic counters
//!
//! Process-wide counters updated by the relay engine, plus a registry
//! of live tunnels. The snapshot is what an external observability
//! collaborator consumes; nothing here serves it over the network.

mod tracker;

pub use tracker::TrackedTunnel;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counters and live-tunnel registry
pub struct Metrics {
    /// Live tunnels (id -> tunnel)
    tunnels: DashMap<String, Arc<TrackedTunnel>>,
    /// Connections accepted since start
    total_connections: AtomicU64,
    /// Connections currently open
    active_connections: AtomicU64,
    /// Client-to-target bytes
    upload_total: AtomicU64,
    /// Target-to-client bytes
    download_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            tunnels: DashMap::new(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            upload_total: AtomicU64::new(0),
            download_total: AtomicU64::new(0),
        }
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_upload(&self, bytes: u64) {
        self.upload_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_download(&self, bytes: u64) {
        self.download_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Total (upload, download) bytes relayed
    pub fn totals(&self) -> (u64, u64) {
        (
            self.upload_total.load(Ordering::Relaxed),
            self.download_total.load(Ordering::Relaxed),
        )
    }

    /// Register a relaying tunnel
    pub fn track(&self, peer: SocketAddr, destination: &str) -> Arc<TrackedTunnel> {
        let tunnel = Arc::new(TrackedTunnel::new(
            Uuid::new_v4().to_string(),
            peer.to_string(),
            destination.to_string(),
        ));
        self.tunnels.insert(tunnel.id.clone(), tunnel.clone());
        tunnel
    }

    pub fn untrack(&self, id: &str) {
        self.tunnels.remove(id);
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    /// Snapshot of counters and live tunnels
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections(),
            active_connections: self.active_connections(),
            upload_total: self.upload_total.load(Ordering::Relaxed),
            download_total: self.download_total.load(Ordering::Relaxed),
            tunnels: self.tunnels.iter().map(|r| r.value().to_info()).collect(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter snapshot for external consumers
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "totalConnections")]
    pub total_connections: u64,
    #[serde(rename = "activeConnections")]
    pub active_connections: u64,
    #[serde(rename = "uploadTotal")]
    pub upload_total: u64,
    #[serde(rename = "downloadTotal")]
    pub download_total: u64,
    pub tunnels: Vec<TunnelInfo>,
}

/// Live-tunnel entry in a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct TunnelInfo {
    pub id: String,
    pub peer: String,
    pub destination: String,
    pub upload: u64,
    pub download: u64,
    pub start: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn test_connection_counters() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        assert_eq!(metrics.total_connections(), 2);
        assert_eq!(metrics.active_connections(), 1);
    }

    #[test]
    fn test_traffic_totals() {
        let metrics = Metrics::new();
        metrics.add_upload(100);
        metrics.add_download(200);
        assert_eq!(metrics.totals(), (100, 200));
    }

    #[test]
    fn test_track_untrack() {
        let metrics = Metrics::new();
        let tunnel = metrics.track(peer(), "10.0.0.5:443");
        assert_eq!(metrics.tunnel_count(), 1);

        metrics.untrack(&tunnel.id);
        assert_eq!(metrics.tunnel_count(), 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.add_upload(100);
        metrics.add_download(200);
        let tunnel = metrics.track(peer(), "10.0.0.5:443");
        tunnel.add_upload(100);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connections, 1);
        assert_eq!(snapshot.upload_total, 100);
        assert_eq!(snapshot.download_total, 200);
        assert_eq!(snapshot.tunnels.len(), 1);
        assert_eq!(snapshot.tunnels[0].destination, "10.0.0.5:443");
        assert_eq!(snapshot.tunnels[0].upload, 100);

        // snapshots serialize for the external collector
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"uploadTotal\":100"));
    }
}
