//! Per-tunnel statistics

use super::TunnelInfo;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// One live tunnel's identity and counters
pub struct TrackedTunnel {
    /// Unique tunnel ID
    pub id: String,
    /// Client address
    pub peer: String,
    /// Resolved destination ("host:port")
    pub destination: String,
    /// Start time
    pub start: DateTime<Utc>,
    /// Client-to-target bytes
    upload: AtomicU64,
    /// Target-to-client bytes
    download: AtomicU64,
}

impl TrackedTunnel {
    pub fn new(id: String, peer: String, destination: String) -> Self {
        TrackedTunnel {
            id,
            peer,
            destination,
            start: Utc::now(),
            upload: AtomicU64::new(0),
            download: AtomicU64::new(0),
        }
    }

    pub fn add_upload(&self, bytes: u64) {
        self.upload.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_download(&self, bytes: u64) {
        self.download.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn upload(&self) -> u64 {
        self.upload.load(Ordering::Relaxed)
    }

    pub fn download(&self) -> u64 {
        self.download.load(Ordering::Relaxed)
    }

    /// Convert to snapshot format
    pub fn to_info(&self) -> TunnelInfo {
        TunnelInfo {
            id: self.id.clone(),
            peer: self.peer.clone(),
            destination: self.destination.clone(),
            upload: self.upload(),
            download: self.download(),
            start: self.start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_tunnel() {
        let tunnel = TrackedTunnel::new(
            "test-id".to_string(),
            "127.0.0.1:50000".to_string(),
            "10.0.0.5:443".to_string(),
        );

        assert_eq!(tunnel.upload(), 0);
        assert_eq!(tunnel.download(), 0);

        tunnel.add_upload(100);
        tunnel.add_download(200);

        let info = tunnel.to_info();
        assert_eq!(info.id, "test-id");
        assert_eq!(info.upload, 100);
        assert_eq!(info.download, 200);
        assert_eq!(info.destination, "10.0.0.5:443");
    }
}
