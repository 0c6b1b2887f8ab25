//! TCP transport configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the TCP peer transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerTcpConfig {
    /// Longest accepted frame, in bytes; longer lines drop the connection.
    pub max_frame_bytes: usize,
    /// Messages buffered per direction before senders wait.
    pub channel_capacity: usize,
    /// How long to wait for the TCP handshake, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for PeerTcpConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 1024 * 1024,
            channel_capacity: 64,
            connect_timeout_ms: 5_000,
        }
    }
}

impl PeerTcpConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
