//! Peer transport port: establishes message channels to other instances.
//!
//! The transport guarantees ordered, reliable delivery per connection only.
//! Gap recovery across reconnects is the peer link's job.

use async_trait::async_trait;
use tokio::sync::mpsc;

use shardhub_domain::peer::PeerMessage;

use super::PortError;

/// An established, bidirectional connection.
///
/// The connection is closed when `receiver` yields `None`; dropping both
/// halves closes it from this side.
#[derive(Debug)]
pub struct PeerConnection {
    pub sender: mpsc::Sender<PeerMessage>,
    pub receiver: mpsc::Receiver<PeerMessage>,
}

impl PeerConnection {
    /// Build a connected pair of in-process endpoints.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            Self {
                sender: a_tx,
                receiver: b_rx,
            },
            Self {
                sender: b_tx,
                receiver: a_rx,
            },
        )
    }
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Open a connection to `target`.
    ///
    /// # Errors
    ///
    /// Returns the transport failure; the link retries with backoff.
    async fn connect(&self, target: &str) -> Result<PeerConnection, PortError>;
}
