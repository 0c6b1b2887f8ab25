//! Inbound TCP peer connections.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use shardhub_app::space::Space;

use crate::config::PeerTcpConfig;
use crate::error::PeerTcpError;
use crate::frame;

/// Accepts peer sockets for one space.
#[derive(Debug)]
pub struct TcpPeerListener {
    listener: TcpListener,
    config: PeerTcpConfig,
}

impl TcpPeerListener {
    /// Bind `addr` (`host:port`, port `0` for any).
    ///
    /// # Errors
    ///
    /// Returns [`PeerTcpError::Bind`] when the socket cannot be bound.
    pub async fn bind(addr: &str, config: PeerTcpConfig) -> Result<Self, PeerTcpError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| PeerTcpError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener, config })
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// Returns the socket error.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections into `space` until `cancel` fires.
    pub async fn run(self, space: Space, cancel: CancellationToken) {
        tracing::info!(addr = ?self.listener.local_addr().ok(), space = %space.name(), "listening for peers");
        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, remote)) => {
                    tracing::info!(%remote, "peer connected");
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::debug!(%remote, error = %err, "could not disable nagle");
                    }
                    space.accept(frame::spawn(stream, &self.config));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                }
            }
        }
        tracing::info!("peer listener stopped");
    }
}
