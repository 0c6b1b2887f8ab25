//! # shardhub-adapter-peer-tcp
//!
//! Peer transport over TCP. Each frame is one [`PeerMessage`] serialised as
//! a JSON object on its own line.
//!
//! [`TcpConnector`] opens outbound links; [`TcpPeerListener`] accepts inbound
//! ones and hands them to a [`Space`](shardhub_app::space::Space).
//!
//! ## Dependency rule
//!
//! Depends on `shardhub-app` (port traits) and `shardhub-domain` only.

pub mod config;
pub mod error;
mod frame;
mod listener;

pub use config::PeerTcpConfig;
pub use error::PeerTcpError;
pub use listener::TcpPeerListener;

use async_trait::async_trait;
use tokio::net::TcpStream;

use shardhub_app::ports::{PeerConnection, PeerConnector, PortError};
use shardhub_domain::peer::PeerMessage;

/// Strip the scheme from a configured peer target, leaving `host:port`.
///
/// # Errors
///
/// Returns [`PeerTcpError::InvalidTarget`] when no `host:port` remains.
pub fn parse_target(target: &str) -> Result<&str, PeerTcpError> {
    let addr = target
        .strip_prefix("tcp://")
        .or_else(|| target.strip_prefix("ws://"))
        .unwrap_or(target)
        .trim_end_matches('/');
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(addr),
        _ => Err(PeerTcpError::InvalidTarget(target.to_string())),
    }
}

/// Outbound TCP peer transport.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: PeerTcpConfig,
}

impl TcpConnector {
    #[must_use]
    pub fn new(config: PeerTcpConfig) -> Self {
        Self { config }
    }

    async fn open(&self, target: &str) -> Result<PeerConnection, PeerTcpError> {
        let addr = parse_target(target)?;
        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| PeerTcpError::ConnectTimeout {
                target: target.to_string(),
                timeout_ms: self.config.connect_timeout_ms,
            })?
            .map_err(|source| PeerTcpError::Connect {
                target: target.to_string(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| PeerTcpError::Connect {
            target: target.to_string(),
            source,
        })?;
        tracing::debug!(%target, "peer socket connected");
        Ok(frame::spawn(stream, &self.config))
    }
}

#[async_trait]
impl PeerConnector for TcpConnector {
    async fn connect(&self, target: &str) -> Result<PeerConnection, PortError> {
        Ok(self.open(target).await?)
    }
}

/// Encode one frame, without the trailing newline.
///
/// # Errors
///
/// Returns [`PeerTcpError::Json`] if the message cannot be serialised.
pub fn encode(message: &PeerMessage) -> Result<String, PeerTcpError> {
    serde_json::to_string(message).map_err(PeerTcpError::Json)
}

/// Decode one frame.
///
/// # Errors
///
/// Returns [`PeerTcpError::Json`] for anything that is not a peer message.
pub fn decode(line: &str) -> Result<PeerMessage, PeerTcpError> {
    serde_json::from_str(line).map_err(PeerTcpError::Json)
}
