//! TCP peer adapter error types.

use shardhub_domain::error::{HubError, UnreachableError};

/// Errors specific to the TCP peer transport.
#[derive(Debug, thiserror::Error)]
pub enum PeerTcpError {
    /// The target is not of the form `[tcp://|ws://]host:port`.
    #[error("invalid peer target `{0}`")]
    InvalidTarget(String),

    #[error("failed to listen on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {target}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to {target} timed out after {timeout_ms} ms")]
    ConnectTimeout { target: String, timeout_ms: u64 },

    /// Reading or writing a frame failed.
    #[error("frame transport failed")]
    Codec(#[source] tokio_util::codec::LinesCodecError),

    /// A frame was not a valid peer message.
    #[error("malformed peer frame")]
    Json(#[source] serde_json::Error),
}

impl PeerTcpError {
    /// Convert into a [`HubError::Unreachable`] for propagation across port
    /// boundaries.
    #[must_use]
    pub fn into_domain(self) -> HubError {
        let reason = match std::error::Error::source(&self) {
            Some(source) => format!("{self}: {source}"),
            None => self.to_string(),
        };
        match self {
            Self::InvalidTarget(target)
            | Self::Connect { target, .. }
            | Self::ConnectTimeout { target, .. } => {
                UnreachableError::Connect { target, reason }.into()
            }
            Self::Bind { addr, .. } => UnreachableError::Connect {
                target: addr,
                reason,
            }
            .into(),
            Self::Codec(_) | Self::Json(_) => UnreachableError::Remote(reason).into(),
        }
    }
}

impl From<PeerTcpError> for HubError {
    fn from(err: PeerTcpError) -> Self {
        err.into_domain()
    }
}
