//! Peer link connection states and wire messages.

use serde::{Deserialize, Serialize};

use crate::commit::{Change, Revision};
use crate::entry::Cache;
use crate::error::RemoteError;
use crate::id::{EntryId, RequestId, ShardId};

/// Connection state of a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Not connected and no attempt in flight.
    #[default]
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    Connected,
    /// Waiting out a backoff delay after losing or failing a connection.
    Reconnecting,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub fn is_transitioning(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// State after a connection attempt starts.
    #[must_use]
    pub fn on_attempt(self) -> Self {
        match self {
            Self::Disconnected => Self::Connecting,
            other => other,
        }
    }

    /// State after an attempt fails or an established connection drops.
    #[must_use]
    pub fn on_lost(self) -> Self {
        Self::Reconnecting
    }
}

/// Messages exchanged over a peer connection.
///
/// Frames are JSON objects tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PeerMessage {
    /// First frame on every connection, in both directions.
    Hello { instance: String, space: String },
    /// Ask for every change of `shard` after `since`, then live pushes.
    Want { shard: ShardId, since: Revision },
    /// Changes of `shard`, in commit order.
    Changes { shard: ShardId, changes: Vec<Change> },
    /// Cache update of one entry.
    EntryChanged {
        shard: ShardId,
        entry: EntryId,
        cache: Cache,
    },
    /// Run `command` on `entry` where the canonical copy lives.
    Post {
        request: RequestId,
        shard: ShardId,
        entry: EntryId,
        command: String,
        args: serde_json::Value,
    },
    /// Outcome of a `post`.
    Reply {
        request: RequestId,
        outcome: Outcome,
    },
}

/// Serialisable result of a remote command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Ok(serde_json::Value),
    Err(RemoteError),
}

impl From<Outcome> for Result<serde_json::Value, RemoteError> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(err) => Err(err),
        }
    }
}
