//! Lifecycle states of entries and shards.

use serde::{Deserialize, Serialize};

/// Lifecycle of an entry: `Init → Ready → Error`.
///
/// `Error` is terminal; recovery needs a fresh transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectState {
    #[default]
    Init,
    Ready,
    Error,
}

impl SubjectState {
    /// Whether the subject can serve reads and commands.
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether the subject reached a state it never leaves on its own.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error)
    }
}

impl std::fmt::Display for SubjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => f.write_str("INIT"),
            Self::Ready => f.write_str("READY"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

/// Lifecycle of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Error,
}

impl ShardState {
    /// Whether a resolver waiting on this shard can stop waiting.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl std::fmt::Display for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("UNINITIALIZED"),
            Self::Loading => f.write_str("LOADING"),
            Self::Ready => f.write_str("READY"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}
