//! Common error types used across the workspace.
//!
//! Every layer converts its own failures into [`HubError`] through `#[from]`
//! impls. The five top-level variants are the error classes surfaced to
//! callers and relayed over peer links.

use serde::{Deserialize, Serialize};

use crate::commit::Revision;
use crate::entry::EntryKind;
use crate::id::{EntryId, ShardId};

/// Top-level error returned by every fallible shardhub operation.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// An unresolved space, shard, entry or peer reference.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// Malformed entry attributes or a broken reference at commit time.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A peer is disconnected or a remote call timed out.
    #[error("unreachable: {0}")]
    Unreachable(#[from] UnreachableError),

    /// Commit contention the caller gave up waiting on.
    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Unrecoverable fault that moved an entry or shard to ERROR.
    #[error("fatal: {0}")]
    Fatal(#[from] FatalError),
}

impl HubError {
    /// The serialisable class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Validation(_) => ErrorClass::Validation,
            Self::Unreachable(_) => ErrorClass::Unreachable,
            Self::Conflict(_) => ErrorClass::Conflict,
            Self::Fatal(_) => ErrorClass::Fatal,
        }
    }

    /// Message of the wrapped error, without the class prefix.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::NotFound(err) => err.to_string(),
            Self::Validation(err) => err.to_string(),
            Self::Unreachable(err) => err.to_string(),
            Self::Conflict(err) => err.to_string(),
            Self::Fatal(err) => err.to_string(),
        }
    }
}

/// A referenced object does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Attribute or reference validation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("entry id must not be empty")]
    EmptyId,

    #[error("alias must not be empty")]
    EmptyAlias,

    #[error("unknown entry kind `{0}`")]
    UnknownKind(String),

    #[error("invalid {kind} attributes: {reason}")]
    InvalidAttributes { kind: EntryKind, reason: String },

    #[error("pin index {0} is out of range")]
    PinOutOfRange(u8),

    #[error("entry {0} already exists")]
    DuplicateEntry(EntryId),

    #[error("shard alias {0} is already registered")]
    DuplicateShardAlias(String),

    #[error("shard id {0} is already registered")]
    DuplicateShardId(ShardId),

    #[error("space {0} is already registered")]
    DuplicateSpace(String),

    #[error("entry {entry}: {field} reference `{target}` does not resolve")]
    UnresolvedReference {
        entry: EntryId,
        field: &'static str,
        target: EntryId,
    },

    #[error("entry {entry}: master `{master}` cannot expose pin I/O")]
    NotAMaster { entry: EntryId, master: EntryId },

    #[error("entry {0} is part of a master cycle")]
    MasterCycle(EntryId),

    #[error("cannot delete missing entry {0}")]
    MissingEntry(EntryId),

    #[error("shard {0} is a read-only replica")]
    ReadOnlyReplica(String),

    #[error("{kind} entries do not accept command `{command}`")]
    UnknownCommand { kind: EntryKind, command: String },

    #[error("invalid arguments for `{command}`: {reason}")]
    InvalidArgument { command: String, reason: String },

    #[error("power {0} is outside [0, 1]")]
    PowerOutOfRange(f64),

    #[error("{0}")]
    Remote(String),
}

/// Peer connectivity failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnreachableError {
    #[error("peer {peer} is disconnected")]
    Disconnected { peer: String },

    #[error("no response from peer {peer} within {timeout_ms} ms")]
    Timeout { peer: String, timeout_ms: u64 },

    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("{0}")]
    Remote(String),
}

/// Commit contention surfaced to a caller that stopped waiting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    #[error("shard {shard} is busy committing, gave up after {timeout_ms} ms")]
    CommitTimeout { shard: String, timeout_ms: u64 },

    #[error("shard {shard} expected revision {expected}, received {got}")]
    RevisionGap {
        shard: String,
        expected: Revision,
        got: Revision,
    },

    #[error("{0}")]
    Remote(String),
}

/// Unrecoverable faults; the affected subject stays in ERROR.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    #[error("entry {entry}: {reason}")]
    Capability { entry: EntryId, reason: String },

    #[error("entry {0} is in ERROR state")]
    EntryFailed(EntryId),

    #[error("shard {0} is in ERROR state")]
    ShardFailed(String),

    #[error("behavior of entry {0} has stopped")]
    BehaviorStopped(EntryId),

    #[error("{0}")]
    Remote(String),
}

/// Error class carried over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    NotFound,
    Validation,
    Unreachable,
    Conflict,
    Fatal,
}

/// A [`HubError`] flattened for transport in a peer `reply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{class:?}: {message}")]
pub struct RemoteError {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&HubError> for RemoteError {
    fn from(err: &HubError) -> Self {
        Self {
            class: err.class(),
            message: err.detail(),
        }
    }
}

impl From<RemoteError> for HubError {
    fn from(err: RemoteError) -> Self {
        match err.class {
            ErrorClass::NotFound => NotFoundError {
                entity: "Remote",
                id: err.message,
            }
            .into(),
            ErrorClass::Validation => ValidationError::Remote(err.message).into(),
            ErrorClass::Unreachable => UnreachableError::Remote(err.message).into(),
            ErrorClass::Conflict => ConflictError::Remote(err.message).into(),
            ErrorClass::Fatal => FatalError::Remote(err.message).into(),
        }
    }
}
