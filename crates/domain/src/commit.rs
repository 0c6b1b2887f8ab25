//! Commit log records.
//!
//! Every operation applied by a transaction gets its own [`Revision`]. The
//! ordered list of [`Change`]s is what peer links replay to replicas.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entry::EntryKind;
use crate::id::EntryId;

/// Monotonic per-shard revision. `0` means "nothing applied yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One applied operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ChangeOp {
    /// Entry creation. Attributes stay opaque so replicas re-validate them.
    Add {
        id: EntryId,
        kind: EntryKind,
        attrs: serde_json::Value,
    },
    Delete { id: EntryId },
}

impl ChangeOp {
    #[must_use]
    pub fn entry_id(&self) -> &EntryId {
        match self {
            Self::Add { id, .. } | Self::Delete { id } => id,
        }
    }
}

/// A revisioned entry in a shard's commit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub revision: Revision,
    #[serde(flatten)]
    pub op: ChangeOp,
}

/// Changes strictly after `since`, in commit order.
#[must_use]
pub fn changes_after(log: &[Change], since: Revision) -> Vec<Change> {
    // The log is sorted by revision, so everything after the partition point qualifies.
    let start = log.partition_point(|change| change.revision <= since);
    log[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log() -> Vec<Change> {
        (1..=3)
            .map(|n| Change {
                revision: Revision(n),
                op: ChangeOp::Delete {
                    id: EntryId::from(format!("e{n}")),
                },
            })
            .collect()
    }

    #[test]
    fn should_increment_revision() {
        assert_eq!(Revision::ZERO.next(), Revision(1));
    }

    #[test]
    fn should_return_changes_after_revision() {
        let after: Vec<_> = changes_after(&log(), Revision(1))
            .into_iter()
            .map(|c| c.revision)
            .collect();
        assert_eq!(after, vec![Revision(2), Revision(3)]);
    }

    #[test]
    fn should_return_nothing_when_caught_up() {
        assert!(changes_after(&log(), Revision(3)).is_empty());
        assert_eq!(changes_after(&log(), Revision::ZERO).len(), 3);
    }

    #[test]
    fn should_serialize_change_flat_with_op_tag() {
        let change = Change {
            revision: Revision(7),
            op: ChangeOp::Add {
                id: EntryId::from("rpi"),
                kind: EntryKind::Rpi,
                attrs: json!({"name": "Raspberry Pi 1"}),
            },
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["revision"], 7);
        assert_eq!(value["op"], "add");
        assert_eq!(value["kind"], "rpi");
        let back: Change = serde_json::from_value(value).unwrap();
        assert_eq!(back, change);
    }
}
