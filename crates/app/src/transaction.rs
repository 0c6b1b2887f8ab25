//! Transaction: an atomic batch of entry operations against one shard.

use std::time::Duration;

use serde_json::Value;

use shardhub_domain::commit::Revision;
use shardhub_domain::entry::{Entry, EntryKind};
use shardhub_domain::error::HubError;
use shardhub_domain::id::EntryId;

use crate::shard::Shard;

/// An operation queued by a [`Transaction`].
#[derive(Debug, Clone)]
pub(crate) enum PendingOp {
    /// The parsed entry plus the raw attributes recorded in the commit log.
    Add { entry: Entry, attrs: Value },
    Delete(EntryId),
}

/// Operations accumulated for one shard, applied all-or-nothing by
/// [`commit`](Self::commit).
///
/// Queuing never touches the shard.
#[derive(Debug)]
pub struct Transaction {
    shard: Shard,
    ops: Vec<PendingOp>,
}

impl Transaction {
    pub(crate) fn new(shard: Shard) -> Self {
        Self {
            shard,
            ops: Vec::new(),
        }
    }

    /// Queue the creation of entry `id`.
    ///
    /// The attributes are checked against the kind schema right away;
    /// references are checked at commit.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when the attributes do not fit `kind`.
    pub fn add(
        &mut self,
        id: impl Into<EntryId>,
        kind: EntryKind,
        attrs: Value,
    ) -> Result<&mut Self, HubError> {
        let entry = Entry::new(id.into(), kind, &attrs)?;
        self.ops.push(PendingOp::Add { entry, attrs });
        Ok(self)
    }

    /// Queue the deletion of entry `id`.
    pub fn delete(&mut self, id: impl Into<EntryId>) -> &mut Self {
        self.ops.push(PendingOp::Delete(id.into()));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    /// Apply every queued operation, or none.
    ///
    /// Waits for any commit already in flight on the shard.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] on the first failing check, leaving the
    /// shard untouched.
    pub async fn commit(self) -> Result<Revision, HubError> {
        self.shard.commit_ops(self.ops, None).await
    }

    /// Like [`commit`](Self::commit), giving up after `timeout` spent waiting
    /// for the shard's commit lock.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Conflict`] when the lock is not acquired in time.
    pub async fn commit_within(self, timeout: Duration) -> Result<Revision, HubError> {
        self.shard.commit_ops(self.ops, Some(timeout)).await
    }
}
