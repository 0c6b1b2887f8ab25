//! Shard: a live collection of entries with a commit log.
//!
//! A [`Shard`] is a cheap handle (`Arc` inside); every clone observes the same
//! entries, revision and state. Entry data lives behind a synchronous mutex
//! whose critical sections never span an `.await`. Commits are serialized by a
//! separate async lock so a waiting commit validates against the snapshot left
//! by the previous one.
//!
//! Mutation happens only through [`Transaction`](crate::transaction::Transaction)
//! on the canonical copy, or through [`Shard::apply_remote`] on a replica.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use shardhub_domain::commit::{Change, ChangeOp, Revision, changes_after};
use shardhub_domain::entry::{Cache, Entry, EntryKind, Reference};
use shardhub_domain::error::{
    ConflictError, FatalError, HubError, NotFoundError, UnreachableError, ValidationError,
};
use shardhub_domain::id::{EntryId, ShardId};
use shardhub_domain::shard::{ShardDescriptor, ShardSchema};
use shardhub_domain::state::{ShardState, SubjectState};
use shardhub_domain::time::{as_millis, now};

use crate::transaction::{PendingOp, Transaction};

const EVENT_CAPACITY: usize = 256;

/// Notification emitted by a shard.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardEvent {
    /// Changes applied by one commit (or one remote batch), in order.
    Committed(Vec<Change>),
    /// Cache of an entry changed.
    EntryChanged { id: EntryId, cache: Cache },
    /// Lifecycle state of an entry changed.
    EntryStateChanged { id: EntryId, state: SubjectState },
}

/// A command delivered to an entry's behavior.
#[derive(Debug)]
pub struct CommandRequest {
    pub command: String,
    pub args: Value,
    pub reply: oneshot::Sender<Result<Value, HubError>>,
}

/// Relays commands for a replica shard to the instance holding its canonical copy.
#[async_trait]
pub trait CommandForwarder: Send + Sync {
    async fn forward(
        &self,
        shard: ShardId,
        entry: &EntryId,
        command: &str,
        args: Value,
    ) -> Result<Value, HubError>;
}

/// Consistent starting point for a change feed.
///
/// Built under the shard's data lock: `events` only carries changes made
/// after `backlog` and `caches` were read.
#[derive(Debug)]
pub struct Subscription {
    pub backlog: Vec<Change>,
    pub revision: Revision,
    pub caches: Vec<(EntryId, Cache)>,
    pub events: broadcast::Receiver<ShardEvent>,
}

#[derive(Debug, Default)]
struct ShardData {
    entries: BTreeMap<EntryId, Entry>,
    log: Vec<Change>,
    revision: Revision,
}

struct ShardInner {
    descriptor: ShardDescriptor,
    state: watch::Sender<ShardState>,
    data: Mutex<ShardData>,
    commit_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ShardEvent>,
    mailboxes: Mutex<HashMap<EntryId, mpsc::Sender<CommandRequest>>>,
    forwarder: Mutex<Option<Arc<dyn CommandForwarder>>>,
    unloaded: CancellationToken,
}

/// Handle to a shard.
#[derive(Clone)]
pub struct Shard {
    inner: Arc<ShardInner>,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id())
            .field("alias", &self.alias())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shard {
    #[must_use]
    pub fn new(descriptor: ShardDescriptor) -> Self {
        let (state, _) = watch::channel(ShardState::Uninitialized);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ShardInner {
                descriptor,
                state,
                data: Mutex::new(ShardData::default()),
                commit_lock: tokio::sync::Mutex::new(()),
                events,
                mailboxes: Mutex::new(HashMap::new()),
                forwarder: Mutex::new(None),
                unloaded: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &ShardDescriptor {
        &self.inner.descriptor
    }

    #[must_use]
    pub fn id(&self) -> ShardId {
        self.inner.descriptor.id
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.inner.descriptor.alias
    }

    #[must_use]
    pub fn schema(&self) -> ShardSchema {
        self.inner.descriptor.schema
    }

    /// Peer holding the canonical copy, for replicas.
    #[must_use]
    pub fn home(&self) -> Option<&str> {
        self.inner.descriptor.home.as_deref()
    }

    #[must_use]
    pub fn is_replica(&self) -> bool {
        self.inner.descriptor.is_replica()
    }

    /// Whether two handles point at the same shard.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn state(&self) -> ShardState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ShardState> {
        self.inner.state.subscribe()
    }

    /// Suspend until the shard is READY or ERROR.
    ///
    /// # Errors
    ///
    /// Returns [`FatalError::ShardFailed`] when the shard ends up in ERROR.
    pub async fn wait_settled(&self) -> Result<(), HubError> {
        let mut rx = self.state_changes();
        let state = match rx.wait_for(|state| state.is_settled()).await {
            Ok(state) => *state,
            Err(_) => ShardState::Error,
        };
        match state {
            ShardState::Ready => Ok(()),
            _ => Err(FatalError::ShardFailed(self.alias().to_string()).into()),
        }
    }

    /// Move the shard to ERROR. Terminal.
    pub fn fail(&self) {
        tracing::error!(shard = %self.alias(), "shard failed");
        self.inner.state.send_replace(ShardState::Error);
    }

    /// Token cancelled when the shard unloads.
    #[must_use]
    pub fn unloaded(&self) -> CancellationToken {
        self.inner.unloaded.clone()
    }

    /// Snapshot of entry `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when no such entry exists.
    pub fn find(&self, id: &str) -> Result<Entry, HubError> {
        self.get(id).ok_or_else(|| {
            NotFoundError {
                entity: "Entry",
                id: id.to_string(),
            }
            .into()
        })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Entry> {
        lock(&self.inner.data).entries.get(id).cloned()
    }

    /// Snapshot of every entry, ordered by id.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        lock(&self.inner.data).entries.values().cloned().collect()
    }

    #[must_use]
    pub fn entries_of_kind(&self, kind: EntryKind) -> Vec<Entry> {
        lock(&self.inner.data)
            .entries
            .values()
            .filter(|entry| entry.kind == kind)
            .cloned()
            .collect()
    }

    /// Follow a weak reference to its current target.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when the target no longer exists.
    pub fn resolve(&self, reference: &Reference<'_>) -> Result<Entry, HubError> {
        self.find(reference.target.as_str())
    }

    #[must_use]
    pub fn revision(&self) -> Revision {
        lock(&self.inner.data).revision
    }

    /// Changes after `since`, in commit order.
    #[must_use]
    pub fn changes_since(&self, since: Revision) -> Vec<Change> {
        changes_after(&lock(&self.inner.data).log, since)
    }

    /// Live events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ShardEvent> {
        self.inner.events.subscribe()
    }

    /// Backlog after `since` plus a live feed, with nothing lost or repeated
    /// between the two.
    #[must_use]
    pub fn subscribe_from(&self, since: Revision) -> Subscription {
        let data = lock(&self.inner.data);
        let events = self.inner.events.subscribe();
        Subscription {
            backlog: changes_after(&data.log, since),
            revision: data.revision,
            caches: data
                .entries
                .values()
                .map(|entry| (entry.id.clone(), entry.cache.clone()))
                .collect(),
            events,
        }
    }

    /// Open a transaction against this shard.
    #[must_use]
    pub fn start_trans(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Validate and apply a transaction batch atomically.
    ///
    /// Waits for the commit lock, at most `timeout` when given.
    #[tracing::instrument(skip(self, ops), fields(shard = %self.alias(), ops = ops.len()))]
    pub(crate) async fn commit_ops(
        &self,
        ops: Vec<PendingOp>,
        timeout: Option<Duration>,
    ) -> Result<Revision, HubError> {
        let _guard = match timeout {
            None => self.inner.commit_lock.lock().await,
            Some(limit) => tokio::time::timeout(limit, self.inner.commit_lock.lock())
                .await
                .map_err(|_| ConflictError::CommitTimeout {
                    shard: self.alias().to_string(),
                    timeout_ms: as_millis(limit),
                })?,
        };

        if self.is_replica() {
            return Err(ValidationError::ReadOnlyReplica(self.alias().to_string()).into());
        }
        if self.state() == ShardState::Error {
            return Err(FatalError::ShardFailed(self.alias().to_string()).into());
        }

        let prior = self.state();
        if prior == ShardState::Uninitialized {
            self.inner.state.send_replace(ShardState::Loading);
        }
        let mut data = lock(&self.inner.data);
        if let Err(err) = validate_batch(&data.entries, &ops) {
            drop(data);
            self.inner.state.send_replace(prior);
            return Err(err.into());
        }

        let ts = now();
        let mut applied = Vec::with_capacity(ops.len());
        for op in ops {
            let revision = data.revision.next();
            data.revision = revision;
            let change_op = match op {
                PendingOp::Add { mut entry, attrs } => {
                    entry.revision = revision;
                    entry.state = SubjectState::Ready;
                    entry.last_changed = ts;
                    let change_op = ChangeOp::Add {
                        id: entry.id.clone(),
                        kind: entry.kind,
                        attrs,
                    };
                    data.entries.insert(entry.id.clone(), entry);
                    change_op
                }
                PendingOp::Delete(id) => {
                    data.entries.remove(&id);
                    ChangeOp::Delete { id }
                }
            };
            applied.push(Change {
                revision,
                op: change_op,
            });
        }
        data.log.extend(applied.iter().cloned());
        let revision = data.revision;
        if !applied.is_empty() {
            let _ = self.inner.events.send(ShardEvent::Committed(applied));
        }
        drop(data);

        self.inner.state.send_replace(ShardState::Ready);
        tracing::debug!(%revision, "commit applied");
        Ok(revision)
    }

    /// Apply changes received from the canonical copy.
    ///
    /// Changes at or below the current revision are skipped, so redelivery is
    /// harmless. Marks the replica READY, even for an empty batch.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::RevisionGap`] when a change skips a revision,
    /// or [`HubError::Validation`] for attributes this build cannot parse; the
    /// changes before the failing one stay applied.
    #[tracing::instrument(skip(self, changes), fields(shard = %self.alias(), changes = changes.len()))]
    pub async fn apply_remote(&self, changes: Vec<Change>) -> Result<Revision, HubError> {
        let _guard = self.inner.commit_lock.lock().await;
        let mut data = lock(&self.inner.data);
        let mut applied = Vec::new();
        let mut failure: Option<HubError> = None;

        for change in changes {
            if change.revision <= data.revision {
                continue;
            }
            let expected = data.revision.next();
            if change.revision != expected {
                failure = Some(
                    ConflictError::RevisionGap {
                        shard: self.alias().to_string(),
                        expected,
                        got: change.revision,
                    }
                    .into(),
                );
                break;
            }
            match &change.op {
                ChangeOp::Add { id, kind, attrs } => match Entry::new(id.clone(), *kind, attrs) {
                    Ok(mut entry) => {
                        entry.revision = change.revision;
                        entry.state = SubjectState::Ready;
                        data.entries.insert(id.clone(), entry);
                    }
                    Err(err) => {
                        failure = Some(err.into());
                        break;
                    }
                },
                ChangeOp::Delete { id } => {
                    data.entries.remove(id);
                }
            }
            data.revision = change.revision;
            data.log.push(change.clone());
            applied.push(change);
        }

        let revision = data.revision;
        if !applied.is_empty() {
            let _ = self.inner.events.send(ShardEvent::Committed(applied));
        }
        drop(data);

        if let Some(err) = failure {
            return Err(err);
        }
        self.inner.state.send_replace(ShardState::Ready);
        Ok(revision)
    }

    /// Apply a cache update pushed by the canonical copy.
    ///
    /// Updates for entries this replica does not know yet are dropped.
    pub fn apply_remote_cache(&self, id: &EntryId, cache: Cache) {
        if let Err(err) = self.update_cache(id, cache) {
            tracing::debug!(shard = %self.alias(), entry = %id, error = %err, "dropping cache update");
        }
    }

    /// Replace the cache of entry `id`, notifying subscribers when it differs.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when the entry no longer exists.
    pub fn update_cache(&self, id: &EntryId, cache: Cache) -> Result<bool, HubError> {
        let mut data = lock(&self.inner.data);
        let entry = data.entries.get_mut(id).ok_or_else(|| NotFoundError {
            entity: "Entry",
            id: id.to_string(),
        })?;
        if !entry.update_cache(cache.clone(), now()) {
            return Ok(false);
        }
        let _ = self.inner.events.send(ShardEvent::EntryChanged {
            id: id.clone(),
            cache,
        });
        Ok(true)
    }

    /// Move entry `id` to `state`. ERROR is terminal.
    pub fn set_entry_state(&self, id: &EntryId, state: SubjectState) {
        let mut data = lock(&self.inner.data);
        let Some(entry) = data.entries.get_mut(id) else {
            return;
        };
        if entry.state == state || entry.state.is_terminal() {
            return;
        }
        entry.state = state;
        let _ = self.inner.events.send(ShardEvent::EntryStateChanged {
            id: id.clone(),
            state,
        });
    }

    /// Route commands for entry `id` to `mailbox`.
    pub fn register_mailbox(&self, id: EntryId, mailbox: mpsc::Sender<CommandRequest>) {
        lock(&self.inner.mailboxes).insert(id, mailbox);
    }

    pub fn unregister_mailbox(&self, id: &EntryId) {
        lock(&self.inner.mailboxes).remove(id);
    }

    /// Install the forwarder used by [`post`](Self::post) on a replica.
    pub fn set_forwarder(&self, forwarder: Arc<dyn CommandForwarder>) {
        *lock(&self.inner.forwarder) = Some(forwarder);
    }

    /// Run `command` on entry `id`.
    ///
    /// On a replica the command is relayed to the canonical copy.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown entry,
    /// [`FatalError::EntryFailed`] for an entry in ERROR,
    /// [`FatalError::BehaviorStopped`] when no behavior serves the entry,
    /// [`UnreachableError`] when a replica's home is not connected, or the
    /// behavior's own error.
    #[tracing::instrument(skip(self, args), fields(shard = %self.alias()))]
    pub async fn post(&self, id: &str, command: &str, args: Value) -> Result<Value, HubError> {
        if let Some(home) = self.home() {
            let forwarder = lock(&self.inner.forwarder).clone();
            let Some(forwarder) = forwarder else {
                return Err(UnreachableError::Disconnected {
                    peer: home.to_string(),
                }
                .into());
            };
            return forwarder
                .forward(self.id(), &EntryId::from(id), command, args)
                .await;
        }

        let entry = self.find(id)?;
        if entry.state == SubjectState::Error {
            return Err(FatalError::EntryFailed(entry.id).into());
        }
        let mailbox = lock(&self.inner.mailboxes).get(id).cloned();
        let Some(mailbox) = mailbox else {
            return Err(FatalError::BehaviorStopped(entry.id).into());
        };

        let (reply, rx) = oneshot::channel();
        let request = CommandRequest {
            command: command.to_string(),
            args,
            reply,
        };
        if mailbox.send(request).await.is_err() {
            return Err(FatalError::BehaviorStopped(entry.id).into());
        }
        rx.await
            .unwrap_or_else(|_| Err(FatalError::BehaviorStopped(entry.id).into()))
    }

    /// Drop every entry and stop the behaviors attached to them.
    pub fn unload(&self) {
        self.inner.unloaded.cancel();
        lock(&self.inner.mailboxes).clear();
        lock(&self.inner.forwarder).take();
        *lock(&self.inner.data) = ShardData::default();
        self.inner.state.send_replace(ShardState::Uninitialized);
        tracing::info!(shard = %self.alias(), "shard unloaded");
    }
}

/// Check a batch against the entries it would be applied to.
fn validate_batch<'a>(
    entries: &'a BTreeMap<EntryId, Entry>,
    ops: &'a [PendingOp],
) -> Result<(), ValidationError> {
    let mut added: HashMap<&'a EntryId, &'a Entry> = HashMap::new();
    let mut deleted: HashSet<&'a EntryId> = HashSet::new();

    for op in ops {
        match op {
            PendingOp::Add { entry, .. } => {
                let exists = added.contains_key(&entry.id)
                    || (entries.contains_key(&entry.id) && !deleted.contains(&entry.id));
                if exists {
                    return Err(ValidationError::DuplicateEntry(entry.id.clone()));
                }
                deleted.remove(&entry.id);
                added.insert(&entry.id, entry);
            }
            PendingOp::Delete(id) => {
                if added.remove(id).is_some() {
                    continue;
                }
                if !entries.contains_key(id) || deleted.contains(id) {
                    return Err(ValidationError::MissingEntry(id.clone()));
                }
                deleted.insert(id);
            }
        }
    }

    for entry in added.values() {
        for reference in entry.references() {
            let Some(target) = lookup(entries, &added, &deleted, reference.target) else {
                return Err(ValidationError::UnresolvedReference {
                    entry: entry.id.clone(),
                    field: reference.field,
                    target: reference.target.clone(),
                });
            };
            if reference.field == "master" && !target.kind.exposes_pins() {
                return Err(ValidationError::NotAMaster {
                    entry: entry.id.clone(),
                    master: target.id.clone(),
                });
            }
        }

        let mut seen = HashSet::from([&entry.id]);
        let mut cursor = entry
            .master()
            .and_then(|id| lookup(entries, &added, &deleted, id));
        while let Some(master) = cursor {
            if !seen.insert(&master.id) {
                return Err(ValidationError::MasterCycle(entry.id.clone()));
            }
            cursor = master
                .master()
                .and_then(|id| lookup(entries, &added, &deleted, id));
        }
    }
    Ok(())
}

/// An entry as the batch would leave it: added by the batch, or already READY
/// and not deleted by it.
fn lookup<'a>(
    entries: &'a BTreeMap<EntryId, Entry>,
    added: &HashMap<&'a EntryId, &'a Entry>,
    deleted: &HashSet<&'a EntryId>,
    id: &EntryId,
) -> Option<&'a Entry> {
    if let Some(entry) = added.get(id) {
        return Some(*entry);
    }
    entries
        .get(id)
        .filter(|entry| entry.is_ready() && !deleted.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shardhub_domain::state::ShardState;

    fn control_shard() -> Shard {
        Shard::new(ShardDescriptor::new(6, "rpi", ShardSchema::Control))
    }

    async fn seeded() -> Shard {
        let shard = control_shard();
        let mut tx = shard.start_trans();
        tx.add("rpi", EntryKind::Rpi, json!({"name": "Raspberry Pi 1"}))
            .unwrap();
        tx.add("switch1", EntryKind::Switch, json!({"master": "rpi", "pin": 4}))
            .unwrap();
        tx.commit().await.unwrap();
        shard
    }

    #[tokio::test]
    async fn should_keep_state_when_transaction_is_dropped() {
        let shard = control_shard();
        let mut tx = shard.start_trans();
        tx.add("rpi", EntryKind::Rpi, Value::Null).unwrap();
        drop(tx);
        assert_eq!(shard.state(), ShardState::Uninitialized);
        assert!(shard.entries().is_empty());
    }

    #[tokio::test]
    async fn should_stay_uninitialized_when_first_commit_fails() {
        let shard = control_shard();
        let mut tx = shard.start_trans();
        tx.add("switch1", EntryKind::Switch, json!({"master": "ghost", "pin": 4}))
            .unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(shard.state(), ShardState::Uninitialized);

        let mut tx = shard.start_trans();
        tx.add("rpi", EntryKind::Rpi, Value::Null).unwrap();
        tx.commit().await.unwrap();
        tokio::time::timeout(Duration::from_millis(200), shard.wait_settled())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shard.state(), ShardState::Ready);
    }

    #[tokio::test]
    async fn should_commit_entries_as_ready() {
        let shard = seeded().await;
        assert_eq!(shard.state(), ShardState::Ready);
        assert_eq!(shard.revision(), Revision(2));
        let switch = shard.find("switch1").unwrap();
        assert!(switch.is_ready());
        assert_eq!(switch.revision, Revision(2));
        assert_eq!(switch.dval.alias, "switch1");
    }

    #[tokio::test]
    async fn should_return_not_found_for_unknown_entry() {
        let shard = seeded().await;
        let err = shard.find("nope").unwrap_err();
        assert!(matches!(err, HubError::NotFound(ref e) if e.entity == "Entry"));
    }

    #[tokio::test]
    async fn should_leave_shard_untouched_when_batch_fails() {
        let shard = seeded().await;
        let mut tx = shard.start_trans();
        tx.add("light1", EntryKind::Light, json!({"master": "rpi", "pin": 14}))
            .unwrap();
        tx.add("heater1", EntryKind::Heater, json!({"master": "ghost", "pin": 17}))
            .unwrap();
        let err = tx.commit().await.unwrap_err();

        assert!(matches!(
            err,
            HubError::Validation(ValidationError::UnresolvedReference { field: "master", .. })
        ));
        assert!(shard.get("light1").is_none());
        assert_eq!(shard.revision(), Revision(2));
        assert_eq!(shard.changes_since(Revision::ZERO).len(), 2);
    }

    #[tokio::test]
    async fn should_reject_duplicate_ids() {
        let shard = seeded().await;
        let mut tx = shard.start_trans();
        tx.add("rpi", EntryKind::Rpi, Value::Null).unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::DuplicateEntry(_))
        ));

        let mut tx = shard.start_trans();
        tx.add("a", EntryKind::Rpi, Value::Null).unwrap();
        tx.add("a", EntryKind::Rpi, Value::Null).unwrap();
        assert!(tx.commit().await.is_err());
    }

    #[tokio::test]
    async fn should_reject_master_that_is_not_a_controller() {
        let shard = seeded().await;
        let mut tx = shard.start_trans();
        tx.add("d", EntryKind::Din, json!({"master": "switch1", "pin": 5}))
            .unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::NotAMaster { .. })
        ));
    }

    #[tokio::test]
    async fn should_resolve_references_within_the_batch() {
        let shard = control_shard();
        let mut tx = shard.start_trans();
        tx.add("light1", EntryKind::Light, json!({"master": "rpi", "pin": 14, "switch": "switch1"}))
            .unwrap();
        tx.add("switch1", EntryKind::Switch, json!({"master": "rpi", "pin": 4}))
            .unwrap();
        tx.add("rpi", EntryKind::Rpi, Value::Null).unwrap();
        tx.commit().await.unwrap();

        let light = shard.find("light1").unwrap();
        let switches: Vec<_> = light.references().iter().map(|r| r.target.clone()).collect();
        assert_eq!(switches, vec![EntryId::from("rpi"), EntryId::from("switch1")]);
    }

    #[tokio::test]
    async fn should_delete_without_cascading() {
        let shard = seeded().await;
        let mut tx = shard.start_trans();
        tx.delete("rpi");
        tx.commit().await.unwrap();

        assert!(shard.get("rpi").is_none());
        let switch = shard.find("switch1").unwrap();
        let master = switch.references()[0];
        assert!(shard.resolve(&master).is_err());
    }

    #[tokio::test]
    async fn should_reject_delete_of_missing_entry() {
        let shard = seeded().await;
        let mut tx = shard.start_trans();
        tx.delete("ghost");
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::MissingEntry(_))
        ));
    }

    #[tokio::test]
    async fn should_mark_ready_on_empty_commit() {
        let shard = Shard::new(ShardDescriptor::new(7, "rpiImages", ShardSchema::Fs));
        let revision = shard.start_trans().commit().await.unwrap();
        assert_eq!(revision, Revision::ZERO);
        assert_eq!(shard.state(), ShardState::Ready);
    }

    #[tokio::test]
    async fn should_broadcast_committed_changes() {
        let shard = seeded().await;
        let mut rx = shard.subscribe();
        let mut tx = shard.start_trans();
        tx.add("din1", EntryKind::Din, json!({"master": "rpi", "pin": 15}))
            .unwrap();
        tx.commit().await.unwrap();

        let ShardEvent::Committed(changes) = rx.recv().await.unwrap() else {
            panic!("expected a commit event");
        };
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].revision, Revision(3));
    }

    #[tokio::test]
    async fn should_reject_local_commit_on_replica() {
        let replica = Shard::new(ShardDescriptor::new(6, "rpi", ShardSchema::Control).homed_on("rpi"));
        let mut tx = replica.start_trans();
        tx.add("rpi", EntryKind::Rpi, Value::Null).unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            HubError::Validation(ValidationError::ReadOnlyReplica(_))
        ));
    }

    #[tokio::test]
    async fn should_skip_already_applied_remote_changes() {
        let canonical = seeded().await;
        let replica = Shard::new(ShardDescriptor::new(6, "rpi", ShardSchema::Control).homed_on("rpi"));

        let all = canonical.changes_since(Revision::ZERO);
        replica.apply_remote(all[..1].to_vec()).await.unwrap();
        replica.apply_remote(all.clone()).await.unwrap();

        assert_eq!(replica.revision(), Revision(2));
        assert_eq!(replica.changes_since(Revision::ZERO), all);
        assert_eq!(replica.state(), ShardState::Ready);
    }

    #[tokio::test]
    async fn should_report_gap_in_remote_changes() {
        let canonical = seeded().await;
        let replica = Shard::new(ShardDescriptor::new(6, "rpi", ShardSchema::Control).homed_on("rpi"));
        let all = canonical.changes_since(Revision::ZERO);

        let err = replica.apply_remote(all[1..].to_vec()).await.unwrap_err();
        assert!(matches!(
            err,
            HubError::Conflict(ConflictError::RevisionGap { expected: Revision(1), got: Revision(2), .. })
        ));
        assert_eq!(replica.revision(), Revision::ZERO);
    }

    #[tokio::test]
    async fn should_notify_only_real_cache_changes() {
        let shard = seeded().await;
        let mut rx = shard.subscribe();
        let id = EntryId::from("switch1");
        assert!(shard.update_cache(&id, Cache::Input { value: Some(true) }).unwrap());
        assert!(!shard.update_cache(&id, Cache::Input { value: Some(true) }).unwrap());

        assert!(matches!(rx.recv().await.unwrap(), ShardEvent::EntryChanged { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_keep_entry_in_error_once_failed() {
        let shard = seeded().await;
        let id = EntryId::from("switch1");
        shard.set_entry_state(&id, SubjectState::Error);
        shard.set_entry_state(&id, SubjectState::Ready);
        assert_eq!(shard.find("switch1").unwrap().state, SubjectState::Error);

        let err = shard.post("switch1", "get", Value::Null).await.unwrap_err();
        assert!(matches!(err, HubError::Fatal(FatalError::EntryFailed(_))));
    }

    #[tokio::test]
    async fn should_dispatch_post_to_mailbox() {
        let shard = seeded().await;
        let (tx, mut rx) = mpsc::channel::<CommandRequest>(4);
        shard.register_mailbox(EntryId::from("switch1"), tx);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let _ = request.reply.send(Ok(json!({"echo": request.command})));
            }
        });

        let out = shard.post("switch1", "get", Value::Null).await.unwrap();
        assert_eq!(out, json!({"echo": "get"}));
    }

    #[tokio::test]
    async fn should_fail_post_without_behavior() {
        let shard = seeded().await;
        let err = shard.post("switch1", "get", Value::Null).await.unwrap_err();
        assert!(matches!(err, HubError::Fatal(FatalError::BehaviorStopped(_))));
    }

    #[tokio::test]
    async fn should_report_unreachable_post_on_unlinked_replica() {
        let replica = Shard::new(ShardDescriptor::new(6, "rpi", ShardSchema::Control).homed_on("rpi"));
        let err = replica.post("switch1", "get", Value::Null).await.unwrap_err();
        assert!(matches!(err, HubError::Unreachable(_)));
    }

    #[tokio::test]
    async fn should_serve_backlog_then_live_feed() {
        let shard = seeded().await;
        let mut sub = shard.subscribe_from(Revision(1));
        assert_eq!(sub.backlog.len(), 1);
        assert_eq!(sub.revision, Revision(2));
        assert_eq!(sub.caches.len(), 2);

        let mut tx = shard.start_trans();
        tx.delete("switch1");
        tx.commit().await.unwrap();
        let ShardEvent::Committed(live) = sub.events.recv().await.unwrap() else {
            panic!("expected a commit event");
        };
        assert_eq!(live[0].revision, Revision(3));
    }

    #[tokio::test]
    async fn should_time_out_waiting_for_commit_lock() {
        let shard = seeded().await;
        let _held = shard.inner.commit_lock.lock().await;
        let err = shard
            .start_trans()
            .commit_within(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Conflict(ConflictError::CommitTimeout { .. })));
    }

    #[tokio::test]
    async fn should_clear_entries_on_unload() {
        let shard = seeded().await;
        let token = shard.unloaded();
        shard.unload();
        assert!(token.is_cancelled());
        assert!(shard.entries().is_empty());
        assert_eq!(shard.state(), ShardState::Uninitialized);
    }

    #[tokio::test]
    async fn should_settle_with_error_on_failed_shard() {
        let shard = control_shard();
        let waiter = {
            let shard = shard.clone();
            tokio::spawn(async move { shard.wait_settled().await })
        };
        shard.fail();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(HubError::Fatal(FatalError::ShardFailed(_)))));
    }
}
