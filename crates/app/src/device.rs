//! Device runtime: attaches a behavior task to every entry of a control shard.
//!
//! Each entry gets one task and one command mailbox. A per-shard supervisor
//! starts behaviors for committed entries and cancels them when entries are
//! deleted, the shard unloads or the runtime shuts down.

mod behavior;
mod bus;
mod camera;
mod command;
mod controller;
mod heater;
mod input;
mod light;
mod output;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use shardhub_domain::commit::ChangeOp;
use shardhub_domain::entry::Entry;
use shardhub_domain::id::{EntryId, ShardId};
use shardhub_domain::shard::ShardSchema;

use crate::ports::{BlobStore, Gpio, ImageCapture};
use crate::shard::{Shard, ShardEvent};
use behavior::{Behavior, BehaviorContext};
use bus::PinBus;

const MAILBOX_CAPACITY: usize = 16;

/// Hardware-facing capabilities shared by every behavior.
#[derive(Clone)]
pub struct Capabilities {
    pub gpio: Arc<dyn Gpio>,
    pub capture: Arc<dyn ImageCapture>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Runs device behaviors for attached shards.
#[derive(Clone)]
pub struct DeviceRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    caps: Capabilities,
    buses: Mutex<HashMap<(ShardId, EntryId), PinBus>>,
    cancel: CancellationToken,
}

impl DeviceRuntime {
    #[must_use]
    pub fn new(caps: Capabilities) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                caps,
                buses: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Start behaviors for `shard` and keep them in step with its commits.
    ///
    /// Returns `None` for replicas and non-control shards, which carry no
    /// behaviors.
    pub fn attach(&self, shard: &Shard) -> Option<JoinHandle<()>> {
        if shard.is_replica() || shard.schema() != ShardSchema::Control {
            tracing::debug!(shard = %shard.alias(), "no behaviors for shard");
            return None;
        }
        let supervisor = Supervisor {
            runtime: self.clone(),
            shard: shard.clone(),
            running: HashMap::new(),
        };
        let span = tracing::info_span!("supervisor", shard = %shard.alias());
        Some(tokio::spawn(supervisor.run().instrument(span)))
    }

    /// Cancel every behavior of every attached shard.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    fn bus(&self, shard: ShardId, controller: &EntryId) -> PinBus {
        self.inner
            .buses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((shard, controller.clone()))
            .or_insert_with(|| PinBus::new(self.inner.caps.gpio.clone()))
            .clone()
    }
}

struct Supervisor {
    runtime: DeviceRuntime,
    shard: Shard,
    running: HashMap<EntryId, CancellationToken>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut events = self.shard.subscribe();
        let unloaded = self.shard.unloaded();
        let cancel = self.runtime.inner.cancel.clone();
        self.resync();
        tracing::info!(behaviors = self.running.len(), "behaviors attached");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = unloaded.cancelled() => break,
                event = events.recv() => match event {
                    Ok(ShardEvent::Committed(changes)) => {
                        for change in changes {
                            match change.op {
                                ChangeOp::Add { id, .. } => {
                                    if let Some(entry) = self.shard.get(id.as_str()) {
                                        self.start(&entry);
                                    }
                                }
                                ChangeOp::Delete { id } => self.stop(&id),
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "shard events lagged, resyncing behaviors");
                        self.resync();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        for (_, token) in self.running.drain() {
            token.cancel();
        }
        tracing::info!("behaviors detached");
    }

    /// Match running behaviors to the shard's current entries.
    fn resync(&mut self) {
        let entries = self.shard.entries();
        let stale: Vec<EntryId> = self
            .running
            .keys()
            .filter(|id| !entries.iter().any(|entry| &entry.id == *id))
            .cloned()
            .collect();
        for id in stale {
            self.stop(&id);
        }
        for entry in &entries {
            self.start(entry);
        }
    }

    fn start(&mut self, entry: &Entry) {
        if self.running.contains_key(&entry.id) {
            return;
        }
        let shard_id = self.shard.id();
        let runtime = &self.runtime;
        let behavior = Behavior::for_entry(entry, |controller| runtime.bus(shard_id, controller));

        let (mailbox, requests) = mpsc::channel(MAILBOX_CAPACITY);
        self.shard.register_mailbox(entry.id.clone(), mailbox);
        let cancel = self.runtime.inner.cancel.child_token();
        let ctx = BehaviorContext {
            shard: self.shard.clone(),
            id: entry.id.clone(),
            kind: entry.kind,
            caps: self.runtime.inner.caps.clone(),
            cancel: cancel.clone(),
        };
        let span = tracing::info_span!("behavior", entry = %entry.id, kind = %entry.kind);
        tokio::spawn(behavior.run(ctx, requests).instrument(span));
        self.running.insert(entry.id.clone(), cancel);
        tracing::debug!(entry = %entry.id, kind = %entry.kind, "behavior started");
    }

    fn stop(&mut self, id: &EntryId) {
        if let Some(token) = self.running.remove(id) {
            self.shard.unregister_mailbox(id);
            token.cancel();
            tracing::debug!(entry = %id, "behavior stopped");
        }
    }
}
