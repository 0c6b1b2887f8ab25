//! Peer link: a persistent, reconnecting connection to one peer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use shardhub_domain::error::{HubError, UnreachableError};
use shardhub_domain::id::{EntryId, ShardId};
use shardhub_domain::peer::{ConnectionState, PeerMessage};
use shardhub_domain::time::as_millis;

use super::backoff::{Backoff, INITIAL_DELAY, MAX_DELAY};
use super::pending::PendingRequests;
use super::session::{self, SessionContext};
use crate::ports::PeerConnector;
use crate::shard::CommandForwarder;
use crate::space::ShardRegistry;

/// Tunables of a peer link.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// How long a remote `post` waits for its reply.
    pub request_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            backoff_initial: INITIAL_DELAY,
            backoff_max: MAX_DELAY,
        }
    }
}

/// Handle to the link with one peer.
#[derive(Clone)]
pub struct PeerLink {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    peer: String,
    target: String,
    context: SessionContext,
    options: LinkOptions,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<PeerMessage>>>,
    pending: PendingRequests,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer", &self.inner.peer)
            .field("target", &self.inner.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PeerLink {
    pub(crate) fn new(
        peer: String,
        target: String,
        instance: String,
        space: String,
        shards: ShardRegistry,
        options: LinkOptions,
        cancel: CancellationToken,
    ) -> Self {
        let pending = PendingRequests::default();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(LinkInner {
                context: SessionContext {
                    instance,
                    space,
                    shards,
                    peer: Some(peer.clone()),
                    pending: Some(pending.clone()),
                },
                peer,
                target,
                options,
                state,
                outbound: Mutex::new(None),
                pending,
                cancel,
            }),
        }
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::Sender<PeerMessage>>> {
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of remote calls awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Suspend until the link is CONNECTED.
    pub async fn wait_connected(&self) {
        let mut rx = self.state_changes();
        let _ = rx.wait_for(|state| state.is_connected()).await;
    }

    /// Suspend until the link is no longer CONNECTED.
    pub async fn wait_disconnected(&self) {
        let mut rx = self.state_changes();
        let _ = rx.wait_for(|state| !state.is_connected()).await;
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            tracing::info!(peer = %self.inner.peer, ?previous, ?state, "peer link state changed");
        }
    }

    /// Stop the link for good; pending calls fail with UNREACHABLE.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// Connect, serve, and reconnect with backoff until shut down.
    pub(crate) async fn run(self, connector: Arc<dyn PeerConnector>) {
        let cancel = self.inner.cancel.clone();
        let mut backoff = Backoff::new(self.inner.options.backoff_initial, self.inner.options.backoff_max);

        loop {
            self.set_state(self.state().on_attempt());
            let attempt = tokio::select! {
                () = cancel.cancelled() => break,
                attempt = connector.connect(&self.inner.target) => attempt,
            };
            match attempt {
                Ok(conn) => {
                    backoff.reset();
                    *self.outbound() = Some(conn.sender.clone());
                    self.set_state(ConnectionState::Connected);
                    let result =
                        session::run(conn, self.inner.context.clone(), cancel.child_token()).await;
                    self.outbound().take();
                    self.inner.pending.fail_all(&self.inner.peer);
                    if let Err(err) = result {
                        tracing::warn!(peer = %self.inner.peer, error = %err, "session ended with error");
                    }
                }
                Err(err) => {
                    tracing::warn!(peer = %self.inner.peer, target = %self.inner.target, error = %err, "connect failed");
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(self.state().on_lost());
            let delay = backoff.next_delay();
            tracing::debug!(peer = %self.inner.peer, delay_ms = as_millis(delay), "reconnecting after delay");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.outbound().take();
        self.inner.pending.fail_all(&self.inner.peer);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Run `command` on `entry` of `shard` at the peer.
    ///
    /// Commands are never retried.
    ///
    /// # Errors
    ///
    /// Returns [`UnreachableError`] when the link is down or the reply does not
    /// arrive within the request timeout, or the remote error mapped back to
    /// its class.
    #[tracing::instrument(skip(self, args), fields(peer = %self.inner.peer))]
    pub async fn post(
        &self,
        shard: ShardId,
        entry: &EntryId,
        command: &str,
        args: Value,
    ) -> Result<Value, HubError> {
        let peer = &self.inner.peer;
        let disconnected = || UnreachableError::Disconnected { peer: peer.clone() };
        let sender = self.outbound().clone().ok_or_else(disconnected)?;

        let mut reply = self.inner.pending.register();
        sender
            .send(PeerMessage::Post {
                request: reply.request(),
                shard,
                entry: entry.clone(),
                command: command.to_string(),
                args,
            })
            .await
            .map_err(|_| disconnected())?;

        let timeout = self.inner.options.request_timeout;
        let outcome = tokio::time::timeout(timeout, reply.recv(peer))
            .await
            .map_err(|_| UnreachableError::Timeout {
                peer: peer.clone(),
                timeout_ms: as_millis(timeout),
            })??;
        Result::<Value, _>::from(outcome).map_err(HubError::from)
    }
}

#[async_trait]
impl CommandForwarder for PeerLink {
    async fn forward(
        &self,
        shard: ShardId,
        entry: &EntryId,
        command: &str,
        args: Value,
    ) -> Result<Value, HubError> {
        self.post(shard, entry, command, args).await
    }
}
