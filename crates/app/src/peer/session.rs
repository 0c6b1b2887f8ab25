//! One established peer connection: handshake, replay, live push, remote
//! commands.
//!
//! Sessions are symmetric. Either side serves `want` and `post` for the shards
//! it holds canonically; the side holding replicas asks for them with `want`
//! and applies what comes back.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use shardhub_domain::commit::{Change, Revision};
use shardhub_domain::entry::Cache;
use shardhub_domain::error::{
    ConflictError, HubError, NotFoundError, RemoteError, UnreachableError,
};
use shardhub_domain::id::{ConnectionId, EntryId, ShardId};
use shardhub_domain::peer::{Outcome, PeerMessage};

use super::pending::PendingRequests;
use crate::ports::PeerConnection;
use crate::shard::{Shard, ShardEvent, Subscription};
use crate::space::ShardRegistry;

/// What a session serves and feeds.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub instance: String,
    pub space: String,
    pub shards: ShardRegistry,
    /// Peer whose replicas this session feeds; outbound links only.
    pub peer: Option<String>,
    /// Callers waiting on `reply`; outbound links only.
    pub pending: Option<PendingRequests>,
}

/// Drive `conn` until it closes or `cancel` fires.
///
/// # Errors
///
/// Returns [`UnreachableError::Disconnected`] when the handshake cannot be sent.
pub(crate) async fn run(
    conn: PeerConnection,
    ctx: SessionContext,
    cancel: CancellationToken,
) -> Result<(), HubError> {
    let connection = ConnectionId::new();
    let span = tracing::info_span!(
        "session",
        %connection,
        peer = ctx.peer.as_deref().unwrap_or("inbound")
    );
    serve(conn, ctx, cancel).instrument(span).await
}

async fn serve(
    conn: PeerConnection,
    ctx: SessionContext,
    cancel: CancellationToken,
) -> Result<(), HubError> {
    let PeerConnection {
        sender,
        mut receiver,
    } = conn;
    let pushes = cancel.child_token();
    let _stop_pushes = pushes.clone().drop_guard();
    // One live push per shard; a repeated `want` replaces it.
    let mut feeds: HashMap<ShardId, CancellationToken> = HashMap::new();
    let mut remote = ctx.peer.clone().unwrap_or_else(|| "inbound".to_string());

    send(
        &sender,
        &remote,
        PeerMessage::Hello {
            instance: ctx.instance.clone(),
            space: ctx.space.clone(),
        },
    )
    .await?;
    if let Some(peer) = &ctx.peer {
        for shard in ctx.shards.replicas_of(peer) {
            tracing::debug!(shard = %shard.alias(), since = %shard.revision(), "requesting replay");
            send(
                &sender,
                &remote,
                PeerMessage::Want {
                    shard: shard.id(),
                    since: shard.revision(),
                },
            )
            .await?;
        }
    }

    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = receiver.recv() => msg,
        };
        let Some(msg) = msg else {
            tracing::info!("connection closed by peer");
            break;
        };
        match msg {
            PeerMessage::Hello { instance, space } => {
                if space != ctx.space {
                    tracing::warn!(%instance, %space, "peer serves another space, closing");
                    break;
                }
                tracing::info!(%instance, "peer said hello");
                remote = instance;
            }
            PeerMessage::Want { shard, since } => match ctx.shards.by_id(shard) {
                Some(shard) if !shard.is_replica() => {
                    let feed = pushes.child_token();
                    if let Some(previous) = feeds.insert(shard.id(), feed.clone()) {
                        tracing::debug!(shard = %shard.alias(), %since, "replacing live push");
                        previous.cancel();
                    }
                    let span = tracing::debug_span!("push", shard = %shard.alias());
                    tokio::spawn(push(shard, since, sender.clone(), feed).instrument(span));
                }
                _ => tracing::warn!(%shard, "want for a shard not held here"),
            },
            PeerMessage::Changes { shard, changes } => {
                if let Some(replica) = ctx.shards.by_id(shard).filter(Shard::is_replica) {
                    apply_changes(&replica, changes, &sender, &remote).await?;
                }
            }
            PeerMessage::EntryChanged {
                shard,
                entry,
                cache,
            } => {
                if let Some(replica) = ctx.shards.by_id(shard).filter(Shard::is_replica) {
                    replica.apply_remote_cache(&entry, cache);
                }
            }
            PeerMessage::Post {
                request,
                shard,
                entry,
                command,
                args,
            } => {
                let shards = ctx.shards.clone();
                let sender = sender.clone();
                tokio::spawn(
                    async move {
                        let outcome = match run_post(&shards, shard, &entry, &command, args).await {
                            Ok(value) => Outcome::Ok(value),
                            Err(err) => Outcome::Err(RemoteError::from(&err)),
                        };
                        let _ = sender.send(PeerMessage::Reply { request, outcome }).await;
                    }
                    .in_current_span(),
                );
            }
            PeerMessage::Reply { request, outcome } => {
                let delivered = ctx
                    .pending
                    .as_ref()
                    .is_some_and(|pending| pending.resolve(request, outcome));
                if !delivered {
                    tracing::debug!(%request, "reply without a waiting caller");
                }
            }
        }
    }
    Ok(())
}

async fn send(
    sender: &mpsc::Sender<PeerMessage>,
    remote: &str,
    msg: PeerMessage,
) -> Result<(), HubError> {
    sender.send(msg).await.map_err(|_| {
        UnreachableError::Disconnected {
            peer: remote.to_string(),
        }
        .into()
    })
}

async fn apply_changes(
    replica: &Shard,
    changes: Vec<Change>,
    sender: &mpsc::Sender<PeerMessage>,
    remote: &str,
) -> Result<(), HubError> {
    match replica.apply_remote(changes).await {
        Ok(revision) => {
            tracing::debug!(shard = %replica.alias(), %revision, "replica caught up");
            Ok(())
        }
        Err(HubError::Conflict(ConflictError::RevisionGap { expected, got, .. })) => {
            tracing::warn!(shard = %replica.alias(), %expected, %got, "gap in replay, asking again");
            send(
                sender,
                remote,
                PeerMessage::Want {
                    shard: replica.id(),
                    since: replica.revision(),
                },
            )
            .await
        }
        Err(err) => {
            tracing::warn!(shard = %replica.alias(), error = %err, "cannot apply remote changes");
            Ok(())
        }
    }
}

async fn run_post(
    shards: &ShardRegistry,
    shard: ShardId,
    entry: &EntryId,
    command: &str,
    args: Value,
) -> Result<Value, HubError> {
    let shard = shards
        .by_id(shard)
        .filter(|shard| !shard.is_replica())
        .ok_or_else(|| NotFoundError {
            entity: "Shard",
            id: shard.to_string(),
        })?;
    shard.post(entry.as_str(), command, args).await
}

/// Feed one `want`: the backlog after `since`, cache snapshots, then live
/// changes with nothing repeated.
async fn push(
    shard: Shard,
    since: Revision,
    sender: mpsc::Sender<PeerMessage>,
    cancel: CancellationToken,
) {
    let settled = tokio::select! {
        () = cancel.cancelled() => return,
        settled = shard.wait_settled() => settled,
    };
    if let Err(err) = settled {
        tracing::warn!(error = %err, "shard unavailable for replay");
        return;
    }

    let Subscription {
        backlog,
        revision,
        caches,
        mut events,
    } = shard.subscribe_from(since);
    let id = shard.id();
    tracing::debug!(%since, changes = backlog.len(), "replaying backlog");
    if !send_changes(&sender, id, backlog).await || !send_caches(&sender, id, caches).await {
        return;
    }
    let mut last_sent = revision;

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let delivered = match event {
            Ok(ShardEvent::Committed(changes)) => {
                let fresh: Vec<_> = changes
                    .into_iter()
                    .filter(|change| change.revision > last_sent)
                    .collect();
                match fresh.last() {
                    Some(last) => {
                        last_sent = last.revision;
                        send_changes(&sender, id, fresh).await
                    }
                    None => true,
                }
            }
            Ok(ShardEvent::EntryChanged { id: entry, cache }) => sender
                .send(PeerMessage::EntryChanged {
                    shard: id,
                    entry,
                    cache,
                })
                .await
                .is_ok(),
            Ok(ShardEvent::EntryStateChanged { .. }) => true,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "push lagged, resending from log");
                let missed = shard.changes_since(last_sent);
                if let Some(last) = missed.last() {
                    last_sent = last.revision;
                }
                let caches = shard
                    .entries()
                    .into_iter()
                    .map(|entry| (entry.id, entry.cache))
                    .collect();
                send_changes(&sender, id, missed).await && send_caches(&sender, id, caches).await
            }
            Err(RecvError::Closed) => break,
        };
        if !delivered {
            break;
        }
    }
}

async fn send_changes(
    sender: &mpsc::Sender<PeerMessage>,
    shard: ShardId,
    changes: Vec<Change>,
) -> bool {
    sender
        .send(PeerMessage::Changes { shard, changes })
        .await
        .is_ok()
}

async fn send_caches(
    sender: &mpsc::Sender<PeerMessage>,
    shard: ShardId,
    caches: Vec<(EntryId, Cache)>,
) -> bool {
    for (entry, cache) in caches {
        if sender
            .send(PeerMessage::EntryChanged {
                shard,
                entry,
                cache,
            })
            .await
            .is_err()
        {
            return false;
        }
    }
    true
}
