//! Space: named collection of shards plus the links to its peers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use shardhub_domain::error::{HubError, NotFoundError, UnreachableError, ValidationError};
use shardhub_domain::id::ShardId;
use shardhub_domain::shard::{EntrySeed, ShardDescriptor};
use shardhub_domain::space::SpaceDescriptor;
use shardhub_domain::time::as_millis;

use crate::peer::session::{self, SessionContext};
use crate::peer::{LinkOptions, PeerLink};
use crate::ports::{PeerConnection, PeerConnector};
use crate::shard::Shard;

/// How [`Space::find_shard_with`] treats a replica whose home is offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    /// Wait for the home link to connect instead of failing right away.
    pub wait_for_peer: bool,
    /// Give up after this long; UNREACHABLE on expiry.
    pub timeout: Option<Duration>,
}

#[derive(Default)]
struct Shards {
    by_alias: BTreeMap<String, Shard>,
    by_id: BTreeMap<ShardId, Shard>,
}

/// Shards of one space, by alias and by id.
#[derive(Clone, Default)]
pub(crate) struct ShardRegistry {
    inner: Arc<RwLock<Shards>>,
}

impl ShardRegistry {
    fn insert(&self, shard: Shard) -> Result<(), ValidationError> {
        let mut shards = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if shards.by_alias.contains_key(shard.alias()) {
            return Err(ValidationError::DuplicateShardAlias(shard.alias().to_string()));
        }
        if shards.by_id.contains_key(&shard.id()) {
            return Err(ValidationError::DuplicateShardId(shard.id()));
        }
        shards.by_id.insert(shard.id(), shard.clone());
        shards.by_alias.insert(shard.alias().to_string(), shard);
        Ok(())
    }

    pub(crate) fn by_alias(&self, alias: &str) -> Option<Shard> {
        let shards = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        shards.by_alias.get(alias).cloned()
    }

    pub(crate) fn by_id(&self, id: ShardId) -> Option<Shard> {
        let shards = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        shards.by_id.get(&id).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Shard> {
        let shards = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        shards.by_id.values().cloned().collect()
    }

    /// Replicas whose canonical copy lives on `peer`.
    pub(crate) fn replicas_of(&self, peer: &str) -> Vec<Shard> {
        self.all()
            .into_iter()
            .filter(|shard| shard.home() == Some(peer))
            .collect()
    }
}

/// Handle to a space.
#[derive(Clone)]
pub struct Space {
    inner: Arc<SpaceInner>,
}

struct SpaceInner {
    descriptor: SpaceDescriptor,
    instance: String,
    shards: ShardRegistry,
    links: Mutex<BTreeMap<String, PeerLink>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("name", &self.name())
            .field("instance", &self.inner.instance)
            .finish_non_exhaustive()
    }
}

impl Space {
    /// Create the space as seen by `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when the descriptor is invalid.
    pub fn new(descriptor: SpaceDescriptor, instance: impl Into<String>) -> Result<Self, HubError> {
        descriptor.validate()?;
        Ok(Self {
            inner: Arc::new(SpaceInner {
                descriptor,
                instance: instance.into(),
                shards: ShardRegistry::default(),
                links: Mutex::new(BTreeMap::new()),
                cancel: CancellationToken::new(),
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    #[must_use]
    pub fn descriptor(&self) -> &SpaceDescriptor {
        &self.inner.descriptor
    }

    /// Name of the local instance.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.inner.instance
    }

    /// Register a shard without initialising it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] for a duplicate alias or id, or
    /// [`HubError::NotFound`] when a replica's home is not a peer of the space.
    pub fn add_shard(&self, descriptor: ShardDescriptor) -> Result<Shard, HubError> {
        descriptor.validate()?;
        if let Some(home) = &descriptor.home
            && !self.inner.descriptor.peers.contains_key(home)
        {
            return Err(NotFoundError {
                entity: "Peer",
                id: home.clone(),
            }
            .into());
        }
        let shard = Shard::new(descriptor);
        self.inner.shards.insert(shard.clone())?;
        tracing::info!(
            space = %self.name(),
            shard = %shard.alias(),
            id = %shard.id(),
            schema = %shard.schema(),
            replica = shard.is_replica(),
            "shard registered"
        );
        Ok(shard)
    }

    /// Register a shard and, for a canonical copy, commit `seeds` in one
    /// transaction.
    ///
    /// A replica only registers; it fills up through its home link.
    ///
    /// # Errors
    ///
    /// Returns the registration error, or the commit error. A rejected batch
    /// leaves the shard registered and open to a corrective transaction; only
    /// a fatal fault moves it to ERROR.
    #[tracing::instrument(
        skip(self, descriptor, seeds),
        fields(space = %self.name(), shard = %descriptor.alias)
    )]
    pub async fn init_shard(
        &self,
        descriptor: ShardDescriptor,
        seeds: Vec<EntrySeed>,
    ) -> Result<Shard, HubError> {
        let shard = self.add_shard(descriptor)?;
        if shard.is_replica() {
            return Ok(shard);
        }
        let mut tx = shard.start_trans();
        let queued = seeds
            .into_iter()
            .try_for_each(|seed| tx.add(seed.id, seed.kind, seed.attrs).map(|_| ()));
        let result = match queued {
            Ok(()) => tx.commit().await,
            Err(err) => Err(err),
        };
        match result {
            Ok(revision) => {
                tracing::info!(%revision, entries = shard.entries().len(), "shard ready");
                Ok(shard)
            }
            Err(err @ HubError::Fatal(_)) => {
                tracing::error!(error = %err, "shard initialisation failed");
                shard.fail();
                Err(err)
            }
            Err(err) => {
                tracing::warn!(error = %err, state = %shard.state(), "seed entries rejected");
                Err(err)
            }
        }
    }

    #[must_use]
    pub fn shards(&self) -> Vec<Shard> {
        self.inner.shards.all()
    }

    /// Resolve `alias` and wait until the shard is READY.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown alias,
    /// [`HubError::Unreachable`] for a replica whose home is not connected, or
    /// [`HubError::Fatal`] when the shard is in ERROR.
    pub async fn find_shard(&self, alias: &str) -> Result<Shard, HubError> {
        self.find_shard_with(alias, FindOptions::default()).await
    }

    /// [`find_shard`](Self::find_shard) with control over waiting.
    ///
    /// # Errors
    ///
    /// As [`find_shard`](Self::find_shard); a timeout maps to
    /// [`UnreachableError::Timeout`].
    #[tracing::instrument(skip(self), fields(space = %self.name()))]
    pub async fn find_shard_with(
        &self,
        alias: &str,
        options: FindOptions,
    ) -> Result<Shard, HubError> {
        let shard = self.inner.shards.by_alias(alias).ok_or_else(|| NotFoundError {
            entity: "Shard",
            id: alias.to_string(),
        })?;

        let link = match shard.home() {
            None => None,
            Some(home) => match self.link(home) {
                Some(link) if options.wait_for_peer || link.state().is_connected() => Some(link),
                _ => {
                    return Err(UnreachableError::Disconnected {
                        peer: home.to_string(),
                    }
                    .into());
                }
            },
        };

        let wait = async {
            let Some(link) = &link else {
                return shard.wait_settled().await;
            };
            link.wait_connected().await;
            tokio::select! {
                biased;
                settled = shard.wait_settled() => settled,
                () = link.wait_disconnected() => Err(UnreachableError::Disconnected {
                    peer: link.peer().to_string(),
                }
                .into()),
            }
        };

        match options.timeout {
            None => wait.await?,
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                UnreachableError::Timeout {
                    peer: shard.home().unwrap_or(self.instance()).to_string(),
                    timeout_ms: as_millis(limit),
                }
            })??,
        }
        Ok(shard)
    }

    /// Resolve a shard by numeric id, without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for an unknown id.
    pub fn shard_by_id(&self, id: ShardId) -> Result<Shard, HubError> {
        self.inner.shards.by_id(id).ok_or_else(|| {
            NotFoundError {
                entity: "Shard",
                id: id.to_string(),
            }
            .into()
        })
    }

    /// Resolve `alias` and run `command` on entry `entry` of it.
    ///
    /// # Errors
    ///
    /// Returns any error of [`find_shard`](Self::find_shard) or
    /// [`Shard::post`].
    pub async fn post(
        &self,
        alias: &str,
        entry: &str,
        command: &str,
        args: Value,
    ) -> Result<Value, HubError> {
        self.find_shard(alias).await?.post(entry, command, args).await
    }

    /// Start a link to every peer of the space except ourselves.
    pub fn connect_peers(&self, connector: &Arc<dyn PeerConnector>, options: &LinkOptions) {
        let mut links = self.inner.links.lock().unwrap_or_else(PoisonError::into_inner);
        for (peer, target) in &self.inner.descriptor.peers {
            if peer == &self.inner.instance || links.contains_key(peer) {
                continue;
            }
            let link = PeerLink::new(
                peer.clone(),
                target.clone(),
                self.inner.instance.clone(),
                self.name().to_string(),
                self.inner.shards.clone(),
                options.clone(),
                self.inner.cancel.child_token(),
            );
            for replica in self.inner.shards.replicas_of(peer) {
                replica.set_forwarder(Arc::new(link.clone()));
            }
            tracing::info!(space = %self.name(), %peer, %target, "starting peer link");
            tokio::spawn(link.clone().run(connector.clone()));
            links.insert(peer.clone(), link);
        }
    }

    /// Serve an inbound connection from a peer.
    ///
    /// Inbound sessions answer `want` and `post`; replicas are fed only by the
    /// links this instance opens itself.
    pub fn accept(&self, conn: PeerConnection) {
        let ctx = SessionContext {
            instance: self.inner.instance.clone(),
            space: self.name().to_string(),
            shards: self.inner.shards.clone(),
            peer: None,
            pending: None,
        };
        let cancel = self.inner.cancel.child_token();
        tokio::spawn(async move {
            if let Err(err) = session::run(conn, ctx, cancel).await {
                tracing::warn!(error = %err, "inbound session ended with error");
            }
        });
    }

    /// The link to `peer`, once [`connect_peers`](Self::connect_peers) ran.
    #[must_use]
    pub fn link(&self, peer: &str) -> Option<PeerLink> {
        self.inner
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
    }

    #[must_use]
    pub fn links(&self) -> Vec<PeerLink> {
        self.inner
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Cancel every link and session, and unload every shard.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        for shard in self.shards() {
            shard.unload();
        }
        tracing::info!(space = %self.name(), "space shut down");
    }
}
