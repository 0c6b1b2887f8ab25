//! In-memory blob store.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use shardhub_app::ports::{BlobStore, PortError};

/// Blobs kept per shard alias, named `img-00001.jpg`, `img-00002.jpg`, …
#[derive(Default)]
pub struct MemoryBlobStore {
    shards: Mutex<BTreeMap<String, Vec<(String, Vec<u8>)>>>,
}

impl MemoryBlobStore {
    /// Identifiers stored under `shard_alias`, oldest first.
    #[must_use]
    pub fn list(&self, shard_alias: &str) -> Vec<String> {
        self.shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(shard_alias)
            .map(|blobs| blobs.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Payload of blob `id` (as returned by `save`).
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        let (alias, _) = id.split_once('/')?;
        self.shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)?
            .iter()
            .find(|(stored, _)| stored == id)
            .map(|(_, blob)| blob.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(&self, shard_alias: &str, blob: Vec<u8>) -> Result<String, PortError> {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        let blobs = shards.entry(shard_alias.to_string()).or_default();
        let id = format!("{shard_alias}/img-{:05}.jpg", blobs.len() + 1);
        tracing::debug!(%id, bytes = blob.len(), "blob stored");
        blobs.push((id.clone(), blob));
        Ok(id)
    }
}
