//! Blob store port: opaque sink for binary payloads such as camera stills.

use async_trait::async_trait;

use super::PortError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `blob` in the shard aliased `shard_alias`, returning its identifier.
    ///
    /// # Errors
    ///
    /// Returns the storage failure.
    async fn save(&self, shard_alias: &str, blob: Vec<u8>) -> Result<String, PortError>;
}
