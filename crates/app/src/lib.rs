//! # shardhub-app
//!
//! Application layer: the device-state runtime and its **port definitions**.
//!
//! ## Responsibilities
//! - Define **port traits** that adapters implement:
//!   - `Gpio`: raw pin access and pin events
//!   - `ImageCapture`: camera stills
//!   - `BlobStore`: opaque storage for captured images
//!   - `PeerConnector`: message channels to other instances
//! - Run the core:
//!   - `Hub` / `Space`: resolve shards by alias, possibly across peers
//!   - `Shard` / `Transaction`: entries, atomic commits, the commit log
//!   - `DeviceRuntime`: one behavior task per entry
//!   - `PeerLink`: reconnecting replication and remote commands
//!
//! ## Dependency rule
//! Depends on `shardhub-domain` only (plus tokio for tasks, channels and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod device;
pub mod hub;
pub mod peer;
pub mod ports;
pub mod shard;
pub mod space;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;
