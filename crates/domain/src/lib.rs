//! # shardhub-domain
//!
//! Pure domain model for the shardhub device-state runtime.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error taxonomy, timestamps
//! - Define **Entries** (addressable devices: controllers, inputs, outputs, lights, heaters, cameras)
//! - Define **Shards** and **Spaces** (partitioning of entries and their descriptors)
//! - Define the **commit log** (revisions and changes replayed between instances)
//! - Define the **peer wire protocol** and link connection states
//! - Contain all attribute validation and invariant enforcement
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod commit;
pub mod entry;
pub mod peer;
pub mod shard;
pub mod space;
pub mod state;
