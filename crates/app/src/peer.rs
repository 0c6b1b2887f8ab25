//! Peer links: replicate shards and relay commands between instances.
//!
//! A link reconnects forever with exponential backoff. On every connection
//! the replica side asks for the changes after its current revision, so a
//! reconnect resumes replay without gaps; already-applied revisions are
//! skipped on arrival.

mod backoff;
mod link;
mod pending;
pub(crate) mod session;

pub use backoff::{Backoff, INITIAL_DELAY, MAX_DELAY};
pub use link::{LinkOptions, PeerLink};
pub use pending::{PendingReply, PendingRequests};
