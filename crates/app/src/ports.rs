//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the runtime and the outside world:
//! hardware pins, image capture, blob storage and the peer transport.
//! They are defined here (in `app`) so that both the runtime and the adapter
//! layer can depend on them without creating circular dependencies.

pub mod blob_store;
pub mod capture;
pub mod gpio;
pub mod peer;

pub use blob_store::BlobStore;
pub use capture::ImageCapture;
pub use gpio::{Gpio, PinEvent};
pub use peer::{PeerConnection, PeerConnector};

/// Error type returned by port implementations.
///
/// Adapters box their own typed errors; the runtime maps them onto the
/// [`HubError`](shardhub_domain::error::HubError) class that fits the call site.
pub type PortError = Box<dyn std::error::Error + Send + Sync>;
