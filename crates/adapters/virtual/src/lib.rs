//! # shardhub-adapter-virtual
//!
//! In-memory implementations of every runtime port, used by dummy mode and
//! by tests.
//!
//! ## Provided capabilities
//!
//! | Type | Port | Behaviour |
//! |------|------|-----------|
//! | [`VirtualGpio`] | `Gpio` | Pin levels in memory; [`VirtualGpio::set_input`] simulates wiring |
//! | [`MemoryBlobStore`] | `BlobStore` | Keeps blobs per shard alias, numbered `img-00001.jpg`, … |
//! | [`DummyCapture`] | `ImageCapture` | Returns a tiny JPEG-shaped payload, or fails on demand |
//! | [`MemoryNetwork`] | `PeerConnector` | Routes targets to in-process spaces |
//!
//! [`VirtualDevices`] bundles one of each and hands them to the runtime as
//! `Capabilities`.
//!
//! ## Dependency rule
//!
//! Depends on `shardhub-app` (port traits) and `shardhub-domain` only.

mod blob_store;
mod capture;
mod error;
mod gpio;
mod network;

pub use blob_store::MemoryBlobStore;
pub use capture::DummyCapture;
pub use error::VirtualError;
pub use gpio::VirtualGpio;
pub use network::MemoryNetwork;

use std::sync::Arc;

use shardhub_app::device::Capabilities;

/// One virtual device set: pins, blob store and camera.
#[derive(Clone, Default)]
pub struct VirtualDevices {
    pub gpio: Arc<VirtualGpio>,
    pub blobs: Arc<MemoryBlobStore>,
    pub capture: Arc<DummyCapture>,
}

impl VirtualDevices {
    /// Runtime capabilities backed by these devices.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            gpio: self.gpio.clone(),
            capture: self.capture.clone(),
            blobs: self.blobs.clone(),
        }
    }
}
