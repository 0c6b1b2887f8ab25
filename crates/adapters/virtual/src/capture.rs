//! Dummy camera.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use shardhub_app::ports::{ImageCapture, PortError};

use crate::error::VirtualError;

/// JPEG start/end markers around the camera number.
const STILL: [u8; 2] = [0xff, 0xd8];
const END: [u8; 2] = [0xff, 0xd9];

/// Produces a fixed payload per camera.
#[derive(Default)]
pub struct DummyCapture {
    detached: AtomicBool,
}

impl DummyCapture {
    /// Simulate an unplugged camera module.
    pub fn set_detached(&self, detached: bool) {
        self.detached.store(detached, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageCapture for DummyCapture {
    async fn still(&self, camera: u8) -> Result<Vec<u8>, PortError> {
        if self.detached.load(Ordering::SeqCst) {
            return Err(VirtualError::CameraMissing(camera).into());
        }
        let mut image = STILL.to_vec();
        image.push(camera);
        image.extend_from_slice(&END);
        Ok(image)
    }
}
