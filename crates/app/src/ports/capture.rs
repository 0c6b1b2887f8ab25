//! Image capture port: takes a still with a camera module.

use async_trait::async_trait;

use super::PortError;

#[async_trait]
pub trait ImageCapture: Send + Sync {
    /// Capture one still from camera `camera`, returning the encoded image.
    ///
    /// # Errors
    ///
    /// Returns the capture failure (missing camera, tool exit status, …).
    async fn still(&self, camera: u8) -> Result<Vec<u8>, PortError>;
}
