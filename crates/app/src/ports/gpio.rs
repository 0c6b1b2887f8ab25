//! GPIO port: raw digital pin access supplied by a hardware layer.

use tokio::sync::broadcast;

use super::PortError;

/// A level transition observed on a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub index: u8,
    pub level: bool,
}

/// Digital pin capability.
///
/// Reads and writes are synchronous register accesses; level changes are
/// delivered through [`subscribe`](Self::subscribe).
pub trait Gpio: Send + Sync {
    /// Current level of pin `index`.
    ///
    /// # Errors
    ///
    /// Returns the driver failure.
    fn read_pin(&self, index: u8) -> Result<bool, PortError>;

    /// Drive pin `index` to `level`.
    ///
    /// # Errors
    ///
    /// Returns the driver failure.
    fn write_pin(&self, index: u8, level: bool) -> Result<(), PortError>;

    /// Drive pin `index` with a duty cycle in `[0, 1]`.
    ///
    /// Drivers without PWM fall back to on/off.
    ///
    /// # Errors
    ///
    /// Returns the driver failure.
    fn write_duty(&self, index: u8, duty: f64) -> Result<(), PortError> {
        self.write_pin(index, duty > 0.0)
    }

    /// Stream of level changes on every input pin.
    fn subscribe(&self) -> broadcast::Receiver<PinEvent>;
}
