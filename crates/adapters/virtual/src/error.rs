//! Errors raised by the virtual devices.

/// Failure of a virtual capability.
#[derive(Debug, thiserror::Error)]
pub enum VirtualError {
    #[error("gpio fault injected on pin {0}")]
    PinFault(u8),

    #[error("camera {0} not detected")]
    CameraMissing(u8),

    #[error("no route to `{0}`")]
    NoRoute(String),

    #[error("`{0}` is offline")]
    Offline(String),
}
