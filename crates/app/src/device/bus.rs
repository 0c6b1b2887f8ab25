//! Pin bus: fan-out of pin levels from one controller to its dependents.
//!
//! A bus exists per (shard, controller entry). Hardware events are forwarded
//! onto it by the controller behavior; `emulatePin` injects synthetic levels
//! that also win over the hardware on subsequent reads.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::ports::{Gpio, PinEvent, PortError};

const BUS_CAPACITY: usize = 64;

#[derive(Clone)]
pub(crate) struct PinBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    gpio: Arc<dyn Gpio>,
    events: broadcast::Sender<PinEvent>,
    emulated: Mutex<BTreeMap<u8, bool>>,
}

impl PinBus {
    pub(crate) fn new(gpio: Arc<dyn Gpio>) -> Self {
        let (events, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                gpio,
                events,
                emulated: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.inner.events.subscribe()
    }

    /// Raw events of the underlying GPIO.
    pub(crate) fn hardware(&self) -> broadcast::Receiver<PinEvent> {
        self.inner.gpio.subscribe()
    }

    pub(crate) fn publish(&self, event: PinEvent) {
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn read(&self, index: u8) -> Result<bool, PortError> {
        let emulated = self
            .inner
            .emulated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .copied();
        match emulated {
            Some(level) => Ok(level),
            None => self.inner.gpio.read_pin(index),
        }
    }

    pub(crate) fn write(&self, index: u8, level: bool) -> Result<(), PortError> {
        self.inner.gpio.write_pin(index, level)?;
        self.publish(PinEvent { index, level });
        Ok(())
    }

    pub(crate) fn write_duty(&self, index: u8, duty: f64) -> Result<(), PortError> {
        self.inner.gpio.write_duty(index, duty)?;
        self.publish(PinEvent {
            index,
            level: duty > 0.0,
        });
        Ok(())
    }

    /// Inject a synthetic level on `index`.
    pub(crate) fn emulate(&self, index: u8, level: bool) {
        self.inner
            .emulated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, level);
        self.publish(PinEvent { index, level });
    }
}
