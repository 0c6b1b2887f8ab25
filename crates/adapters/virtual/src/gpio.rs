//! Virtual GPIO bank.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

use shardhub_app::ports::{Gpio, PinEvent, PortError};

use crate::error::VirtualError;

const EVENT_CAPACITY: usize = 64;

/// Pins held in memory.
///
/// Writes are recorded but do not echo on [`subscribe`](Gpio::subscribe);
/// only [`set_input`](Self::set_input) produces events, as external wiring
/// would.
pub struct VirtualGpio {
    pins: Mutex<Pins>,
    events: broadcast::Sender<PinEvent>,
}

#[derive(Default)]
struct Pins {
    levels: BTreeMap<u8, bool>,
    duties: BTreeMap<u8, f64>,
    faulty: BTreeSet<u8>,
}

impl Default for VirtualGpio {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pins: Mutex::new(Pins::default()),
            events,
        }
    }
}

impl VirtualGpio {
    fn pins(&self) -> std::sync::MutexGuard<'_, Pins> {
        self.pins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive an input pin from outside; subscribers see the change when the
    /// level actually moves.
    pub fn set_input(&self, index: u8, level: bool) {
        let previous = self.pins().levels.insert(index, level);
        if previous != Some(level) {
            let _ = self.events.send(PinEvent { index, level });
        }
    }

    /// Current level of `index`; unset pins read low.
    #[must_use]
    pub fn level(&self, index: u8) -> bool {
        self.pins().levels.get(&index).copied().unwrap_or(false)
    }

    /// Last duty cycle written to `index`.
    #[must_use]
    pub fn duty(&self, index: u8) -> Option<f64> {
        self.pins().duties.get(&index).copied()
    }

    /// Make every access to `index` fail (or succeed again).
    pub fn set_faulty(&self, index: u8, faulty: bool) {
        let mut pins = self.pins();
        if faulty {
            pins.faulty.insert(index);
        } else {
            pins.faulty.remove(&index);
        }
    }

    fn check(pins: &Pins, index: u8) -> Result<(), PortError> {
        if pins.faulty.contains(&index) {
            return Err(VirtualError::PinFault(index).into());
        }
        Ok(())
    }
}

impl Gpio for VirtualGpio {
    fn read_pin(&self, index: u8) -> Result<bool, PortError> {
        let pins = self.pins();
        Self::check(&pins, index)?;
        Ok(pins.levels.get(&index).copied().unwrap_or(false))
    }

    fn write_pin(&self, index: u8, level: bool) -> Result<(), PortError> {
        self.write_duty(index, if level { 1.0 } else { 0.0 })
    }

    fn write_duty(&self, index: u8, duty: f64) -> Result<(), PortError> {
        let mut pins = self.pins();
        Self::check(&pins, index)?;
        pins.levels.insert(index, duty > 0.0);
        pins.duties.insert(index, duty);
        tracing::debug!(pin = index, duty, "virtual pin written");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.events.subscribe()
    }
}
