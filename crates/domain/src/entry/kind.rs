//! Entry kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The kind of device an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Raspberry Pi controller; the master exposing raw pin I/O.
    Rpi,
    /// Raspberry Pi camera module.
    Raspicam,
    /// Debounced input with a manual override.
    Switch,
    /// Output with an auto-off timer.
    Light,
    /// Duty-cycle output gated by a tariff input.
    Heater,
    /// Debounced digital input.
    Din,
    /// Digital output.
    Dout,
    /// Generic pin; direction comes from the pin attribute.
    Pin,
}

impl EntryKind {
    pub const ALL: [Self; 8] = [
        Self::Rpi,
        Self::Raspicam,
        Self::Switch,
        Self::Light,
        Self::Heater,
        Self::Din,
        Self::Dout,
        Self::Pin,
    ];

    /// Whether entries of this kind can act as `master` of pin entries.
    #[must_use]
    pub fn exposes_pins(self) -> bool {
        matches!(self, Self::Rpi)
    }

    /// Whether entries of this kind need a `master` reference.
    #[must_use]
    pub fn requires_master(self) -> bool {
        matches!(
            self,
            Self::Switch | Self::Light | Self::Heater | Self::Din | Self::Dout | Self::Pin
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rpi => "rpi",
            Self::Raspicam => "raspicam",
            Self::Switch => "switch",
            Self::Light => "light",
            Self::Heater => "heater",
            Self::Din => "din",
            Self::Dout => "dout",
            Self::Pin => "pin",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_every_kind_from_its_name() {
        for kind in EntryKind::ALL {
            assert_eq!(kind.as_str().parse::<EntryKind>().unwrap(), kind);
        }
    }

    #[test]
    fn should_reject_unknown_kind() {
        let err = "toaster".parse::<EntryKind>().unwrap_err();
        assert_eq!(err, ValidationError::UnknownKind("toaster".to_string()));
    }

    #[test]
    fn should_only_let_rpi_expose_pins() {
        let masters: Vec<_> = EntryKind::ALL
            .into_iter()
            .filter(|k| k.exposes_pins())
            .collect();
        assert_eq!(masters, vec![EntryKind::Rpi]);
    }

    #[test]
    fn should_require_master_for_pin_backed_kinds() {
        assert!(EntryKind::Heater.requires_master());
        assert!(!EntryKind::Rpi.requires_master());
        assert!(!EntryKind::Raspicam.requires_master());
    }
}
