//! Transient runtime state of an entry (`cache`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::attributes::{KindSpec, PinDirection};
use crate::time::Timestamp;

/// Kind-specific runtime value, rewritten by device behaviors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Cache {
    /// Pin controller: last level seen on every pin that changed.
    ///
    /// Pins travel as a list of `{index, level}` objects.
    Controller {
        dummy: bool,
        #[serde(with = "pin_levels")]
        pins: BTreeMap<u8, bool>,
    },
    /// Debounced input; `None` until the first stable reading.
    Input { value: Option<bool> },
    /// Digital output level.
    Output { value: bool },
    Light { on: bool },
    /// Requested and actually driven duty cycle.
    Heater {
        requested: f64,
        driven: f64,
        tariff_high: bool,
    },
    Camera {
        last_image: Option<String>,
        taken_at: Option<Timestamp>,
    },
}

impl Cache {
    /// Starting value for a freshly committed entry.
    #[must_use]
    pub fn initial(spec: &KindSpec) -> Self {
        match spec {
            KindSpec::Rpi(rpi) => Self::Controller {
                dummy: rpi.dummy,
                pins: BTreeMap::new(),
            },
            KindSpec::Raspicam(_) => Self::Camera {
                last_image: None,
                taken_at: None,
            },
            KindSpec::Switch(_) | KindSpec::Din(_) => Self::Input { value: None },
            KindSpec::Light(_) => Self::Light { on: false },
            KindSpec::Heater(_) => Self::Heater {
                requested: 0.0,
                driven: 0.0,
                tariff_high: false,
            },
            KindSpec::Dout(_) => Self::Output { value: false },
            KindSpec::Pin(_) => match spec.pin_direction() {
                Some(PinDirection::Dout) => Self::Output { value: false },
                _ => Self::Input { value: None },
            },
        }
    }

    /// Logical "active" reading used by switch aggregation and tariff gating.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            Self::Input { value } => value.unwrap_or(false),
            Self::Output { value } => *value,
            Self::Light { on } => *on,
            Self::Heater { driven, .. } => *driven > 0.0,
            Self::Controller { .. } | Self::Camera { .. } => false,
        }
    }
}

mod pin_levels {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct PinLevel {
        index: u8,
        level: bool,
    }

    pub(super) fn serialize<S: Serializer>(
        pins: &BTreeMap<u8, bool>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            pins.iter()
                .map(|(&index, &level)| PinLevel { index, level }),
        )
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<u8, bool>, D::Error> {
        let levels = Vec::<PinLevel>::deserialize(deserializer)?;
        Ok(levels
            .into_iter()
            .map(|pin| (pin.index, pin.level))
            .collect())
    }
}
