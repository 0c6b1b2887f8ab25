//! Durable entry attributes (`dval`) and their per-kind schemas.
//!
//! Transactions hand attributes around as opaque JSON. They are parsed here,
//! once, into a [`Dval`] whose [`KindSpec`] payload is specific to the entry
//! kind. Parsing is the schema check: required fields, unknown keys, pin
//! ranges and reference well-formedness.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::kind::EntryKind;
use crate::error::ValidationError;
use crate::id::EntryId;

/// Highest GPIO index (BCM numbering) a pin attribute may address.
pub const MAX_PIN_INDEX: u8 = 53;

/// Direction of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDirection {
    Din,
    Dout,
}

/// A pin attribute: `pin = 4` or `pin = { index = 14, type = "dout" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPin")]
pub struct Pin {
    pub index: u8,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub direction: Option<PinDirection>,
}

impl Pin {
    /// The declared direction, or `default` when the attribute omits it.
    #[must_use]
    pub fn direction_or(self, default: PinDirection) -> PinDirection {
        self.direction.unwrap_or(default)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPin {
    Index(u8),
    Detailed {
        index: u8,
        #[serde(rename = "type", default)]
        direction: Option<PinDirection>,
    },
}

impl From<RawPin> for Pin {
    fn from(raw: RawPin) -> Self {
        match raw {
            RawPin::Index(index) => Self {
                index,
                direction: None,
            },
            RawPin::Detailed { index, direction } => Self { index, direction },
        }
    }
}

/// `rpi` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RpiSpec {
    /// Run without hardware; pins are only driven by `emulatePin`.
    #[serde(default)]
    pub dummy: bool,
}

/// Reference to a shard by alias, as in `save = { shard = { alias = "rpiImages" } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardRef {
    pub alias: String,
}

/// Where a camera stores its stills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveTarget {
    pub shard: ShardRef,
}

/// `raspicam` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CameraSpec {
    #[serde(default)]
    pub camera: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save: Option<SaveTarget>,
}

/// `din` / `switch` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InputSpec {
    pub master: EntryId,
    pub pin: Pin,
    /// Milliseconds a new level must hold before it is accepted.
    #[serde(default)]
    pub debounce: u64,
}

/// `dout` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutputSpec {
    pub master: EntryId,
    pub pin: Pin,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub switches: Vec<EntryId>,
}

/// `light` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LightSpec {
    pub master: EntryId,
    pub pin: Pin,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub switches: Vec<EntryId>,
    /// Seconds after the latest `on` at which the light turns itself off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_off: Option<u64>,
}

/// `heater` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeaterSpec {
    pub master: EntryId,
    pub pin: Pin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tariff: Option<EntryId>,
}

/// Generic `pin` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PinSpec {
    pub master: EntryId,
    pub pin: Pin,
}

/// Kind-specific attribute payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KindSpec {
    Rpi(RpiSpec),
    Raspicam(CameraSpec),
    Switch(InputSpec),
    Din(InputSpec),
    Light(LightSpec),
    Heater(HeaterSpec),
    Dout(OutputSpec),
    Pin(PinSpec),
}

/// A weak, by-id reference from one entry to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    pub field: &'static str,
    pub target: &'a EntryId,
}

impl KindSpec {
    fn parse(kind: EntryKind, mut attrs: Map<String, Value>) -> Result<Self, ValidationError> {
        if matches!(kind, EntryKind::Dout | EntryKind::Light) {
            merge_single_switch(&mut attrs);
        }
        let value = Value::Object(attrs);
        let invalid = |err: serde_json::Error| ValidationError::InvalidAttributes {
            kind,
            reason: err.to_string(),
        };
        let spec = match kind {
            EntryKind::Rpi => Self::Rpi(serde_json::from_value(value).map_err(invalid)?),
            EntryKind::Raspicam => Self::Raspicam(serde_json::from_value(value).map_err(invalid)?),
            EntryKind::Switch => Self::Switch(serde_json::from_value(value).map_err(invalid)?),
            EntryKind::Din => Self::Din(serde_json::from_value(value).map_err(invalid)?),
            EntryKind::Light => Self::Light(serde_json::from_value(value).map_err(invalid)?),
            EntryKind::Heater => Self::Heater(serde_json::from_value(value).map_err(invalid)?),
            EntryKind::Dout => Self::Dout(serde_json::from_value(value).map_err(invalid)?),
            EntryKind::Pin => Self::Pin(serde_json::from_value(value).map_err(invalid)?),
        };
        spec.check(kind)?;
        Ok(spec)
    }

    fn check(&self, kind: EntryKind) -> Result<(), ValidationError> {
        if let Some(pin) = self.pin()
            && pin.index > MAX_PIN_INDEX
        {
            return Err(ValidationError::PinOutOfRange(pin.index));
        }
        for reference in self.references() {
            if reference.target.is_empty() {
                return Err(ValidationError::InvalidAttributes {
                    kind,
                    reason: format!("`{}` must name an entry", reference.field),
                });
            }
        }
        match self {
            Self::Light(spec) if spec.auto_off == Some(0) => {
                Err(ValidationError::InvalidAttributes {
                    kind,
                    reason: "`autoOff` must be positive".to_string(),
                })
            }
            Self::Raspicam(CameraSpec {
                save: Some(target), ..
            }) if target.shard.alias.is_empty() => Err(ValidationError::EmptyAlias),
            _ => Ok(()),
        }
    }

    /// The `master` reference, for pin-backed kinds.
    #[must_use]
    pub fn master(&self) -> Option<&EntryId> {
        match self {
            Self::Rpi(_) | Self::Raspicam(_) => None,
            Self::Switch(spec) | Self::Din(spec) => Some(&spec.master),
            Self::Light(spec) => Some(&spec.master),
            Self::Heater(spec) => Some(&spec.master),
            Self::Dout(spec) => Some(&spec.master),
            Self::Pin(spec) => Some(&spec.master),
        }
    }

    /// The pin attribute, for pin-backed kinds.
    #[must_use]
    pub fn pin(&self) -> Option<Pin> {
        match self {
            Self::Rpi(_) | Self::Raspicam(_) => None,
            Self::Switch(spec) | Self::Din(spec) => Some(spec.pin),
            Self::Light(spec) => Some(spec.pin),
            Self::Heater(spec) => Some(spec.pin),
            Self::Dout(spec) => Some(spec.pin),
            Self::Pin(spec) => Some(spec.pin),
        }
    }

    /// Effective direction of the pin, using the kind's natural default.
    #[must_use]
    pub fn pin_direction(&self) -> Option<PinDirection> {
        let default = match self {
            Self::Rpi(_) | Self::Raspicam(_) => return None,
            Self::Switch(_) | Self::Din(_) | Self::Pin(_) => PinDirection::Din,
            Self::Light(_) | Self::Heater(_) | Self::Dout(_) => PinDirection::Dout,
        };
        self.pin().map(|pin| pin.direction_or(default))
    }

    /// All weak references to other entries, `master` first.
    #[must_use]
    pub fn references(&self) -> Vec<Reference<'_>> {
        let mut refs: Vec<Reference<'_>> = self
            .master()
            .map(|target| Reference {
                field: "master",
                target,
            })
            .into_iter()
            .collect();
        match self {
            Self::Light(LightSpec { switches, .. }) | Self::Dout(OutputSpec { switches, .. }) => {
                refs.extend(switches.iter().map(|target| Reference {
                    field: "switches",
                    target,
                }));
            }
            Self::Heater(HeaterSpec {
                tariff: Some(target),
                ..
            }) => refs.push(Reference {
                field: "tariff",
                target,
            }),
            _ => {}
        }
        refs
    }
}

/// Accept `switch = "id"` as shorthand for `switches = ["id"]`.
fn merge_single_switch(attrs: &mut Map<String, Value>) {
    let Some(single) = attrs.remove("switch") else {
        return;
    };
    match attrs.get_mut("switches") {
        Some(Value::Array(list)) => list.insert(0, single),
        _ => {
            attrs.insert("switches".to_string(), Value::Array(vec![single]));
        }
    }
}

/// Durable attributes of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dval {
    /// Human-readable alias; defaults to the entry id.
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub spec: KindSpec,
}

impl Dval {
    /// Parse and validate raw attributes for an entry of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the attributes are not an object,
    /// a required field is missing or mistyped, a pin is out of range, or a
    /// reference is empty.
    pub fn parse(id: &EntryId, kind: EntryKind, attrs: &Value) -> Result<Self, ValidationError> {
        let mut map = match attrs {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(ValidationError::InvalidAttributes {
                    kind,
                    reason: format!("expected an object, got {other}"),
                });
            }
        };

        let alias = match map.remove("alias") {
            None | Some(Value::Null) => id.to_string(),
            Some(Value::String(alias)) if alias.is_empty() => {
                return Err(ValidationError::EmptyAlias);
            }
            Some(Value::String(alias)) => alias,
            Some(other) => {
                return Err(ValidationError::InvalidAttributes {
                    kind,
                    reason: format!("`alias` must be a string, got {other}"),
                });
            }
        };
        let name = match map.remove("name") {
            Some(Value::String(name)) => Some(name),
            _ => None,
        };

        let spec = KindSpec::parse(kind, map)?;
        if spec.master() == Some(id) {
            return Err(ValidationError::MasterCycle(id.clone()));
        }

        Ok(Self { alias, name, spec })
    }
}
