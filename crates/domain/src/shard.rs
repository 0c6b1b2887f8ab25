//! Shard descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entry::EntryKind;
use crate::error::{HubError, ValidationError};
use crate::id::{EntryId, ShardId};

/// Storage/behavior backend of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardSchema {
    /// Device entries with attached behaviors.
    #[default]
    Control,
    /// Blob sink (image folder); holds no device entries.
    Fs,
}

impl fmt::Display for ShardSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Fs => f.write_str("fs"),
        }
    }
}

impl FromStr for ShardSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control" => Ok(Self::Control),
            "fs" => Ok(Self::Fs),
            other => Err(format!("unknown shard schema `{other}`")),
        }
    }
}

/// Static description of a shard, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub id: ShardId,
    pub alias: String,
    #[serde(default)]
    pub schema: ShardSchema,
    /// Peer holding the canonical copy; `None` when this instance does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
}

impl ShardDescriptor {
    #[must_use]
    pub fn new(id: u32, alias: impl Into<String>, schema: ShardSchema) -> Self {
        Self {
            id: ShardId(id),
            alias: alias.into(),
            schema,
            home: None,
        }
    }

    /// Mark the shard as a replica of the copy held by `peer`.
    #[must_use]
    pub fn homed_on(mut self, peer: impl Into<String>) -> Self {
        self.home = Some(peer.into());
        self
    }

    #[must_use]
    pub fn is_replica(&self) -> bool {
        self.home.is_some()
    }

    /// Check descriptor invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when the alias is empty.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.alias.is_empty() {
            return Err(ValidationError::EmptyAlias.into());
        }
        Ok(())
    }
}

/// One entry to create when a shard is initialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySeed {
    pub id: EntryId,
    pub kind: EntryKind,
    #[serde(default)]
    pub attrs: serde_json::Value,
}

impl EntrySeed {
    #[must_use]
    pub fn new(id: impl Into<EntryId>, kind: EntryKind, attrs: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind,
            attrs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_schema_to_control() {
        let json = r#"{"id": 6, "alias": "rpi"}"#;
        let desc: ShardDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.schema, ShardSchema::Control);
        assert!(!desc.is_replica());
    }

    #[test]
    fn should_mark_replica_when_homed_on_peer() {
        let desc = ShardDescriptor::new(6, "rpi", ShardSchema::Control).homed_on("rpi");
        assert!(desc.is_replica());
        assert_eq!(desc.home.as_deref(), Some("rpi"));
    }

    #[test]
    fn should_reject_empty_alias() {
        let desc = ShardDescriptor::new(7, "", ShardSchema::Fs);
        assert!(matches!(
            desc.validate(),
            Err(HubError::Validation(ValidationError::EmptyAlias))
        ));
    }

    #[test]
    fn should_default_seed_attrs_to_null() {
        let seed: EntrySeed = serde_json::from_str(r#"{"id": "rpi", "kind": "rpi"}"#).unwrap();
        assert_eq!(seed.kind, EntryKind::Rpi);
        assert!(seed.attrs.is_null());
    }

    #[test]
    fn should_parse_schema_names() {
        assert_eq!("fs".parse::<ShardSchema>().unwrap(), ShardSchema::Fs);
        assert!("sql".parse::<ShardSchema>().is_err());
    }
}
