//! Space descriptor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, ValidationError};

/// Static description of a space: its name, home instance and peers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpaceDescriptor {
    pub name: String,
    /// Instance holding canonical state for the space.
    #[serde(default)]
    pub home: String,
    /// Peer name → connection target (e.g. `tcp://10.0.0.8:4431`).
    #[serde(default)]
    pub peers: BTreeMap<String, String>,
}

impl SpaceDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, home: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            home: home.into(),
            peers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_peer(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.peers.insert(name.into(), target.into());
        self
    }

    /// Whether `instance` is the space's home.
    #[must_use]
    pub fn is_home(&self, instance: &str) -> bool {
        self.home == instance
    }

    /// Check descriptor invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when the name is empty.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyAlias.into());
        }
        Ok(())
    }
}
