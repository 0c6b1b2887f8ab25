//! Hub: the process context owning every space.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use shardhub_domain::error::{HubError, NotFoundError, ValidationError};
use shardhub_domain::space::SpaceDescriptor;

use crate::space::Space;

/// Explicitly constructed runtime context; built and torn down by the entry
/// point.
#[derive(Debug)]
pub struct Hub {
    instance: String,
    spaces: RwLock<BTreeMap<String, Space>>,
}

impl Hub {
    #[must_use]
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            spaces: RwLock::new(BTreeMap::new()),
        }
    }

    /// Name of this instance.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Create a space from its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] for an invalid descriptor or a space
    /// name already in use.
    pub fn add_space(&self, descriptor: SpaceDescriptor) -> Result<Space, HubError> {
        let mut spaces = self.spaces.write().unwrap_or_else(PoisonError::into_inner);
        if spaces.contains_key(&descriptor.name) {
            return Err(ValidationError::DuplicateSpace(descriptor.name).into());
        }
        let space = Space::new(descriptor, self.instance.clone())?;
        spaces.insert(space.name().to_string(), space.clone());
        tracing::info!(space = %space.name(), home = %space.descriptor().home, "space created");
        Ok(space)
    }

    /// Look up a space by name.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when no space has that name.
    pub fn get_space(&self, name: &str) -> Result<Space, HubError> {
        let spaces = self.spaces.read().unwrap_or_else(PoisonError::into_inner);
        spaces.get(name).cloned().ok_or_else(|| {
            NotFoundError {
                entity: "Space",
                id: name.to_string(),
            }
            .into()
        })
    }

    #[must_use]
    pub fn spaces(&self) -> Vec<Space> {
        let spaces = self.spaces.read().unwrap_or_else(PoisonError::into_inner);
        spaces.values().cloned().collect()
    }

    /// Shut every space down.
    pub fn shutdown(&self) {
        for space in self.spaces() {
            space.shutdown();
        }
        tracing::info!(instance = %self.instance, "hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_find_space_by_name() {
        let hub = Hub::new("rpi");
        hub.add_space(SpaceDescriptor::new("example.org", "player"))
            .unwrap();
        let space = hub.get_space("example.org").unwrap();
        assert_eq!(space.instance(), "rpi");
    }

    #[test]
    fn should_return_not_found_for_unknown_space() {
        let hub = Hub::new("rpi");
        let err = hub.get_space("example.com").unwrap_err();
        assert!(matches!(err, HubError::NotFound(ref e) if e.entity == "Space"));
    }

    #[test]
    fn should_reject_duplicate_space() {
        let hub = Hub::new("rpi");
        hub.add_space(SpaceDescriptor::new("example.org", "player"))
            .unwrap();
        assert!(matches!(
            hub.add_space(SpaceDescriptor::new("example.org", "rpi")),
            Err(HubError::Validation(ValidationError::DuplicateSpace(_)))
        ));
    }
}
