//! Entry: the addressable, state-holding unit of a shard.
//!
//! An entry represents one device or device aspect (a controller, an input
//! pin, a light, a camera). It carries durable attributes ([`Dval`]) fixed at
//! commit time and a transient [`Cache`] rewritten by its behavior.
//!
//! References to other entries (`master`, `switches`, `tariff`) are plain ids
//! resolved against the owning shard on demand.

mod attributes;
mod cache;
mod kind;

pub use attributes::{
    CameraSpec, Dval, HeaterSpec, InputSpec, KindSpec, LightSpec, MAX_PIN_INDEX, OutputSpec, Pin,
    PinDirection, PinSpec, Reference, RpiSpec, SaveTarget, ShardRef,
};
pub use cache::Cache;
pub use kind::EntryKind;

use serde::Serialize;

use crate::commit::Revision;
use crate::error::ValidationError;
use crate::id::EntryId;
use crate::state::SubjectState;
use crate::time::{Timestamp, now};

/// A single addressable device entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub state: SubjectState,
    pub dval: Dval,
    pub cache: Cache,
    /// Revision of the change that created this entry.
    pub revision: Revision,
    pub last_changed: Timestamp,
}

impl Entry {
    /// Build an entry in [`SubjectState::Init`] from raw attributes.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyId`] for an empty id, or any error
    /// from [`Dval::parse`].
    pub fn new(
        id: EntryId,
        kind: EntryKind,
        attrs: &serde_json::Value,
    ) -> Result<Self, ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        let dval = Dval::parse(&id, kind, attrs)?;
        let cache = Cache::initial(&dval.spec);
        Ok(Self {
            id,
            kind,
            state: SubjectState::Init,
            dval,
            cache,
            revision: Revision::ZERO,
            last_changed: now(),
        })
    }

    #[must_use]
    pub fn master(&self) -> Option<&EntryId> {
        self.dval.spec.master()
    }

    #[must_use]
    pub fn references(&self) -> Vec<Reference<'_>> {
        self.dval.spec.references()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Logical active/high reading of the entry.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cache.is_active()
    }

    /// Replace the cache, bumping `last_changed` only when the value differs.
    ///
    /// Returns whether anything changed.
    pub fn update_cache(&mut self, cache: Cache, ts: Timestamp) -> bool {
        if self.cache == cache {
            return false;
        }
        self.cache = cache;
        self.last_changed = ts;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn switch() -> Entry {
        Entry::new(
            EntryId::from("switch1"),
            EntryKind::Switch,
            &json!({"master": "rpi", "pin": 4}),
        )
        .unwrap()
    }

    #[test]
    fn should_start_in_init_state() {
        let entry = switch();
        assert_eq!(entry.state, SubjectState::Init);
        assert_eq!(entry.revision, Revision::ZERO);
    }

    #[test]
    fn should_reject_empty_id() {
        let err = Entry::new(EntryId::from(""), EntryKind::Rpi, &json!({})).unwrap_err();
        assert_eq!(err, ValidationError::EmptyId);
    }

    #[test]
    fn should_expose_master_reference() {
        assert_eq!(switch().master(), Some(&EntryId::from("rpi")));
    }

    #[test]
    fn should_report_change_only_when_cache_differs() {
        let mut entry = switch();
        let ts = now();
        assert!(entry.update_cache(Cache::Input { value: Some(true) }, ts));
        assert!(!entry.update_cache(Cache::Input { value: Some(true) }, ts));
        assert!(entry.is_active());
    }

    #[test]
    fn should_serialize_dval_flat() {
        let json = serde_json::to_value(switch()).unwrap();
        assert_eq!(json["dval"]["alias"], "switch1");
        assert_eq!(json["dval"]["master"], "rpi");
        assert_eq!(json["dval"]["pin"]["index"], 4);
    }
}
