//! Differential change detection between consecutive snapshots.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    mapping::PropertyMapping,
    scene::EntityId,
    snapshot::{AttributeRecord, AttributeSnapshot},
};

/// An attribute that changed while the engine was listening, waiting to be
/// calibrated and bound to a control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMapping {
    pub record: AttributeRecord,
    pub min: f64,
    pub max: f64,
}

impl PendingMapping {
    pub fn new(record: AttributeRecord) -> Self {
        Self {
            record,
            min: 0.0,
            max: 0.0,
        }
    }

    /// Turns the candidate into a permanent mapping; omitted bounds stay 0.
    pub fn finalize(self, min: Option<f64>, max: Option<f64>) -> PropertyMapping {
        PropertyMapping {
            attribute: self.record,
            min: min.unwrap_or(self.min),
            max: max.unwrap_or(self.max),
        }
    }
}

/// First record of `current`, in insertion order, whose value differs exactly
/// from the record of the same name in `previous`. Names missing from
/// `previous` are not changes.
pub fn first_change<'a>(
    previous: &AttributeSnapshot,
    current: &'a AttributeSnapshot,
) -> Option<&'a AttributeRecord> {
    current.iter().find(|record| match previous.get(&record.name) {
        Some(old) => old.value != record.value,
        None => {
            trace!(attribute = %record.name, "not in previous snapshot, skipping compare");
            false
        }
    })
}

/// Stateless form of the detector: an entity switch is never a change.
pub fn detect_change(
    previous: &AttributeSnapshot,
    current: &AttributeSnapshot,
    same_entity: bool,
) -> Option<PendingMapping> {
    if !same_entity {
        return None;
    }
    first_change(previous, current).cloned().map(PendingMapping::new)
}

/// Keeps the previous snapshot between ticks.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    previous: Option<(EntityId, AttributeSnapshot)>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `current` with the stored snapshot and stores `current` as the
    /// new baseline, whether or not a change was found.
    pub fn detect(&mut self, entity: &str, current: AttributeSnapshot) -> Option<PendingMapping> {
        let same_entity = matches!(&self.previous, Some((id, _)) if id == entity);
        let change = match &self.previous {
            Some((_, previous)) => detect_change(previous, &current, same_entity),
            None => None,
        };
        if !same_entity {
            debug!(entity, "entity changed, re-baselining");
        }
        self.previous = Some((entity.to_string(), current));
        change
    }

    /// Forgets the baseline so the next snapshot is stored without comparing.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn baseline(&self) -> Option<&AttributeSnapshot> {
        self.previous.as_ref().map(|(_, snapshot)| snapshot)
    }
}
