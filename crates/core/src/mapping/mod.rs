use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    midi::ControlId,
    scene::{AttributeRef, AttributeValue},
    snapshot::AttributeRecord,
    BindingError, Result,
};

/// Largest value a 7-bit MIDI data byte can carry.
pub const MIDI_VALUE_MAX: f64 = 127.0;

/// Linear remap of a 7-bit MIDI value onto `[min, max]`.
///
/// `min == max` gives a constant and `min > max` a decreasing mapping.
pub fn map_range(raw: u8, min: f64, max: f64) -> f64 {
    ((max - min) / MIDI_VALUE_MAX) * f64::from(raw) + min
}

/// Calibrated binding of one control to one entity attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMapping {
    pub attribute: AttributeRecord,
    pub min: f64,
    pub max: f64,
}

impl PropertyMapping {
    pub fn output(&self, raw: u8) -> f64 {
        map_range(raw, self.min, self.max)
    }
}

/// Concrete value routed to an attribute of every selected entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeWrite {
    pub target: AttributeRef,
    pub value: AttributeValue,
}

/// Control → attribute fan-out table plus the user labels of the controls.
///
/// Labels live independently of mappings; a label without a mapping is kept.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MappingTable {
    mappings: BTreeMap<ControlId, Vec<PropertyMapping>>,
    names: BTreeMap<ControlId, String>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        mappings: BTreeMap<ControlId, Vec<PropertyMapping>>,
        names: BTreeMap<ControlId, String>,
    ) -> Self {
        Self { mappings, names }
    }

    pub fn mappings(&self) -> &BTreeMap<ControlId, Vec<PropertyMapping>> {
        &self.mappings
    }

    pub fn names(&self) -> &BTreeMap<ControlId, String> {
        &self.names
    }

    pub fn is_mapped(&self, control: ControlId) -> bool {
        self.mappings.contains_key(&control)
    }

    pub fn get(&self, control: ControlId) -> &[PropertyMapping] {
        self.mappings.get(&control).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every mapping of every control, in control order.
    pub fn all(&self) -> impl Iterator<Item = (ControlId, &PropertyMapping)> {
        self.mappings
            .iter()
            .flat_map(|(control, list)| list.iter().map(move |mapping| (*control, mapping)))
    }

    pub fn len(&self) -> usize {
        self.mappings.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Appends a mapping, creating the control's list when absent.
    pub fn push(&mut self, control: ControlId, mapping: PropertyMapping) {
        self.mappings.entry(control).or_default().push(mapping);
    }

    pub fn name(&self, control: ControlId) -> Option<&str> {
        self.names.get(&control).map(String::as_str)
    }

    pub fn set_name(&mut self, control: ControlId, label: impl Into<String>) {
        self.names.insert(control, label.into());
    }

    /// Re-calibrates a single entry.
    pub fn update(&mut self, control: ControlId, index: usize, min: f64, max: f64) -> Result<()> {
        let mapping = self
            .mappings
            .get_mut(&control)
            .and_then(|list| list.get_mut(index))
            .ok_or(BindingError::UnknownMapping { control, index })?;
        mapping.min = min;
        mapping.max = max;
        Ok(())
    }

    /// Removes a single entry; the control disappears with its last entry.
    pub fn remove(&mut self, control: ControlId, index: usize) -> Result<PropertyMapping> {
        let list = self
            .mappings
            .get_mut(&control)
            .filter(|list| index < list.len())
            .ok_or(BindingError::UnknownMapping { control, index })?;
        let removed = list.remove(index);
        if list.is_empty() {
            self.mappings.remove(&control);
        }
        Ok(removed)
    }

    /// Remaps `raw` through every mapping of `control`, in stored order.
    pub fn evaluate(&self, control: ControlId, raw: u8) -> Vec<AttributeWrite> {
        self.get(control)
            .iter()
            .map(|mapping| AttributeWrite {
                target: mapping.attribute.target(),
                value: mapping.attribute.coerce(mapping.output(raw)),
            })
            .collect()
    }
}
