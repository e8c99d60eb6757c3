//! Point-in-time capture of an entity's numeric attributes.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    scene::{AttributeRef, AttributeSource, AttributeValue, RawValue, SceneHost},
    EngineConfig,
};

/// Shape of a captured attribute, decided once at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Scalar,
    /// One component of a vector or array property.
    VectorComponent(usize),
}

/// A single mappable scalar discovered on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    /// Unique name within a snapshot, `{property}_{index}` for components.
    pub name: String,
    /// Name of the owning property on the entity.
    pub property: String,
    pub kind: AttributeKind,
    pub source: AttributeSource,
    pub value: AttributeValue,
}

impl AttributeRecord {
    pub fn target(&self) -> AttributeRef {
        AttributeRef {
            property: self.property.clone(),
            source: self.source,
            index: match self.kind {
                AttributeKind::Scalar => None,
                AttributeKind::VectorComponent(index) => Some(index),
            },
        }
    }

    /// Converts a mapped output into the value written back to the host.
    /// Built-in integer scalars are truncated toward zero, everything else is a float.
    pub fn coerce(&self, value: f64) -> AttributeValue {
        match (self.source, self.kind, self.value) {
            (AttributeSource::BuiltIn, AttributeKind::Scalar, AttributeValue::Int(_)) => {
                AttributeValue::Int(value.trunc() as i64)
            }
            _ => AttributeValue::Float(value),
        }
    }
}

/// Insertion-ordered set of records keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSnapshot {
    records: Vec<AttributeRecord>,
    index: HashMap<String, usize>,
}

impl AttributeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record. A record with an existing name replaces the old one in place.
    pub fn insert(&mut self, record: AttributeRecord) {
        match self.index.get(&record.name) {
            Some(&position) => self.records[position] = record,
            None => {
                self.index.insert(record.name.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeRecord> {
        self.index.get(name).map(|&position| &self.records[position])
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<AttributeRecord> for AttributeSnapshot {
    fn from_iter<I: IntoIterator<Item = AttributeRecord>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for record in iter {
            snapshot.insert(record);
        }
        snapshot
    }
}

/// An attribute set that was skipped because it exceeded the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow {
    pub source: AttributeSource,
    pub count: usize,
}

/// Result of one capture: the snapshot plus any sets that were too large.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    pub snapshot: AttributeSnapshot,
    pub overflow: Vec<Overflow>,
}

impl Capture {
    /// Human readable capacity error, if any set was skipped.
    pub fn overflow_message(&self) -> Option<String> {
        if self.overflow.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .overflow
            .iter()
            .map(|o| format!("{:?} ({} attributes)", o.source, o.count))
            .collect();
        Some(format!("too many properties: {}", parts.join(", ")))
    }
}

/// Walks an entity's built-in and custom attribute sets.
#[derive(Debug, Clone)]
pub struct AttributeSnapshotter {
    ceiling: usize,
    max_components: usize,
    skip: HashSet<String>,
}

impl Default for AttributeSnapshotter {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl AttributeSnapshotter {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            ceiling: config.attribute_ceiling,
            max_components: config.max_vector_components,
            skip: config.skip_attributes.iter().cloned().collect(),
        }
    }

    /// Captures the entity. `None` yields an empty capture.
    ///
    /// Custom properties are scanned after built-in ones, so a custom record
    /// replaces a built-in record of the same name.
    pub fn capture(&self, host: &dyn SceneHost, entity: Option<&str>) -> Capture {
        let mut capture = Capture::default();
        let Some(entity) = entity else {
            return capture;
        };

        for source in [AttributeSource::BuiltIn, AttributeSource::Custom] {
            let names = match host.attribute_names(entity, source) {
                Ok(names) => names,
                Err(err) => {
                    warn!(entity, ?source, %err, "failed to list attributes");
                    continue;
                }
            };

            if names.len() > self.ceiling {
                warn!(entity, ?source, count = names.len(), ceiling = self.ceiling, "too many properties, skipping set");
                capture.overflow.push(Overflow {
                    source,
                    count: names.len(),
                });
                continue;
            }

            for name in names {
                if self.skip.contains(&name) {
                    continue;
                }
                match host.read_attribute(entity, source, &name) {
                    Ok(value) => self.collect(&mut capture.snapshot, source, &name, value),
                    Err(err) => warn!(entity, attribute = %name, %err, "failed to read attribute"),
                }
            }
        }

        capture
    }

    fn collect(
        &self,
        snapshot: &mut AttributeSnapshot,
        source: AttributeSource,
        property: &str,
        value: RawValue,
    ) {
        let scalar = |value| AttributeRecord {
            name: property.to_string(),
            property: property.to_string(),
            kind: AttributeKind::Scalar,
            source,
            value,
        };

        match value {
            RawValue::Int(v) => snapshot.insert(scalar(AttributeValue::Int(v))),
            RawValue::Float(v) => snapshot.insert(scalar(AttributeValue::Float(v))),
            RawValue::Vector(components) | RawValue::Array(components) => {
                if components.len() > self.max_components {
                    debug!(property, len = components.len(), "attribute too large, skipping");
                    return;
                }
                for (index, component) in components.into_iter().enumerate() {
                    let name = format!("{property}_{index}");
                    if self.skip.contains(&name) {
                        continue;
                    }
                    snapshot.insert(AttributeRecord {
                        name,
                        property: property.to_string(),
                        kind: AttributeKind::VectorComponent(index),
                        source,
                        value: AttributeValue::Float(component),
                    });
                }
            }
            RawValue::Other(type_name) => trace!(property, type_name = %type_name, "unsupported type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scene::{EntityId, MemoryEntity, MemoryScene},
        BindingError, Result,
    };

    fn scene() -> MemoryScene {
        let mut scene = MemoryScene::new();
        scene.insert_entity(
            "Cube",
            MemoryEntity::default()
                .with_built_in("location", RawValue::Vector(vec![1.0, 2.0, 3.0]))
                .with_built_in("pass_index", RawValue::Int(4))
                .with_built_in("name", RawValue::Other("str".into()))
                .with_built_in("matrix", RawValue::Vector(vec![0.0; 16]))
                .with_custom("weights", RawValue::Array(vec![0.1, 0.2]))
                .with_custom("pass_index", RawValue::Float(9.0)),
        );
        scene
    }

    #[test]
    fn captures_scalars_and_components_in_order() {
        let capture = AttributeSnapshotter::default().capture(&scene(), Some("Cube"));
        let names: Vec<&str> = capture.snapshot.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["location_0", "location_1", "location_2", "pass_index", "weights_0", "weights_1"]
        );

        let loc_y = capture.snapshot.get("location_1").unwrap();
        assert_eq!(loc_y.kind, AttributeKind::VectorComponent(1));
        assert_eq!(loc_y.value, AttributeValue::Float(2.0));
        assert!(capture.overflow.is_empty());
    }

    #[test]
    fn custom_property_overwrites_builtin_with_same_name() {
        let capture = AttributeSnapshotter::default().capture(&scene(), Some("Cube"));
        let record = capture.snapshot.get("pass_index").unwrap();
        assert_eq!(record.source, AttributeSource::Custom);
        assert_eq!(record.value, AttributeValue::Float(9.0));
    }

    #[test]
    fn no_entity_gives_empty_capture() {
        let capture = AttributeSnapshotter::default().capture(&scene(), None);
        assert!(capture.snapshot.is_empty());
    }

    #[test]
    fn skip_list_matches_record_names() {
        let config = EngineConfig {
            skip_attributes: vec!["location_2".into(), "pass_index".into()],
            ..EngineConfig::default()
        };
        let capture = AttributeSnapshotter::from_config(&config).capture(&scene(), Some("Cube"));
        assert!(capture.snapshot.get("location_2").is_none());
        assert!(capture.snapshot.get("location_1").is_some());
        assert!(capture.snapshot.get("pass_index").is_none());
    }

    #[test]
    fn oversized_set_is_skipped_without_aborting_the_other() {
        let config = EngineConfig {
            attribute_ceiling: 3,
            ..EngineConfig::default()
        };
        let capture = AttributeSnapshotter::from_config(&config).capture(&scene(), Some("Cube"));
        assert_eq!(
            capture.overflow,
            vec![Overflow {
                source: AttributeSource::BuiltIn,
                count: 4
            }]
        );
        assert!(capture.snapshot.get("weights_1").is_some());
        assert!(capture.overflow_message().unwrap().contains("too many properties"));
    }

    struct BrokenRead {
        inner: MemoryScene,
        broken: &'static str,
    }

    impl SceneHost for BrokenRead {
        fn selected_entities(&self) -> Vec<EntityId> {
            self.inner.selected_entities()
        }
        fn attribute_names(&self, entity: &str, source: AttributeSource) -> Result<Vec<String>> {
            self.inner.attribute_names(entity, source)
        }
        fn read_attribute(&self, entity: &str, source: AttributeSource, name: &str) -> Result<RawValue> {
            if name == self.broken {
                return Err(BindingError::msg("introspection failed"));
            }
            self.inner.read_attribute(entity, source, name)
        }
        fn write_attribute(&mut self, entity: &str, target: &AttributeRef, value: AttributeValue) -> Result<()> {
            self.inner.write_attribute(entity, target, value)
        }
        fn insert_keyframe(&mut self, entity: &str, target: &AttributeRef) -> Result<()> {
            self.inner.insert_keyframe(entity, target)
        }
        fn select_only(&mut self, entities: &[EntityId]) -> Result<()> {
            self.inner.select_only(entities)
        }
        fn current_frame(&self) -> i64 {
            self.inner.current_frame()
        }
        fn set_current_frame(&mut self, frame: i64) -> Result<()> {
            self.inner.set_current_frame(frame)
        }
        fn request_redraw(&mut self) {}
    }

    #[test]
    fn failing_attribute_is_dropped_alone() {
        let host = BrokenRead {
            inner: scene(),
            broken: "location",
        };
        let capture = AttributeSnapshotter::default().capture(&host, Some("Cube"));
        assert!(capture.snapshot.get("location_0").is_none());
        assert!(capture.snapshot.get("weights_0").is_some());
    }

    #[test]
    fn integer_builtins_are_truncated_on_write() {
        let capture = AttributeSnapshotter::default().capture(&scene(), Some("Cube"));
        let weight = capture.snapshot.get("weights_0").unwrap();
        assert_eq!(weight.coerce(2.7), AttributeValue::Float(2.7));

        let record = AttributeRecord {
            name: "pass_index".into(),
            property: "pass_index".into(),
            kind: AttributeKind::Scalar,
            source: AttributeSource::BuiltIn,
            value: AttributeValue::Int(1),
        };
        assert_eq!(record.coerce(2.7), AttributeValue::Int(2));
        assert_eq!(record.target().index, None);
    }
}
