//! Boundary to the scene that owns the entities being driven.
//!
//! The engine never holds entity state itself: it introspects and writes
//! attributes through a [`SceneHost`]. [`MemoryScene`] is a self-contained
//! host used by the command line tool and by the tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{BindingError, Result};

pub type EntityId = String;

/// Which attribute set an attribute was discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeSource {
    /// Attributes defined by the entity type itself (location, scale, ...).
    BuiltIn,
    /// User-defined custom properties.
    Custom,
}

/// An attribute value as reported by host introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawValue {
    Int(i64),
    Float(f64),
    /// Fixed-length numeric vector.
    Vector(Vec<f64>),
    /// Dynamic numeric array (custom properties only).
    Array(Vec<f64>),
    /// Anything else; carries the host's type name for logging.
    Other(String),
}

/// Scalar value captured in a snapshot or written back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
}

impl AttributeValue {
    pub fn as_f64(self) -> f64 {
        match self {
            AttributeValue::Int(v) => v as f64,
            AttributeValue::Float(v) => v,
        }
    }
}

/// Address of a single writable scalar on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRef {
    pub property: String,
    pub source: AttributeSource,
    /// Component index for vector and array properties.
    pub index: Option<usize>,
}

/// The scene the engine reads from and writes to.
///
/// Every method may fail independently; the engine logs the failure and
/// continues with the next item. Implementations must make written values
/// visible to their own observers, the engine does not force refreshes.
pub trait SceneHost {
    fn selected_entities(&self) -> Vec<EntityId>;

    /// Names of the attributes in one attribute set, in the host's order.
    fn attribute_names(&self, entity: &str, source: AttributeSource) -> Result<Vec<String>>;

    fn read_attribute(&self, entity: &str, source: AttributeSource, name: &str)
        -> Result<RawValue>;

    fn write_attribute(
        &mut self,
        entity: &str,
        target: &AttributeRef,
        value: AttributeValue,
    ) -> Result<()>;

    fn insert_keyframe(&mut self, entity: &str, target: &AttributeRef) -> Result<()>;

    /// Deselects everything, then selects exactly `entities`.
    fn select_only(&mut self, entities: &[EntityId]) -> Result<()>;

    fn current_frame(&self) -> i64;

    fn set_current_frame(&mut self, frame: i64) -> Result<()>;

    fn request_redraw(&mut self);

    /// True while the host plays back animation.
    fn is_playing(&self) -> bool {
        false
    }

    /// Binding document embedded in the scene, if any.
    fn scene_data(&self) -> Option<String> {
        None
    }

    fn set_scene_data(&mut self, _data: String) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAttribute {
    pub name: String,
    pub value: RawValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryEntity {
    pub built_in: Vec<MemoryAttribute>,
    pub custom: Vec<MemoryAttribute>,
}

impl MemoryEntity {
    pub fn with_built_in(mut self, name: &str, value: RawValue) -> Self {
        self.set(AttributeSource::BuiltIn, name, value);
        self
    }

    pub fn with_custom(mut self, name: &str, value: RawValue) -> Self {
        self.set(AttributeSource::Custom, name, value);
        self
    }

    /// Inserts or replaces an attribute, keeping the original position on replace.
    pub fn set(&mut self, source: AttributeSource, name: &str, value: RawValue) {
        let set = self.attributes_mut(source);
        match set.iter_mut().find(|attr| attr.name == name) {
            Some(attr) => attr.value = value,
            None => set.push(MemoryAttribute {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn get(&self, source: AttributeSource, name: &str) -> Option<&RawValue> {
        self.attributes(source)
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| &attr.value)
    }

    fn attributes(&self, source: AttributeSource) -> &[MemoryAttribute] {
        match source {
            AttributeSource::BuiltIn => &self.built_in,
            AttributeSource::Custom => &self.custom,
        }
    }

    fn attributes_mut(&mut self, source: AttributeSource) -> &mut Vec<MemoryAttribute> {
        match source {
            AttributeSource::BuiltIn => &mut self.built_in,
            AttributeSource::Custom => &mut self.custom,
        }
    }
}

/// A keyframe recorded by [`MemoryScene::insert_keyframe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub entity: EntityId,
    pub target: AttributeRef,
    pub frame: i64,
    pub value: f64,
}

/// In-memory scene host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryScene {
    pub entities: BTreeMap<EntityId, MemoryEntity>,
    pub selection: Vec<EntityId>,
    pub frame: i64,
    pub playing: bool,
    pub keyframes: Vec<Keyframe>,
    pub scene_data: Option<String>,
    #[serde(skip)]
    pub redraws: usize,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_entity(&mut self, id: &str, entity: MemoryEntity) {
        self.entities.insert(id.to_string(), entity);
    }

    pub fn entity(&self, id: &str) -> Option<&MemoryEntity> {
        self.entities.get(id)
    }

    pub fn entity_mut(&mut self, id: &str) -> Option<&mut MemoryEntity> {
        self.entities.get_mut(id)
    }

    pub fn select(&mut self, ids: &[&str]) {
        self.selection = ids.iter().map(|id| id.to_string()).collect();
    }

    /// Reads one scalar back, resolving vector components.
    pub fn scalar(&self, entity: &str, target: &AttributeRef) -> Option<f64> {
        let value = self.entity(entity)?.get(target.source, &target.property)?;
        match (value, target.index) {
            (RawValue::Int(v), None) => Some(*v as f64),
            (RawValue::Float(v), None) => Some(*v),
            (RawValue::Vector(values) | RawValue::Array(values), Some(index)) => {
                values.get(index).copied()
            }
            _ => None,
        }
    }

    fn missing(entity: &str, target: &AttributeRef) -> BindingError {
        BindingError::MissingAttribute {
            entity: entity.to_string(),
            property: target.property.clone(),
        }
    }
}

impl SceneHost for MemoryScene {
    fn selected_entities(&self) -> Vec<EntityId> {
        self.selection.clone()
    }

    fn attribute_names(&self, entity: &str, source: AttributeSource) -> Result<Vec<String>> {
        let entity = self
            .entity(entity)
            .ok_or_else(|| BindingError::UnknownEntity(entity.to_string()))?;
        Ok(entity
            .attributes(source)
            .iter()
            .map(|attr| attr.name.clone())
            .collect())
    }

    fn read_attribute(
        &self,
        entity: &str,
        source: AttributeSource,
        name: &str,
    ) -> Result<RawValue> {
        let found = self
            .entity(entity)
            .ok_or_else(|| BindingError::UnknownEntity(entity.to_string()))?;
        found
            .get(source, name)
            .cloned()
            .ok_or_else(|| BindingError::MissingAttribute {
                entity: entity.to_string(),
                property: name.to_string(),
            })
    }

    fn write_attribute(
        &mut self,
        entity: &str,
        target: &AttributeRef,
        value: AttributeValue,
    ) -> Result<()> {
        let missing = Self::missing(entity, target);
        let found = self
            .entities
            .get_mut(entity)
            .ok_or_else(|| BindingError::UnknownEntity(entity.to_string()))?;
        let slot = found
            .attributes_mut(target.source)
            .iter_mut()
            .find(|attr| attr.name == target.property)
            .ok_or(missing)?;

        match (&mut slot.value, target.index) {
            (RawValue::Vector(values) | RawValue::Array(values), Some(index)) => {
                let component = values.get_mut(index).ok_or_else(|| Self::missing(entity, target))?;
                *component = value.as_f64();
            }
            (scalar @ (RawValue::Int(_) | RawValue::Float(_)), None) => {
                *scalar = match value {
                    AttributeValue::Int(v) => RawValue::Int(v),
                    AttributeValue::Float(v) => RawValue::Float(v),
                };
            }
            _ => return Err(Self::missing(entity, target)),
        }
        Ok(())
    }

    fn insert_keyframe(&mut self, entity: &str, target: &AttributeRef) -> Result<()> {
        let value = self
            .scalar(entity, target)
            .ok_or_else(|| Self::missing(entity, target))?;
        self.keyframes.push(Keyframe {
            entity: entity.to_string(),
            target: target.clone(),
            frame: self.frame,
            value,
        });
        Ok(())
    }

    fn select_only(&mut self, entities: &[EntityId]) -> Result<()> {
        self.selection.clear();
        for id in entities {
            if self.entities.contains_key(id) {
                self.selection.push(id.clone());
            } else {
                tracing::warn!(entity = %id, "cannot select unknown entity");
            }
        }
        Ok(())
    }

    fn current_frame(&self) -> i64 {
        self.frame
    }

    fn set_current_frame(&mut self, frame: i64) -> Result<()> {
        self.frame = frame;
        Ok(())
    }

    fn request_redraw(&mut self) {
        self.redraws += 1;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn scene_data(&self) -> Option<String> {
        self.scene_data.clone()
    }

    fn set_scene_data(&mut self, data: String) -> Result<()> {
        self.scene_data = Some(data);
        Ok(())
    }
}
