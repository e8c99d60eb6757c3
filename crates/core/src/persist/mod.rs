//! JSON document holding every binding table, for files and for the scene.
//!
//! Loading is all-or-nothing: the tables are only touched once the whole
//! document has been validated. Optional sections that are absent leave the
//! corresponding table as it was.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    bindings::{BindingTables, KeyframeBinding, SelectionGroup, SelectionGroups},
    mapping::{MappingTable, PropertyMapping},
    midi::ControlId,
    scene::SceneHost,
    timeline::{FrameControl, FrameStepBinding},
    BindingError, Result,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyframeSection {
    pub controller: Option<ControlId>,
    pub velocity: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSection {
    pub mapping: BTreeMap<ControlId, SelectionGroup>,
    pub velocity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSection {
    pub increase: FrameStepBinding,
    pub decrease: FrameStepBinding,
    pub frame_control_resolution: u32,
    pub timeout: f64,
}

/// On-disk shape of the binding tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_names: Option<BTreeMap<ControlId, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_mapping: Option<BTreeMap<ControlId, Vec<PropertyMapping>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_groups: Option<SelectionSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_keyframe_bind: Option<KeyframeSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_control: Option<FrameSection>,
}

impl BindingDocument {
    /// Captures every table.
    pub fn capture(tables: &BindingTables) -> Self {
        let frames = &tables.frames;
        Self {
            controller_names: Some(tables.mapping.names().clone()),
            controller_mapping: Some(tables.mapping.mappings().clone()),
            selection_groups: Some(SelectionSection {
                mapping: tables.selection.groups().clone(),
                velocity: tables.selection.velocity(),
            }),
            controller_keyframe_bind: Some(KeyframeSection {
                controller: tables.keyframe.control(),
                velocity: tables.keyframe.velocity(),
            }),
            frame_control: Some(FrameSection {
                increase: frames.increase.clone(),
                decrease: frames.decrease.clone(),
                frame_control_resolution: frames.resolution(),
                timeout: frames.timeout_seconds(),
            }),
        }
    }

    /// Replaces the tables with the document's content.
    ///
    /// `controller_names`, `controller_mapping` and `controller_keyframe_bind`
    /// are required; `selection_groups` and `frame_control` are optional.
    pub fn apply(self, tables: &mut BindingTables) -> Result<()> {
        let names = self
            .controller_names
            .ok_or(BindingError::MissingSection("controller_names"))?;
        let mappings = self
            .controller_mapping
            .ok_or(BindingError::MissingSection("controller_mapping"))?;
        let keyframe = self
            .controller_keyframe_bind
            .ok_or(BindingError::MissingSection("controller_keyframe_bind"))?;
        let frames = self
            .frame_control
            .map(|section| {
                FrameControl::from_parts(
                    section.increase,
                    section.decrease,
                    section.frame_control_resolution,
                    section.timeout,
                )
            })
            .transpose()?;

        tables.mapping = MappingTable::from_parts(mappings, names);
        tables.keyframe = KeyframeBinding::from_saved(keyframe.controller, keyframe.velocity);
        if let Some(section) = self.selection_groups {
            tables.selection = SelectionGroups::from_parts(section.mapping, section.velocity);
        }
        if let Some(frames) = frames {
            tables.frames = frames;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Writes the tables to `path`, creating parent directories as needed.
pub fn save_bindings(path: &Path, tables: &BindingTables) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, BindingDocument::capture(tables).to_json()?)?;
    info!(path = %path.display(), "saved bindings");
    Ok(())
}

/// Reads `path` into the tables and returns the parsed document.
pub fn load_bindings(path: &Path, tables: &mut BindingTables) -> Result<BindingDocument> {
    let content = std::fs::read_to_string(path)?;
    let document = BindingDocument::from_json(&content)?;
    document.clone().apply(tables)?;
    info!(path = %path.display(), controls = tables.mapping.mappings().len(), "loaded bindings");
    Ok(document)
}

/// Embeds the tables in the host scene.
pub fn save_to_scene(host: &mut dyn SceneHost, tables: &BindingTables) -> Result<()> {
    let json = serde_json::to_string(&BindingDocument::capture(tables))?;
    host.set_scene_data(json)
}

/// Loads tables embedded in the host scene. Returns `false` if the scene
/// carries no document.
pub fn load_from_scene(host: &dyn SceneHost, tables: &mut BindingTables) -> Result<bool> {
    let Some(content) = host.scene_data() else {
        return Ok(false);
    };
    BindingDocument::from_json(&content)?.apply(tables)?;
    Ok(true)
}
