use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Result;

/// How the engine resolves a control id claimed by several binding tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Every binding that claims the control fires, in dispatch order.
    #[default]
    Shared,
    /// The first binding in dispatch order consumes the message.
    Exclusive,
}

/// Top-level configuration for the binding engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the host timer driving [`crate::BindingEngine::tick`].
    pub poll_period_ms: u64,
    /// Attribute sets larger than this are skipped for the tick.
    pub attribute_ceiling: usize,
    /// Vectors and arrays with more components than this are never captured.
    pub max_vector_components: usize,
    /// Attribute names (exact match) that are never offered as mapping candidates.
    pub skip_attributes: Vec<String>,
    pub overlap: OverlapPolicy,
    /// Client name announced to the MIDI driver.
    pub client_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: 80,
            attribute_ceiling: 400,
            max_vector_components: 6,
            skip_attributes: vec!["_RNA_UI".to_string()],
            overlap: OverlapPolicy::Shared,
            client_name: "scene-midi".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config file. Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }
}
