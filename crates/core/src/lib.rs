//! Core library for binding MIDI controls to scene properties.
//!
//! A [`BindingEngine`] owns every binding table and is driven by the host's
//! timer through [`BindingEngine::tick`]. The host application is reached
//! through the [`SceneHost`] trait and the MIDI input through [`MidiDevice`],
//! so the whole engine runs against [`MemoryScene`] and [`QueuedDevice`] in
//! tests and replays.

pub mod bindings;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod midi;
pub mod persist;
pub mod scene;
pub mod snapshot;
pub mod timeline;

pub use bindings::{BindState, BindingTables, KeyframeBinding, SelectionGroup, SelectionGroups};
pub use config::{EngineConfig, OverlapPolicy};
pub use detect::{ChangeDetector, PendingMapping};
pub use engine::{BindingEngine, EngineStatus, MappingState};
pub use error::{BindingError, Result};
pub use mapping::{map_range, MappingTable, PropertyMapping};
pub use midi::{ControlId, MidiDevice, MidiEvent, MidiEventSource, QueuedDevice};
pub use persist::BindingDocument;
pub use scene::{
    AttributeRef, AttributeSource, AttributeValue, EntityId, MemoryEntity, MemoryScene, RawValue,
    SceneHost,
};
pub use snapshot::{AttributeKind, AttributeRecord, AttributeSnapshot, AttributeSnapshotter};
pub use timeline::{FrameControl, FrameDirection, FrameStepBinding};

#[cfg(feature = "device")]
pub use midi::MidirDevice;
