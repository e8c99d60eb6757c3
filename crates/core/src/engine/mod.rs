//! The binding engine: one explicitly owned instance driven by the host's
//! timer.
//!
//! Every tick runs, strictly in sequence:
//!
//! 1. attribute snapshot and diff (only while learning and not playing),
//! 2. MIDI drain and dispatch of the latest message,
//! 3. frame reference decay.
//!
//! A message is dispatched through fixed stages: pending bind capture,
//! property values, selection recall, keyframe insertion, frame step. Under
//! [`OverlapPolicy::Exclusive`] the first stage that acts on a message
//! consumes it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{
    bindings::{BindingTables, SelectionGroup},
    config::{EngineConfig, OverlapPolicy},
    detect::{ChangeDetector, PendingMapping},
    mapping::PropertyMapping,
    midi::{ControlId, MidiDevice, MidiEvent, MidiEventSource},
    persist::{self, BindingDocument},
    scene::{AttributeRef, SceneHost},
    snapshot::AttributeSnapshotter,
    timeline::FrameDirection,
    BindingError, Result,
};

/// Learning state of the primary mapping flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingState {
    #[default]
    Idle,
    /// Listening for property changes; a control may already be waiting.
    AwaitingControlTouch,
    /// A candidate property is waiting to be applied or cancelled.
    AwaitingPropertyChange,
}

/// Readout of the connection and the last message, for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub port_name: Option<String>,
    pub last_control: Option<ControlId>,
    pub last_value: Option<u8>,
    pub last_velocity: Option<u8>,
    /// Capacity problem reported by the last snapshot, cleared once resolved.
    pub mapping_error: Option<String>,
}

pub struct BindingEngine<D> {
    config: EngineConfig,
    source: MidiEventSource<D>,
    snapshotter: AttributeSnapshotter,
    detector: ChangeDetector,
    state: MappingState,
    control_to_map: Option<ControlId>,
    pending: Option<PendingMapping>,
    tables: BindingTables,
    /// Document of the last save or load; disconnect reverts to it.
    saved: Option<BindingDocument>,
    last_event: Option<MidiEvent>,
    status: EngineStatus,
    connected: bool,
    running: bool,
    scene_checked: bool,
    /// Bindings were loaded from a file; the scene's copy is ignored.
    file_bindings: bool,
}

impl<D: MidiDevice> BindingEngine<D> {
    pub fn new(config: EngineConfig, device: D) -> Self {
        Self {
            snapshotter: AttributeSnapshotter::from_config(&config),
            config,
            source: MidiEventSource::new(device),
            detector: ChangeDetector::new(),
            state: MappingState::Idle,
            control_to_map: None,
            pending: None,
            tables: BindingTables::default(),
            saved: None,
            last_event: None,
            status: EngineStatus::default(),
            connected: false,
            running: false,
            scene_checked: false,
            file_bindings: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> MappingState {
        self.state
    }

    pub fn control_to_map(&self) -> Option<ControlId> {
        self.control_to_map
    }

    pub fn pending(&self) -> Option<&PendingMapping> {
        self.pending.as_ref()
    }

    pub fn tables(&self) -> &BindingTables {
        &self.tables
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn device(&self) -> &D {
        self.source.device()
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.source.device_mut()
    }

    // Lifecycle

    pub fn list_ports(&self) -> Result<Vec<String>> {
        self.source.device().list_ports()
    }

    /// Opens the port at `index` and starts ticking. An open connection is
    /// torn down first.
    pub fn connect(&mut self, index: usize) -> Result<String> {
        if self.connected {
            self.disconnect();
        }
        let name = self.source.device_mut().open_port(index)?;
        info!(port = %name, "connected");
        self.status.port_name = Some(name.clone());
        self.connected = true;
        self.running = true;
        self.scene_checked = false;
        Ok(name)
    }

    /// Closes the port and resets all runtime state. Binding tables revert to
    /// the last saved or loaded document.
    pub fn disconnect(&mut self) {
        self.source.device_mut().close_port();
        self.connected = false;
        self.running = false;
        self.scene_checked = false;

        self.state = MappingState::Idle;
        self.control_to_map = None;
        self.pending = None;
        self.detector.reset();
        self.last_event = None;
        self.status = EngineStatus::default();

        let mut tables = BindingTables::default();
        if let Some(document) = self.saved.clone() {
            if let Err(err) = document.apply(&mut tables) {
                warn!(%err, "saved bindings could not be restored");
                tables = BindingTables::default();
            }
        }
        self.tables = tables;
        info!("disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Resumes ticking on an open connection.
    pub fn start(&mut self) {
        self.running = self.connected;
    }

    /// Pauses ticking without closing the port.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// One timer tick. Returns the message dispatched during the tick, if any.
    pub fn tick(&mut self, host: &mut dyn SceneHost) -> Option<MidiEvent> {
        if !self.running || !self.connected {
            return None;
        }

        if !self.scene_checked && !self.file_bindings {
            self.scene_checked = true;
            if let Err(err) = self.load_scene_bindings(&*host) {
                warn!(%err, "ignoring bindings stored in the scene");
            }
        }

        self.learn(&*host);

        let event = match self.source.poll() {
            Ok(event) => event,
            Err(BindingError::DeviceClosed) => {
                warn!("MIDI port closed, tearing down");
                self.disconnect();
                return None;
            }
            Err(err) => {
                warn!(%err, "MIDI poll failed");
                None
            }
        };

        if let Some(event) = event {
            self.handle_event(host, event);
        }

        let live_frame = host.current_frame();
        self.tables
            .frames
            .decay(self.config.poll_period(), live_frame);
        event
    }

    fn learn(&mut self, host: &dyn SceneHost) {
        if self.state == MappingState::Idle {
            return;
        }
        if host.is_playing() {
            // re-baseline once playback stops so animated values are not learned
            self.detector.reset();
            return;
        }

        let selected = host.selected_entities();
        let entity = selected.first().map(String::as_str);
        let capture = self.snapshotter.capture(host, entity);
        self.status.mapping_error = capture.overflow_message();

        let Some(entity) = entity else {
            self.detector.reset();
            return;
        };

        let Some(candidate) = self.detector.detect(entity, capture.snapshot) else {
            return;
        };
        if self.control_to_map.is_none() {
            trace!(attribute = %candidate.record.name, "change ignored, no control waiting");
            return;
        }
        debug!(
            entity,
            attribute = %candidate.record.name,
            control = ?self.control_to_map,
            "mapping candidate"
        );
        self.pending = Some(candidate);
        self.state = MappingState::AwaitingPropertyChange;
    }

    /// Dispatches one decoded message through every stage.
    pub fn handle_event(&mut self, host: &mut dyn SceneHost, event: MidiEvent) {
        let (velocity_changed, value_changed) = match self.last_event {
            Some(prev) => (
                prev.velocity != event.velocity,
                (prev.control, prev.value) != (event.control, event.value),
            ),
            None => (true, true),
        };
        self.last_event = Some(event);
        self.status.last_control = Some(event.control);
        self.status.last_value = Some(event.value);
        self.status.last_velocity = Some(event.velocity);
        trace!(
            control = event.control,
            value = event.value,
            velocity = event.velocity,
            velocity_changed,
            value_changed,
            "dispatching"
        );

        let exclusive = self.config.overlap == OverlapPolicy::Exclusive;

        // pending bind capture
        let mut keyframe_bound = false;
        let mut selection_bound = false;
        let mut frame_bound = false;
        if velocity_changed {
            keyframe_bound = self.tables.keyframe.capture(&event);
            if !(exclusive && keyframe_bound) {
                selection_bound = self.tables.selection.capture(&event);
            }
        }
        if value_changed && !(exclusive && (keyframe_bound || selection_bound)) {
            frame_bound = self.tables.frames.capture(&event).is_some();
        }
        if exclusive && (keyframe_bound || selection_bound || frame_bound) {
            return;
        }

        // property values
        if value_changed {
            if self.tables.mapping.is_mapped(event.control) {
                self.apply_values(host, event);
                if exclusive {
                    return;
                }
            } else if !(exclusive && self.claimed_by_binding(event.control)) {
                self.note_unmapped_control(event.control);
            }
        }

        if velocity_changed {
            if !selection_bound {
                let recalled = self
                    .tables
                    .selection
                    .recall(&event)
                    .map(|group| (group.name.clone(), group.entities.clone()));
                if let Some((name, entities)) = recalled {
                    debug!(group = %name, count = entities.len(), "recalling selection group");
                    if let Err(err) = host.select_only(&entities) {
                        warn!(group = %name, %err, "selection recall failed");
                    }
                    host.request_redraw();
                    if exclusive {
                        return;
                    }
                }
            }

            if !keyframe_bound && self.tables.keyframe.matches(&event) {
                self.insert_keyframes(host);
                if exclusive {
                    return;
                }
            }
        }

        if value_changed && !frame_bound {
            if let Some(frame) = self.tables.frames.step(&event, host.current_frame()) {
                debug!(control = event.control, frame, "frame step");
                if let Err(err) = host.set_current_frame(frame) {
                    warn!(frame, %err, "failed to move the current frame");
                }
            }
        }
    }

    fn claimed_by_binding(&self, control: ControlId) -> bool {
        self.tables.keyframe.claims(control)
            || self.tables.selection.claims(control)
            || self.tables.frames.claims(control)
    }

    fn note_unmapped_control(&mut self, control: ControlId) {
        if self.control_to_map != Some(control) {
            debug!(control, "control waiting for a property");
        }
        self.control_to_map = Some(control);
        if self.state == MappingState::Idle {
            self.state = MappingState::AwaitingControlTouch;
            self.detector.reset();
        }
    }

    fn apply_values(&mut self, host: &mut dyn SceneHost, event: MidiEvent) {
        let writes = self.tables.mapping.evaluate(event.control, event.value);
        let entities = host.selected_entities();
        for write in &writes {
            for entity in &entities {
                match host.write_attribute(entity, &write.target, write.value) {
                    Ok(()) => {}
                    Err(err) if err.is_transient() => {
                        debug!(entity = %entity, property = %write.target.property, %err, "skipping write");
                    }
                    Err(err) => {
                        warn!(entity = %entity, property = %write.target.property, %err, "write failed");
                    }
                }
            }
        }
        host.request_redraw();
        // engine writes must not come back as mapping candidates
        self.detector.reset();
    }

    /// Inserts a keyframe for every mapped property on every selected entity.
    pub fn insert_keyframes(&mut self, host: &mut dyn SceneHost) {
        let targets: Vec<AttributeRef> = self
            .tables
            .mapping
            .all()
            .map(|(_, mapping)| mapping.attribute.target())
            .collect();
        let entities = host.selected_entities();
        debug!(targets = targets.len(), entities = entities.len(), "inserting keyframes");
        for entity in &entities {
            for target in &targets {
                if let Err(err) = host.insert_keyframe(entity, target) {
                    warn!(entity = %entity, property = %target.property, %err, "skipping keyframe");
                }
            }
        }
        host.request_redraw();
    }

    // Mapping session

    /// Starts listening for property changes. `control` targets a specific
    /// control, which may already carry mappings.
    pub fn begin_mapping_session(&mut self, control: Option<ControlId>) {
        self.state = MappingState::AwaitingControlTouch;
        self.control_to_map = control;
        self.pending = None;
        self.detector.reset();
    }

    /// Binds the pending candidate to the waiting control. Omitted bounds are 0.
    pub fn apply_mapping(
        &mut self,
        min: Option<f64>,
        max: Option<f64>,
        label: Option<&str>,
    ) -> Result<ControlId> {
        if self.state != MappingState::AwaitingPropertyChange {
            return Err(BindingError::NoPendingMapping);
        }
        let control = self.control_to_map.ok_or(BindingError::NoPendingMapping)?;
        let pending = self.pending.take().ok_or(BindingError::NoPendingMapping)?;

        let mapping = pending.finalize(min, max);
        info!(
            control,
            attribute = %mapping.attribute.name,
            min = mapping.min,
            max = mapping.max,
            "mapping applied"
        );
        self.tables.mapping.push(control, mapping);
        if let Some(label) = label {
            self.tables.mapping.set_name(control, label);
        }

        self.control_to_map = None;
        self.state = MappingState::AwaitingControlTouch;
        self.detector.reset();
        Ok(control)
    }

    pub fn cancel_mapping(&mut self) {
        self.pending = None;
        self.control_to_map = None;
        self.state = MappingState::Idle;
        // snapshots stop while idle, so nothing else would clear it
        self.status.mapping_error = None;
    }

    pub fn update_mapping(
        &mut self,
        control: ControlId,
        index: usize,
        min: f64,
        max: f64,
        label: Option<&str>,
    ) -> Result<()> {
        self.tables.mapping.update(control, index, min, max)?;
        if let Some(label) = label {
            self.tables.mapping.set_name(control, label);
        }
        Ok(())
    }

    pub fn remove_mapping(&mut self, control: ControlId, index: usize) -> Result<PropertyMapping> {
        let removed = self.tables.mapping.remove(control, index)?;
        debug!(control, index, attribute = %removed.attribute.name, "mapping removed");
        Ok(removed)
    }

    pub fn rename_control(&mut self, control: ControlId, label: &str) {
        self.tables.mapping.set_name(control, label);
    }

    // Button and frame bindings

    pub fn start_keyframe_bind(&mut self) {
        self.tables.keyframe.start();
    }

    pub fn reset_keyframe_bind(&mut self) {
        self.tables.keyframe.reset();
    }

    /// Arms a selection group holding the host's current selection.
    pub fn start_selection_group(&mut self, host: &dyn SceneHost, name: &str) {
        let entities = host.selected_entities();
        debug!(group = name, count = entities.len(), "selection group armed");
        self.tables.selection.start(name, entities);
    }

    pub fn cancel_selection_group(&mut self) {
        self.tables.selection.cancel();
    }

    pub fn delete_selection_group(&mut self, control: ControlId) -> Option<SelectionGroup> {
        self.tables.selection.delete(control)
    }

    pub fn toggle_frame_bind(&mut self, direction: FrameDirection) {
        self.tables.frames.toggle_bind(direction);
    }

    pub fn set_frame_settings(&mut self, resolution: u32, timeout_seconds: f64) -> Result<()> {
        self.tables.frames.set_settings(resolution, timeout_seconds)
    }

    pub fn reset_frame_control(&mut self) {
        self.tables.frames.reset();
    }

    // Persistence

    pub fn save_bindings(&mut self, path: &Path) -> Result<()> {
        persist::save_bindings(path, &self.tables)?;
        self.saved = Some(BindingDocument::capture(&self.tables));
        Ok(())
    }

    pub fn load_bindings(&mut self, path: &Path) -> Result<()> {
        let document = persist::load_bindings(path, &mut self.tables)?;
        self.saved = Some(document);
        self.file_bindings = true;
        Ok(())
    }

    pub fn save_to_scene(&mut self, host: &mut dyn SceneHost) -> Result<()> {
        persist::save_to_scene(host, &self.tables)?;
        self.saved = Some(BindingDocument::capture(&self.tables));
        Ok(())
    }

    /// Loads bindings embedded in the scene. Returns `false` if there are none.
    pub fn load_scene_bindings(&mut self, host: &dyn SceneHost) -> Result<bool> {
        let loaded = persist::load_from_scene(host, &mut self.tables)?;
        if loaded {
            info!(controls = self.tables.mapping.mappings().len(), "loaded bindings from scene");
            self.saved = Some(BindingDocument::capture(&self.tables));
        }
        Ok(loaded)
    }
}

impl<D: std::fmt::Debug> std::fmt::Debug for BindingEngine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingEngine")
            .field("device", &self.source)
            .field("state", &self.state)
            .field("control_to_map", &self.control_to_map)
            .field("connected", &self.connected)
            .field("running", &self.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::{
        bindings::BindState,
        midi::QueuedDevice,
        scene::{AttributeSource, MemoryEntity, MemoryScene, RawValue},
    };

    fn cube_scene() -> MemoryScene {
        let mut scene = MemoryScene::new();
        scene.insert_entity(
            "Cube",
            MemoryEntity::default()
                .with_built_in("loc_x", RawValue::Float(0.0))
                .with_built_in("pass_index", RawValue::Int(0)),
        );
        scene.select(&["Cube"]);
        scene
    }

    fn engine_with(config: EngineConfig) -> BindingEngine<QueuedDevice> {
        let mut engine = BindingEngine::new(config, QueuedDevice::single("Test Port"));
        engine.connect(0).unwrap();
        engine
    }

    fn connected_engine() -> BindingEngine<QueuedDevice> {
        engine_with(EngineConfig::default())
    }

    fn send(engine: &mut BindingEngine<QueuedDevice>, scene: &mut MemoryScene, event: MidiEvent) {
        engine.device_mut().push(event);
        engine.tick(scene);
    }

    fn set_loc_x(scene: &mut MemoryScene, value: f64) {
        scene
            .entity_mut("Cube")
            .unwrap()
            .set(AttributeSource::BuiltIn, "loc_x", RawValue::Float(value));
    }

    fn loc_x(scene: &MemoryScene) -> Option<&RawValue> {
        scene.entity("Cube").unwrap().get(AttributeSource::BuiltIn, "loc_x")
    }

    /// Touch control 10, move loc_x, apply with 0..10.
    fn learn_loc_x(engine: &mut BindingEngine<QueuedDevice>, scene: &mut MemoryScene) {
        send(engine, scene, MidiEvent::new(176, 10, 64));
        engine.tick(scene);
        set_loc_x(scene, 2.0);
        engine.tick(scene);
        engine.apply_mapping(Some(0.0), Some(10.0), Some("Fader 1")).unwrap();
    }

    #[test]
    fn idle_until_an_unmapped_control_moves() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        engine.tick(&mut scene);
        assert_eq!(engine.state(), MappingState::Idle);

        send(&mut engine, &mut scene, MidiEvent::new(176, 10, 64));
        assert_eq!(engine.state(), MappingState::AwaitingControlTouch);
        assert_eq!(engine.control_to_map(), Some(10));
        assert_eq!(engine.status().last_value, Some(64));
    }

    #[test]
    fn learns_and_applies_a_mapping() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();

        send(&mut engine, &mut scene, MidiEvent::new(176, 10, 64));
        engine.tick(&mut scene);
        set_loc_x(&mut scene, 2.0);
        engine.tick(&mut scene);
        assert_eq!(engine.state(), MappingState::AwaitingPropertyChange);
        assert_eq!(engine.pending().unwrap().record.name, "loc_x");

        assert_eq!(engine.apply_mapping(Some(0.0), Some(10.0), Some("Fader 1")).unwrap(), 10);
        assert_eq!(engine.state(), MappingState::AwaitingControlTouch);
        assert_eq!(engine.control_to_map(), None);
        assert_eq!(engine.tables().mapping.get(10).len(), 1);
        assert_eq!(engine.tables().mapping.name(10), Some("Fader 1"));

        send(&mut engine, &mut scene, MidiEvent::new(176, 10, 127));
        let Some(RawValue::Float(value)) = loc_x(&scene) else {
            panic!("loc_x is not a float");
        };
        assert_approx_eq!(*value, 10.0);
        assert_eq!(scene.redraws, 1);
    }

    #[test]
    fn engine_writes_are_not_learned() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        learn_loc_x(&mut engine, &mut scene);

        engine.begin_mapping_session(Some(11));
        engine.tick(&mut scene);
        send(&mut engine, &mut scene, MidiEvent::new(176, 10, 100));
        engine.tick(&mut scene);
        engine.tick(&mut scene);
        assert_eq!(engine.state(), MappingState::AwaitingControlTouch);
        assert!(engine.pending().is_none());
    }

    #[test]
    fn newer_candidate_replaces_pending() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        engine.begin_mapping_session(Some(3));
        engine.tick(&mut scene);
        set_loc_x(&mut scene, 1.0);
        engine.tick(&mut scene);
        scene
            .entity_mut("Cube")
            .unwrap()
            .set(AttributeSource::BuiltIn, "pass_index", RawValue::Int(2));
        engine.tick(&mut scene);
        assert_eq!(engine.pending().unwrap().record.name, "pass_index");
    }

    #[test]
    fn apply_without_candidate_fails() {
        let mut engine = connected_engine();
        assert!(matches!(
            engine.apply_mapping(None, None, None),
            Err(BindingError::NoPendingMapping)
        ));
    }

    #[test]
    fn cancel_discards_candidate() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        engine.begin_mapping_session(Some(3));
        engine.tick(&mut scene);
        set_loc_x(&mut scene, 1.0);
        engine.tick(&mut scene);

        engine.cancel_mapping();
        assert_eq!(engine.state(), MappingState::Idle);
        assert!(engine.pending().is_none());
        assert!(engine.tables().mapping.is_empty());
    }

    #[test]
    fn no_learning_during_playback() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        engine.begin_mapping_session(Some(3));
        engine.tick(&mut scene);
        scene.playing = true;
        engine.tick(&mut scene);
        set_loc_x(&mut scene, 5.0);
        engine.tick(&mut scene);
        assert!(engine.pending().is_none());

        scene.playing = false;
        engine.tick(&mut scene);
        assert!(engine.pending().is_none());
        assert_eq!(engine.state(), MappingState::AwaitingControlTouch);

        // changes after playback are learned again
        set_loc_x(&mut scene, 6.0);
        engine.tick(&mut scene);
        assert_eq!(engine.pending().unwrap().record.name, "loc_x");
    }

    #[test]
    fn overflow_is_reported_and_clears() {
        let mut scene = cube_scene();
        let mut engine = engine_with(EngineConfig {
            attribute_ceiling: 1,
            ..EngineConfig::default()
        });
        engine.begin_mapping_session(None);
        engine.tick(&mut scene);
        assert!(engine.status().mapping_error.is_some());

        scene.entity_mut("Cube").unwrap().built_in.truncate(1);
        engine.tick(&mut scene);
        assert_eq!(engine.status().mapping_error, None);
    }

    #[test]
    fn cancel_clears_overflow() {
        let mut scene = cube_scene();
        let mut engine = engine_with(EngineConfig {
            attribute_ceiling: 1,
            ..EngineConfig::default()
        });
        engine.begin_mapping_session(None);
        engine.tick(&mut scene);
        assert!(engine.status().mapping_error.is_some());

        engine.cancel_mapping();
        scene.entity_mut("Cube").unwrap().built_in.truncate(1);
        engine.tick(&mut scene);
        assert_eq!(engine.state(), MappingState::Idle);
        assert_eq!(engine.status().mapping_error, None);
    }

    #[test]
    fn file_bindings_win_over_scene_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.json");
        let mut scene = cube_scene();

        let mut author = connected_engine();
        learn_loc_x(&mut author, &mut scene);
        author.save_to_scene(&mut scene).unwrap();
        author.remove_mapping(10, 0).unwrap();
        author.rename_control(11, "file only");
        author.save_bindings(&path).unwrap();

        let mut engine =
            BindingEngine::new(EngineConfig::default(), QueuedDevice::single("Test Port"));
        engine.load_bindings(&path).unwrap();
        engine.connect(0).unwrap();
        engine.tick(&mut scene);
        assert!(engine.tables().mapping.is_empty());
        assert_eq!(engine.tables().mapping.name(11), Some("file only"));
    }

    #[test]
    fn missing_attribute_is_skipped() {
        let mut scene = cube_scene();
        scene.insert_entity(
            "Empty",
            MemoryEntity::default().with_built_in("other", RawValue::Float(0.0)),
        );
        let mut engine = connected_engine();
        learn_loc_x(&mut engine, &mut scene);

        scene.select(&["Empty", "Cube"]);
        send(&mut engine, &mut scene, MidiEvent::new(176, 10, 0));
        assert_eq!(loc_x(&scene), Some(&RawValue::Float(0.0)));
    }

    #[test]
    fn integer_scalars_are_truncated() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        engine.begin_mapping_session(Some(4));
        engine.tick(&mut scene);
        scene
            .entity_mut("Cube")
            .unwrap()
            .set(AttributeSource::BuiltIn, "pass_index", RawValue::Int(1));
        engine.tick(&mut scene);
        engine.apply_mapping(Some(0.0), Some(10.0), None).unwrap();

        send(&mut engine, &mut scene, MidiEvent::new(176, 4, 64));
        let value = scene.entity("Cube").unwrap().get(AttributeSource::BuiltIn, "pass_index");
        assert_eq!(value, Some(&RawValue::Int(5)));
    }

    #[test]
    fn unplugged_device_tears_down() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        learn_loc_x(&mut engine, &mut scene);
        engine.start_keyframe_bind();

        engine.device_mut().unplug();
        assert_eq!(engine.tick(&mut scene), None);
        assert!(!engine.is_connected());
        assert_eq!(engine.state(), MappingState::Idle);
        assert_eq!(engine.status(), &EngineStatus::default());
        // nothing was saved, so the tables revert to empty
        assert!(engine.tables().mapping.is_empty());
        assert_eq!(engine.tables().keyframe.state(), BindState::Unbound);

        engine.device_mut().push(MidiEvent::new(176, 10, 10));
        assert_eq!(engine.tick(&mut scene), None);
    }

    #[test]
    fn disconnect_reverts_to_saved_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindings.json");
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        learn_loc_x(&mut engine, &mut scene);
        engine.save_bindings(&path).unwrap();

        engine.rename_control(10, "renamed");
        engine.remove_mapping(10, 0).unwrap();
        engine.disconnect();

        assert_eq!(engine.tables().mapping.get(10).len(), 1);
        assert_eq!(engine.tables().mapping.name(10), Some("Fader 1"));
    }

    #[test]
    fn stop_pauses_ticking() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        engine.stop();
        engine.device_mut().push(MidiEvent::new(176, 10, 64));
        assert_eq!(engine.tick(&mut scene), None);

        engine.start();
        assert_eq!(engine.tick(&mut scene), Some(MidiEvent::new(176, 10, 64)));
    }

    #[test]
    fn scene_bindings_load_once_per_connection() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        learn_loc_x(&mut engine, &mut scene);
        engine.save_to_scene(&mut scene).unwrap();
        engine.disconnect();

        let mut fresh = connected_engine();
        fresh.tick(&mut scene);
        assert_eq!(fresh.tables().mapping.get(10).len(), 1);

        fresh.remove_mapping(10, 0).unwrap();
        fresh.tick(&mut scene);
        assert!(fresh.tables().mapping.is_empty());
    }

    #[test]
    fn exclusive_binding_owns_its_control() {
        let mut scene = cube_scene();
        let mut engine = engine_with(EngineConfig {
            overlap: OverlapPolicy::Exclusive,
            ..EngineConfig::default()
        });
        engine.start_keyframe_bind();
        send(&mut engine, &mut scene, MidiEvent::new(100, 5, 0));
        assert_eq!(engine.tables().keyframe.control(), Some(5));
        // the binding press is consumed, not offered for mapping
        assert_eq!(engine.control_to_map(), None);

        send(&mut engine, &mut scene, MidiEvent::new(0, 5, 1));
        assert_eq!(engine.control_to_map(), None);
        assert_eq!(engine.state(), MappingState::Idle);
    }

    #[test]
    fn shared_binding_still_offers_control() {
        let mut scene = cube_scene();
        let mut engine = connected_engine();
        engine.start_keyframe_bind();
        send(&mut engine, &mut scene, MidiEvent::new(100, 5, 0));
        assert_eq!(engine.tables().keyframe.control(), Some(5));
        assert_eq!(engine.control_to_map(), Some(5));
        assert!(scene.keyframes.is_empty());
    }
}
