//! Latched button bindings: keyframe insertion and selection recall.
//!
//! Both follow the same two-phase shape: arm the binding, then the next
//! key-down message latches its control and velocity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    mapping::MappingTable,
    midi::{ControlId, MidiEvent},
    scene::EntityId,
    timeline::FrameControl,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindState {
    #[default]
    Unbound,
    AwaitingBind,
    Bound,
}

/// Every persisted binding table owned by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingTables {
    pub mapping: MappingTable,
    pub keyframe: KeyframeBinding,
    pub selection: SelectionGroups,
    pub frames: FrameControl,
}

/// Single control that inserts keyframes for every mapped property.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyframeBinding {
    state: BindState,
    control: Option<ControlId>,
    velocity: u8,
}

impl KeyframeBinding {
    pub fn bound(control: ControlId, velocity: u8) -> Self {
        Self {
            state: BindState::Bound,
            control: Some(control),
            velocity,
        }
    }

    /// Rebuilds the binding from its persisted fields.
    pub fn from_saved(control: Option<ControlId>, velocity: u8) -> Self {
        match control {
            Some(control) => Self::bound(control, velocity),
            None => Self {
                velocity,
                ..Self::default()
            },
        }
    }

    pub fn state(&self) -> BindState {
        self.state
    }

    pub fn control(&self) -> Option<ControlId> {
        self.control
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// Arms the binding; the next key-down replaces any previous control.
    pub fn start(&mut self) {
        self.state = BindState::AwaitingBind;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Latches `event` if armed and the event is a key-down.
    pub fn capture(&mut self, event: &MidiEvent) -> bool {
        if self.state != BindState::AwaitingBind || event.velocity == 0 {
            return false;
        }
        self.state = BindState::Bound;
        self.control = Some(event.control);
        self.velocity = event.velocity;
        debug!(control = event.control, velocity = event.velocity, "keyframe control bound");
        true
    }

    pub fn claims(&self, control: ControlId) -> bool {
        self.state == BindState::Bound && self.control == Some(control)
    }

    pub fn matches(&self, event: &MidiEvent) -> bool {
        self.claims(event.control) && self.velocity == event.velocity
    }
}

/// Named set of entities recalled by a button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionGroup {
    pub name: String,
    pub entities: Vec<EntityId>,
    pub velocity: u8,
}

/// Selection captured when a group bind starts, waiting for its button.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingGroup {
    pub name: String,
    pub entities: Vec<EntityId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionGroups {
    groups: BTreeMap<ControlId, SelectionGroup>,
    /// Velocity of the most recently bound group.
    velocity: u8,
    pending: Option<PendingGroup>,
}

impl SelectionGroups {
    pub fn from_parts(groups: BTreeMap<ControlId, SelectionGroup>, velocity: u8) -> Self {
        Self {
            groups,
            velocity,
            pending: None,
        }
    }

    pub fn groups(&self) -> &BTreeMap<ControlId, SelectionGroup> {
        &self.groups
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn get(&self, control: ControlId) -> Option<&SelectionGroup> {
        self.groups.get(&control)
    }

    pub fn pending(&self) -> Option<&PendingGroup> {
        self.pending.as_ref()
    }

    pub fn state(&self) -> BindState {
        if self.pending.is_some() {
            BindState::AwaitingBind
        } else if self.groups.is_empty() {
            BindState::Unbound
        } else {
            BindState::Bound
        }
    }

    /// Arms a bind for `entities`, the selection at the time of the call.
    pub fn start(&mut self, name: impl Into<String>, entities: Vec<EntityId>) {
        self.pending = Some(PendingGroup {
            name: name.into(),
            entities,
        });
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn delete(&mut self, control: ControlId) -> Option<SelectionGroup> {
        self.groups.remove(&control)
    }

    /// Binds the pending group to `event` if armed and the event is a key-down.
    /// A group already bound to the same control is replaced.
    pub fn capture(&mut self, event: &MidiEvent) -> bool {
        if event.velocity == 0 {
            return false;
        }
        let Some(pending) = self.pending.take() else {
            return false;
        };
        debug!(control = event.control, group = %pending.name, "selection group bound");
        self.groups.insert(
            event.control,
            SelectionGroup {
                name: pending.name,
                entities: pending.entities,
                velocity: event.velocity,
            },
        );
        self.velocity = event.velocity;
        true
    }

    pub fn claims(&self, control: ControlId) -> bool {
        self.groups.contains_key(&control)
    }

    /// Group recalled by `event`, if its control and velocity match.
    pub fn recall(&self, event: &MidiEvent) -> Option<&SelectionGroup> {
        self.groups
            .get(&event.control)
            .filter(|group| group.velocity == event.velocity)
    }
}
