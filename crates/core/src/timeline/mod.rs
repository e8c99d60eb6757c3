use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    bindings::BindState,
    midi::{ControlId, MidiEvent},
    BindingError, Result,
};

pub const DEFAULT_FRAME_RESOLUTION: u32 = 5;
pub const DEFAULT_FRAME_TIMEOUT_SECONDS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameDirection {
    Increase,
    Decrease,
}

/// One direction of the frame-step controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStepBinding {
    pub state: BindState,
    pub controller: Option<ControlId>,
}

impl FrameStepBinding {
    pub fn claims(&self, control: ControlId) -> bool {
        self.state == BindState::Bound && self.controller == Some(control)
    }
}

/// Moves the host's current frame from knob positions.
///
/// Steps are taken relative to a reference frame. The reference is held while
/// the knob keeps moving and re-read from the host once the knob has been idle
/// for `timeout_seconds`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameControl {
    pub increase: FrameStepBinding,
    pub decrease: FrameStepBinding,
    resolution: u32,
    timeout_seconds: f64,
    reference: Option<i64>,
    remaining: f64,
}

impl Default for FrameControl {
    fn default() -> Self {
        Self {
            increase: FrameStepBinding::default(),
            decrease: FrameStepBinding::default(),
            resolution: DEFAULT_FRAME_RESOLUTION,
            timeout_seconds: DEFAULT_FRAME_TIMEOUT_SECONDS,
            reference: None,
            remaining: 0.0,
        }
    }
}

impl FrameControl {
    pub fn from_parts(
        increase: FrameStepBinding,
        decrease: FrameStepBinding,
        resolution: u32,
        timeout_seconds: f64,
    ) -> Result<Self> {
        let mut control = Self {
            increase,
            decrease,
            ..Self::default()
        };
        control.set_settings(resolution, timeout_seconds)?;
        Ok(control)
    }

    /// MIDI units per frame.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn timeout_seconds(&self) -> f64 {
        self.timeout_seconds
    }

    pub fn reference_frame(&self) -> Option<i64> {
        self.reference
    }

    /// Idle time left before the reference frame is re-read.
    pub fn remaining_seconds(&self) -> f64 {
        self.remaining
    }

    pub fn binding(&self, direction: FrameDirection) -> &FrameStepBinding {
        match direction {
            FrameDirection::Increase => &self.increase,
            FrameDirection::Decrease => &self.decrease,
        }
    }

    fn binding_mut(&mut self, direction: FrameDirection) -> &mut FrameStepBinding {
        match direction {
            FrameDirection::Increase => &mut self.increase,
            FrameDirection::Decrease => &mut self.decrease,
        }
    }

    /// Arms a direction for binding, or disarms it if it is already armed.
    pub fn toggle_bind(&mut self, direction: FrameDirection) {
        let binding = self.binding_mut(direction);
        binding.state = match binding.state {
            BindState::AwaitingBind if binding.controller.is_some() => BindState::Bound,
            BindState::AwaitingBind => BindState::Unbound,
            BindState::Unbound | BindState::Bound => BindState::AwaitingBind,
        };
    }

    pub fn set_settings(&mut self, resolution: u32, timeout_seconds: f64) -> Result<()> {
        if resolution == 0 {
            return Err(BindingError::InvalidResolution);
        }
        self.resolution = resolution;
        self.timeout_seconds = timeout_seconds.max(0.0);
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Binds the first armed direction (increase before decrease) to the
    /// event's control.
    pub fn capture(&mut self, event: &MidiEvent) -> Option<FrameDirection> {
        let direction = [FrameDirection::Increase, FrameDirection::Decrease]
            .into_iter()
            .find(|direction| self.binding(*direction).state == BindState::AwaitingBind)?;
        let binding = self.binding_mut(direction);
        binding.state = BindState::Bound;
        binding.controller = Some(event.control);
        debug!(?direction, control = event.control, "frame control bound");
        Some(direction)
    }

    pub fn claims(&self, control: ControlId) -> bool {
        self.increase.claims(control) || self.decrease.claims(control)
    }

    /// Whole frames for a raw value, rounded half away from zero.
    pub fn steps(&self, value: u8) -> i64 {
        (f64::from(value) / f64::from(self.resolution)).round() as i64
    }

    /// Frame to jump to for `event`, or `None` when neither direction is bound
    /// to its control. Increase wins if both are bound to the same control.
    pub fn step(&mut self, event: &MidiEvent, live_frame: i64) -> Option<i64> {
        let direction = if self.increase.claims(event.control) {
            FrameDirection::Increase
        } else if self.decrease.claims(event.control) {
            FrameDirection::Decrease
        } else {
            return None;
        };

        let reference = match self.reference {
            Some(frame) if self.remaining > 0.0 => frame,
            _ => live_frame,
        };
        self.reference = Some(reference);
        self.remaining = self.timeout_seconds;

        let delta = self.steps(event.value);
        Some(match direction {
            FrameDirection::Increase => reference + delta,
            FrameDirection::Decrease => (reference - delta).max(0),
        })
    }

    /// Counts down the idle timer by one tick. Once it has run out, every tick
    /// re-latches the reference to the host's live frame.
    pub fn decay(&mut self, elapsed: Duration, live_frame: i64) {
        if self.remaining > 0.0 {
            self.remaining = (self.remaining - elapsed.as_secs_f64()).max(0.0);
        } else {
            self.reference = Some(live_frame);
        }
    }
}
