//! MIDI input: device boundary, backlog draining and message decoding.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::{BindingError, Result};

#[cfg(feature = "device")]
mod midir_device;

#[cfg(feature = "device")]
pub use midir_device::MidirDevice;

/// Controller number of a physical knob, fader or button (0-127).
pub type ControlId = u8;

/// One decoded 3-byte message.
///
/// `velocity` is the first byte. Buttons are identified by it, so a change of
/// velocity and a change of value are two independent signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MidiEvent {
    pub velocity: u8,
    pub control: ControlId,
    pub value: u8,
}

impl MidiEvent {
    pub fn new(velocity: u8, control: ControlId, value: u8) -> Self {
        Self {
            velocity,
            control,
            value,
        }
    }

    /// Decodes `[velocity, control, value]`. Anything that is not exactly three
    /// bytes long is rejected; the bytes themselves are not interpreted.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        match *raw {
            [velocity, control, value] => Some(Self::new(velocity, control, value)),
            _ => None,
        }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.velocity, self.control, self.value]
    }
}

/// Driver for a MIDI input port.
pub trait MidiDevice {
    fn list_ports(&self) -> Result<Vec<String>>;

    /// Opens the port at `index` and returns its name.
    fn open_port(&mut self, index: usize) -> Result<String>;

    fn close_port(&mut self);

    fn is_open(&self) -> bool;

    /// Next queued raw message, without blocking.
    fn poll_message(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Drains a [`MidiDevice`] once per tick.
#[derive(Debug)]
pub struct MidiEventSource<D> {
    device: D,
}

impl<D: MidiDevice> MidiEventSource<D> {
    pub fn new(device: D) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Drains every queued message and returns only the most recent decodable
    /// one. Older messages are dropped since only the latest control position
    /// matters.
    ///
    /// A closed port is reported as [`BindingError::DeviceClosed`]. A read
    /// failure is logged and the tick yields nothing.
    pub fn poll(&mut self) -> Result<Option<MidiEvent>> {
        if !self.device.is_open() {
            return Err(BindingError::DeviceClosed);
        }

        let mut latest = None;
        let mut drained = 0usize;
        loop {
            match self.device.poll_message() {
                Ok(Some(raw)) => {
                    drained += 1;
                    match MidiEvent::decode(&raw) {
                        Some(event) => latest = Some(event),
                        None => trace!(len = raw.len(), "ignoring non 3-byte message"),
                    }
                    if !self.device.is_open() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "failed reading from MIDI device");
                    return Ok(None);
                }
            }
        }

        if drained > 1 {
            trace!(drained, "coalesced MIDI backlog");
        }
        Ok(latest)
    }
}

/// In-process device fed from a queue. Used for replaying recorded sessions
/// and in tests.
#[derive(Debug, Default)]
pub struct QueuedDevice {
    ports: Vec<String>,
    open: Option<usize>,
    queue: VecDeque<Vec<u8>>,
    fail_next_read: bool,
}

impl QueuedDevice {
    pub fn new(ports: Vec<String>) -> Self {
        Self {
            ports,
            ..Self::default()
        }
    }

    /// A device exposing a single port.
    pub fn single(name: &str) -> Self {
        Self::new(vec![name.to_string()])
    }

    pub fn push_raw(&mut self, raw: impl Into<Vec<u8>>) {
        self.queue.push_back(raw.into());
    }

    pub fn push(&mut self, event: MidiEvent) {
        self.push_raw(event.to_bytes().to_vec());
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Makes the next read fail once.
    pub fn fail_next_read(&mut self) {
        self.fail_next_read = true;
    }

    /// Simulates the device being unplugged.
    pub fn unplug(&mut self) {
        self.open = None;
    }
}

impl MidiDevice for QueuedDevice {
    fn list_ports(&self) -> Result<Vec<String>> {
        Ok(self.ports.clone())
    }

    fn open_port(&mut self, index: usize) -> Result<String> {
        let name = self
            .ports
            .get(index)
            .cloned()
            .ok_or(BindingError::PortOutOfRange {
                index,
                available: self.ports.len(),
            })?;
        self.open = Some(index);
        Ok(name)
    }

    fn close_port(&mut self) {
        self.open = None;
        self.queue.clear();
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn poll_message(&mut self) -> Result<Option<Vec<u8>>> {
        if std::mem::take(&mut self.fail_next_read) {
            return Err(BindingError::Device("read failed".to_string()));
        }
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_source() -> MidiEventSource<QueuedDevice> {
        let mut device = QueuedDevice::single("Test Port");
        device.open_port(0).unwrap();
        MidiEventSource::new(device)
    }

    #[test]
    fn decodes_three_bytes() {
        assert_eq!(
            MidiEvent::decode(&[176, 10, 64]),
            Some(MidiEvent::new(176, 10, 64))
        );
        assert_eq!(MidiEvent::decode(&[192, 1]), None);
        assert_eq!(MidiEvent::decode(&[240, 1, 2, 3, 247]), None);
    }

    #[test]
    fn keeps_only_latest_message() {
        let mut source = open_source();
        source.device_mut().push(MidiEvent::new(176, 1, 10));
        source.device_mut().push(MidiEvent::new(176, 1, 20));
        source.device_mut().push_raw(vec![0xFE]);
        source.device_mut().push(MidiEvent::new(176, 2, 30));

        assert_eq!(source.poll().unwrap(), Some(MidiEvent::new(176, 2, 30)));
        assert_eq!(source.device().pending(), 0);
        assert_eq!(source.poll().unwrap(), None);
    }

    #[test]
    fn closed_port_is_an_error() {
        let mut source = MidiEventSource::new(QueuedDevice::single("Test Port"));
        assert!(matches!(source.poll(), Err(BindingError::DeviceClosed)));
    }

    #[test]
    fn read_failure_is_a_no_op() {
        let mut source = open_source();
        source.device_mut().push(MidiEvent::new(176, 1, 10));
        source.device_mut().fail_next_read();
        assert_eq!(source.poll().unwrap(), None);
        assert_eq!(source.poll().unwrap(), Some(MidiEvent::new(176, 1, 10)));
    }

    #[test]
    fn opening_unknown_port_fails() {
        let mut device = QueuedDevice::single("Only");
        let err = device.open_port(3).unwrap_err();
        assert!(matches!(err, BindingError::PortOutOfRange { index: 3, available: 1 }));
    }
}
