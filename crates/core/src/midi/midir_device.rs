use std::sync::mpsc::{self, Receiver, TryRecvError};

use midir::{MidiInput, MidiInputConnection};
use tracing::{info, warn};

use super::MidiDevice;
use crate::{BindingError, Result};

/// Hardware MIDI input backed by midir.
///
/// The driver callback pushes raw messages into a channel; `poll_message`
/// drains it from the engine tick.
pub struct MidirDevice {
    client_name: String,
    connection: Option<MidiInputConnection<()>>,
    receiver: Option<Receiver<Vec<u8>>>,
}

impl MidirDevice {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            connection: None,
            receiver: None,
        }
    }

    fn input(&self) -> Result<MidiInput> {
        MidiInput::new(&self.client_name)
            .map_err(|e| BindingError::Device(format!("MIDI init: {e}")))
    }
}

impl MidiDevice for MidirDevice {
    fn list_ports(&self) -> Result<Vec<String>> {
        let input = self.input()?;
        Ok(input
            .ports()
            .iter()
            .map(|port| {
                input
                    .port_name(port)
                    .unwrap_or_else(|_| "unknown".to_string())
            })
            .collect())
    }

    fn open_port(&mut self, index: usize) -> Result<String> {
        self.close_port();

        let input = self.input()?;
        let ports = input.ports();
        let port = ports.get(index).ok_or(BindingError::PortOutOfRange {
            index,
            available: ports.len(),
        })?;
        let name = input
            .port_name(port)
            .unwrap_or_else(|_| "unknown".to_string());

        let (sender, receiver) = mpsc::channel();
        let connection = input
            .connect(
                port,
                "scene-midi-input",
                move |_timestamp, msg, _| {
                    let _ = sender.send(msg.to_vec());
                },
                (),
            )
            .map_err(|e| BindingError::Device(format!("MIDI connect: {e}")))?;

        info!(port = %name, "opened MIDI port");
        self.connection = Some(connection);
        self.receiver = Some(receiver);
        Ok(name)
    }

    fn close_port(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.receiver = None;
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn poll_message(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(receiver) = &self.receiver else {
            return Ok(None);
        };
        match receiver.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                warn!("MIDI driver dropped the connection");
                self.close_port();
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for MidirDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidirDevice")
            .field("client_name", &self.client_name)
            .field("open", &self.is_open())
            .finish()
    }
}
