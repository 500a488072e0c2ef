//! MIDI port discovery and I/O
//!
//! Uses midir for cross-platform MIDI I/O (ALSA on Linux, CoreMIDI on macOS, WinMM on Windows).
//! midir delivers input on its own callback thread; the callback only pushes
//! events into a channel that the relay drains without blocking.

use std::sync::mpsc::{channel, Receiver, TryRecvError};

use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection, MidiOutputPort};

use crate::error::{PortRole, RelayError};
use crate::event::MidiEvent;
use crate::io::select::{InputChoice, PortSelection};

/// Local MIDI input as seen by the relay.
pub trait MidiSource {
    /// Next pending event, or an empty event if nothing arrived yet.
    fn poll(&mut self) -> Result<MidiEvent, RelayError>;

    /// Release the device. Calling it twice is harmless.
    fn close(&mut self);
}

/// Local MIDI output as seen by the relay.
pub trait MidiSink {
    fn send(&mut self, event: &MidiEvent) -> Result<(), RelayError>;

    /// Release the device. Calling it twice is harmless.
    fn close(&mut self);
}

/// Input connection fed by the midir callback.
pub struct MidirSource {
    conn: Option<MidiInputConnection<()>>,
    rx: Receiver<MidiEvent>,
    name: String,
}

impl MidiSource for MidirSource {
    fn poll(&mut self) -> Result<MidiEvent, RelayError> {
        if self.conn.is_none() {
            return Err(RelayError::InputLost(format!("'{}' is closed", self.name)));
        }
        match self.rx.try_recv() {
            Ok(event) => Ok(event),
            Err(TryRecvError::Empty) => Ok(MidiEvent::empty()),
            Err(TryRecvError::Disconnected) => Err(RelayError::InputLost(format!(
                "'{}' stopped delivering messages",
                self.name
            ))),
        }
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
            log::info!("MIDI input '{}' closed", self.name);
        }
    }
}

/// Output connection owned by the relay.
pub struct MidirSink {
    conn: Option<MidiOutputConnection>,
    name: String,
}

impl MidiSink for MidirSink {
    fn send(&mut self, event: &MidiEvent) -> Result<(), RelayError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| RelayError::DeviceWrite(format!("'{}' is closed", self.name)))?;
        conn.send(event.bytes())
            .map_err(|e| RelayError::DeviceWrite(format!("'{}': {}", self.name, e)))
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
            log::info!("MIDI output '{}' closed", self.name);
        }
    }
}

fn port_names<P>(ports: &[P], name_of: impl Fn(&P) -> Option<String>) -> Vec<String> {
    ports
        .iter()
        .enumerate()
        .map(|(i, p)| name_of(p).unwrap_or_else(|| format!("<unnamed port {}>", i)))
        .collect()
}

/// Enumerated MIDI ports, ready to be opened once.
pub struct MidiBackend {
    input: MidiInput,
    output: MidiOutput,
    in_ports: Vec<MidiInputPort>,
    out_ports: Vec<MidiOutputPort>,
    in_names: Vec<String>,
    out_names: Vec<String>,
}

impl MidiBackend {
    pub fn new(client_name: &str) -> Result<Self, RelayError> {
        let mut input = MidiInput::new(&format!("{} input", client_name))
            .map_err(|e| RelayError::MidiInit(e.to_string()))?;
        // Forward everything, SysEx and clock included
        input.ignore(Ignore::None);
        let output = MidiOutput::new(&format!("{} output", client_name))
            .map_err(|e| RelayError::MidiInit(e.to_string()))?;

        let in_ports = input.ports();
        let out_ports = output.ports();
        let in_names = port_names(&in_ports, |p| input.port_name(p).ok());
        let out_names = port_names(&out_ports, |p| output.port_name(p).ok());
        log::debug!("MIDI inputs: {:?}", in_names);
        log::debug!("MIDI outputs: {:?}", out_names);

        Ok(Self {
            input,
            output,
            in_ports,
            out_ports,
            in_names,
            out_names,
        })
    }

    pub fn input_names(&self) -> &[String] {
        &self.in_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.out_names
    }

    /// Open the selected ports. `virtual_name` names the virtual input, if one is requested.
    pub fn open(
        self,
        selection: &PortSelection,
        virtual_name: &str,
    ) -> Result<(MidirSource, Option<MidirSink>), RelayError> {
        let MidiBackend {
            input,
            output,
            in_ports,
            out_ports,
            in_names,
            out_names,
        } = self;

        let (tx, rx) = channel::<MidiEvent>();
        let callback = move |stamp: u64, message: &[u8], _: &mut ()| {
            if !message.is_empty() {
                let _ = tx.send(MidiEvent::from_micros(message, stamp));
            }
        };

        let (conn_in, in_name) = match selection.input {
            InputChoice::Index(idx) => {
                let port = in_ports.get(idx).ok_or_else(|| RelayError::PortOpen {
                    role: PortRole::Input,
                    port: idx.to_string(),
                    reason: "no such port".to_string(),
                })?;
                let name = in_names[idx].clone();
                let conn = input
                    .connect(port, "midi-net-relay-in", callback, ())
                    .map_err(|e| RelayError::PortOpen {
                        role: PortRole::Input,
                        port: name.clone(),
                        reason: e.to_string(),
                    })?;
                (conn, name)
            }
            InputChoice::Virtual => (open_virtual(input, virtual_name, callback)?, virtual_name.to_string()),
        };
        log::info!("Opened MIDI input '{}'", in_name);
        let source = MidirSource {
            conn: Some(conn_in),
            rx,
            name: in_name,
        };

        let sink = match selection.output {
            Some(idx) => {
                let port = out_ports.get(idx).ok_or_else(|| RelayError::PortOpen {
                    role: PortRole::Output,
                    port: idx.to_string(),
                    reason: "no such port".to_string(),
                })?;
                let name = out_names[idx].clone();
                let conn = output
                    .connect(port, "midi-net-relay-out")
                    .map_err(|e| RelayError::PortOpen {
                        role: PortRole::Output,
                        port: name.clone(),
                        reason: e.to_string(),
                    })?;
                log::info!("Opened MIDI output '{}'", name);
                Some(MidirSink {
                    conn: Some(conn),
                    name,
                })
            }
            None => None,
        };

        Ok((source, sink))
    }
}

#[cfg(unix)]
fn open_virtual<F>(input: MidiInput, name: &str, callback: F) -> Result<MidiInputConnection<()>, RelayError>
where
    F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
{
    use midir::os::unix::VirtualInput;
    input
        .create_virtual(name, callback, ())
        .map_err(|e| RelayError::PortOpen {
            role: PortRole::Input,
            port: name.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(not(unix))]
fn open_virtual<F>(_input: MidiInput, name: &str, _callback: F) -> Result<MidiInputConnection<()>, RelayError>
where
    F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
{
    Err(RelayError::PortOpen {
        role: PortRole::Input,
        port: name.to_string(),
        reason: "virtual ports are not supported on this platform".to_string(),
    })
}
