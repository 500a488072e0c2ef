//! Relay configuration
//!
//! Read from a JSON file (`--config`, or `relay.json` in the working
//! directory when present). Every field has a default, so a partial file or
//! no file at all is fine. Command line options are applied on top.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::net::connection::StreamTimeouts;
use crate::relay::{RelayOptions, TransformDirection};

pub const DEFAULT_CONFIG_FILE: &str = "relay.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub midi: MidiConfig,
    pub network: NetworkConfig,
    pub relay: RelaySettings,
    pub transpose: TransposeConfig,
    pub osc: OscConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub client_name: String,
    /// Case-insensitive substring picking the input port
    pub input_match: Option<String>,
    /// Case-insensitive substring picking the output port
    pub output_match: Option<String>,
    pub virtual_input: bool,
    pub virtual_port_name: String,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: "midi-net-relay".to_string(),
            input_match: None,
            output_match: None,
            virtual_input: false,
            virtual_port_name: "midi-net-relay in".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub remote_host: Option<String>,
    pub remote_port: u16,
    pub listen: bool,
    pub bind_host: String,
    pub connect_timeout_ms: u64,
    /// Bounded wait of one receive poll
    pub recv_wait_ms: u64,
    /// Longest one write may block before it is retried, then fails
    pub send_timeout_ms: u64,
    /// Outbound silence before a keepalive frame; 0 disables keepalives
    pub keepalive_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            remote_host: None,
            remote_port: 3490,
            listen: false,
            bind_host: "0.0.0.0".to_string(),
            connect_timeout_ms: 5000,
            recv_wait_ms: 1,
            send_timeout_ms: 1000,
            keepalive_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub idle_delay_ms: u64,
    pub direction: TransformDirection,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            idle_delay_ms: 100,
            direction: TransformDirection::Outgoing,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransposeConfig {
    pub initial: i32,
    pub min: i32,
    pub max: i32,
    /// Shift only messages that carry a note number
    pub notes_only: bool,
}

impl Default for TransposeConfig {
    fn default() -> Self {
        Self {
            initial: 0,
            min: -48,
            max: 48,
            notes_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    pub enabled: bool,
    pub listening_host: String,
    pub listening_port: u16,
    pub transpose_path: String,
    pub transpose_up_path: String,
    pub transpose_down_path: String,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listening_host: "127.0.0.1".to_string(),
            listening_port: 9069,
            transpose_path: "/transpose".to_string(),
            transpose_up_path: "/transposeUp".to_string(),
            transpose_down_path: "/transposeDown".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Load `path`, or the default file if it exists, or built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    log::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            idle_delay: Duration::from_millis(self.relay.idle_delay_ms),
            direction: self.relay.direction,
            keepalive: match self.network.keepalive_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms.max(1))
    }

    pub fn stream_timeouts(&self) -> StreamTimeouts {
        StreamTimeouts {
            recv_wait: Duration::from_millis(self.network.recv_wait_ms.max(1)),
            send_wait: Duration::from_millis(self.network.send_timeout_ms.max(1)),
        }
    }
}
