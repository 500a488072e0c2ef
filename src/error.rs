use std::fmt;
use std::io;

/// Which side of the relay a MIDI port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Input,
    Output,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Input => write!(f, "input"),
            PortRole::Output => write!(f, "output"),
        }
    }
}

/// Error type for everything the relay can fail at
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to initialize MIDI: {0}")]
    MidiInit(String),

    #[error("No MIDI input ports available")]
    NoInputPort,

    #[error("Failed to open MIDI {role} port {port}: {reason}")]
    PortOpen {
        role: PortRole,
        port: String,
        reason: String,
    },

    #[error("Invalid {role} port selection '{answer}': expected a number in 0..{count}")]
    InvalidSelection {
        role: PortRole,
        answer: String,
        count: usize,
    },

    #[error("Port selection aborted: {0}")]
    Prompt(#[source] io::Error),

    #[error("Could not connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("MIDI output write failed: {0}")]
    DeviceWrite(String),

    #[error("MIDI input lost: {0}")]
    InputLost(String),

    #[error("Send to peer failed: {0}")]
    Send(#[source] io::Error),

    #[error("Receive from peer failed: {0}")]
    Recv(#[source] io::Error),

    #[error("Bad frame: {0}")]
    Frame(String),
}

impl RelayError {
    /// Errors raised before a session holds any resource.
    pub fn is_pre_start(&self) -> bool {
        matches!(
            self,
            RelayError::MidiInit(_)
                | RelayError::NoInputPort
                | RelayError::PortOpen { .. }
                | RelayError::Prompt(_)
                | RelayError::Connect { .. }
        )
    }

    /// Errors the caller handles locally (skip the event, ask again).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::DeviceWrite(_) | RelayError::InvalidSelection { .. }
        )
    }

    /// Process exit status for a fatal error.
    pub fn exit_code(&self) -> u8 {
        if self.is_pre_start() {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RelayError::NoInputPort.exit_code(), 2);
        let connect = RelayError::Connect {
            target: "peer:3490".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(connect.exit_code(), 2);

        let send = RelayError::Send(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(send.exit_code(), 1);
        assert!(!send.is_recoverable());
        assert_eq!(RelayError::InputLost("unplugged".to_string()).exit_code(), 1);
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(RelayError::DeviceWrite("unplugged".to_string()).is_recoverable());
        let invalid = RelayError::InvalidSelection {
            role: PortRole::Input,
            answer: "5".to_string(),
            count: 3,
        };
        assert!(invalid.is_recoverable());
        assert_eq!(
            invalid.to_string(),
            "Invalid input port selection '5': expected a number in 0..3"
        );
    }
}
