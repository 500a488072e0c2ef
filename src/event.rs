use std::fmt;

// MIDI note names for log output
const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Convert MIDI note number to note name with octave (e.g., "C4", "F#5")
pub fn midi_note_to_name(note_number: u8) -> String {
    if note_number > 127 {
        return "INVALID".to_string();
    }

    let note_index = (note_number % 12) as usize;
    let octave = (note_number / 12) as i32 - 1;

    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// Rough classification of a raw MIDI message by its status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    NoteOff,
    NoteOn,
    PolyAftertouch,
    ControlChange,
    ProgramChange,
    ChannelAftertouch,
    PitchBend,
    System,
    /// Running status or garbage: first byte is a data byte
    Data,
}

impl MessageKind {
    pub fn from_status(status: u8) -> Self {
        match status & 0xF0 {
            0x80 => MessageKind::NoteOff,
            0x90 => MessageKind::NoteOn,
            0xA0 => MessageKind::PolyAftertouch,
            0xB0 => MessageKind::ControlChange,
            0xC0 => MessageKind::ProgramChange,
            0xD0 => MessageKind::ChannelAftertouch,
            0xE0 => MessageKind::PitchBend,
            0xF0 => MessageKind::System,
            _ => MessageKind::Data,
        }
    }

    /// Messages whose byte at index 1 is a note number.
    pub fn carries_note(&self) -> bool {
        matches!(
            self,
            MessageKind::NoteOff | MessageKind::NoteOn | MessageKind::PolyAftertouch
        )
    }
}

/// One MIDI message plus the time it was captured.
///
/// The timestamp is in seconds since an arbitrary reference and never
/// decreases within one input stream. An event with no bytes means
/// "nothing available"; its timestamp carries no meaning.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MidiEvent {
    bytes: Vec<u8>,
    timestamp: f64,
}

impl MidiEvent {
    pub fn new(bytes: Vec<u8>, timestamp: f64) -> Self {
        Self { bytes, timestamp }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an event from a midir callback stamp (microseconds).
    pub fn from_micros(bytes: &[u8], stamp_us: u64) -> Self {
        Self::new(bytes.to_vec(), stamp_us as f64 / 1_000_000.0)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.bytes.first().map(|&status| MessageKind::from_status(status))
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(kind) = self.kind() else {
            return write!(f, "<empty>");
        };
        let channel = (self.bytes[0] & 0x0F) + 1;
        match (kind, self.bytes.get(1), self.bytes.get(2)) {
            (MessageKind::NoteOn, Some(&note), Some(&velocity)) => write!(
                f,
                "NoteOn ch{} {} vel {} @ {:.6}",
                channel,
                midi_note_to_name(note),
                velocity,
                self.timestamp
            ),
            (MessageKind::NoteOff, Some(&note), _) => write!(
                f,
                "NoteOff ch{} {} @ {:.6}",
                channel,
                midi_note_to_name(note),
                self.timestamp
            ),
            (MessageKind::ControlChange, Some(&cc), Some(&value)) => write!(
                f,
                "CC ch{} #{} = {} @ {:.6}",
                channel, cc, value, self.timestamp
            ),
            (MessageKind::PitchBend, Some(&lsb), Some(&msb)) => {
                let bend = (msb as i32 * 128 + lsb as i32) - 8192;
                write!(f, "PitchBend ch{} {} @ {:.6}", channel, bend, self.timestamp)
            }
            _ => write!(f, "{:?} {:02X?} @ {:.6}", kind, self.bytes, self.timestamp),
        }
    }
}
