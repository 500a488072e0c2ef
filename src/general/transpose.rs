use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::event::{MessageKind, MidiEvent};

/// Byte index holding the note number in channel voice messages.
pub const NOTE_INDEX: usize = 1;

/// Clamp a shift request into the configured range.
pub fn clamp_transpose(value: i32, min: i32, max: i32) -> i32 {
    value.clamp(min, max)
}

/// Add `semitones` to `buf[index]`, clamped to the MIDI data range 0..=127.
/// Buffers too short to have that index are left alone.
pub fn shift_byte(buf: &mut [u8], index: usize, semitones: i32) {
    if let Some(byte) = buf.get_mut(index) {
        *byte = (*byte as i32).saturating_add(semitones).clamp(0, 127) as u8;
    }
}

/// Maps one event to one event of the same length.
pub trait Transform: Send {
    fn apply(&self, event: MidiEvent) -> MidiEvent;
}

/// Leaves every event untouched.
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, event: MidiEvent) -> MidiEvent {
        event
    }
}

/// Live-adjustable shift amount, shared between the relay and its controllers
/// (console, OSC). Every write is clamped to `min..=max`.
#[derive(Clone, Debug)]
pub struct ShiftControl {
    semitones: Arc<AtomicI32>,
    min: i32,
    max: i32,
}

impl ShiftControl {
    pub fn new(initial: i32, min: i32, max: i32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            semitones: Arc::new(AtomicI32::new(clamp_transpose(initial, min, max))),
            min,
            max,
        }
    }

    pub fn get(&self) -> i32 {
        self.semitones.load(Ordering::Relaxed)
    }

    /// Store a new value and return what was actually stored.
    pub fn set(&self, value: i32) -> i32 {
        let clamped = clamp_transpose(value, self.min, self.max);
        self.semitones.store(clamped, Ordering::SeqCst);
        clamped
    }

    /// Adjust by `delta`; returns `(old, new)`.
    pub fn nudge(&self, delta: i32) -> (i32, i32) {
        let mut current = self.get();
        loop {
            let next = clamp_transpose(current.saturating_add(delta), self.min, self.max);
            match self.semitones.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return (current, next),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn range(&self) -> (i32, i32) {
        (self.min, self.max)
    }
}

/// Note-number shift. By default only Note On/Off and Poly Aftertouch are
/// touched; with `notes_only` off, index 1 of every event is shifted.
pub struct PitchShift {
    control: ShiftControl,
    notes_only: bool,
}

impl PitchShift {
    pub fn new(control: ShiftControl, notes_only: bool) -> Self {
        Self {
            control,
            notes_only,
        }
    }
}

impl Transform for PitchShift {
    fn apply(&self, mut event: MidiEvent) -> MidiEvent {
        let semitones = self.control.get();
        if semitones == 0 && self.notes_only {
            return event;
        }
        let eligible = match event.kind() {
            Some(kind) => !self.notes_only || kind.carries_note(),
            None => false,
        };
        if eligible {
            shift_byte(event.bytes_mut(), NOTE_INDEX, semitones);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(semitones: i32, notes_only: bool) -> PitchShift {
        PitchShift::new(ShiftControl::new(semitones, i32::MIN, i32::MAX), notes_only)
    }

    #[test]
    fn test_note_on_is_shifted() {
        let out = shift(7, true).apply(MidiEvent::new(vec![0x90, 60, 100], 0.5));
        assert_eq!(out.bytes(), &[0x90, 67, 100]);
        assert_eq!(out.timestamp(), 0.5);
    }

    #[test]
    fn test_other_messages_untouched_when_notes_only() {
        let cc = MidiEvent::new(vec![0xB0, 64, 127], 0.0);
        assert_eq!(shift(12, true).apply(cc.clone()), cc);
        let clock = MidiEvent::new(vec![0xF8], 0.0);
        assert_eq!(shift(12, true).apply(clock.clone()), clock);
    }

    #[test]
    fn test_positional_mode_shifts_any_message() {
        let out = shift(3, false).apply(MidiEvent::new(vec![0xB0, 10, 5], 0.0));
        assert_eq!(out.bytes(), &[0xB0, 13, 5]);
    }

    #[test]
    fn test_length_is_preserved() {
        let cases: [&[u8]; 4] = [&[], &[0x90], &[0x90, 60], &[0x90, 60, 100]];
        for notes_only in [true, false] {
            for bytes in cases {
                for semitones in [-300, -1, 0, 1, 300] {
                    let out = shift(semitones, notes_only)
                        .apply(MidiEvent::new(bytes.to_vec(), 0.0));
                    assert_eq!(out.bytes().len(), bytes.len());
                }
            }
        }
    }

    #[test]
    fn test_clamping_law() {
        for value in [0u8, 1, 60, 126, 127, 128, 200, 255] {
            for semitones in [i32::MIN, -1000, -128, -1, 0, 1, 127, 1000, i32::MAX] {
                let out = shift(semitones, false).apply(MidiEvent::new(vec![0x90, value, 1], 0.0));
                assert!(out.bytes()[NOTE_INDEX] <= 127, "{} + {}", value, semitones);
            }
        }
        let low = shift(-24, true).apply(MidiEvent::new(vec![0x80, 10, 0], 0.0));
        assert_eq!(low.bytes()[1], 0);
        let high = shift(24, true).apply(MidiEvent::new(vec![0x80, 120, 0], 0.0));
        assert_eq!(high.bytes()[1], 127);
    }

    #[test]
    fn test_shift_control_clamps() {
        let control = ShiftControl::new(100, -48, 48);
        assert_eq!(control.get(), 48);
        assert_eq!(control.set(-60), -48);
        assert_eq!(control.nudge(-1), (-48, -48));
        assert_eq!(control.nudge(5), (-48, -43));
    }

    #[test]
    fn test_shift_control_is_shared() {
        let control = ShiftControl::new(0, -12, 12);
        let transform = PitchShift::new(control.clone(), true);
        control.set(2);
        let out = transform.apply(MidiEvent::new(vec![0x90, 60, 1], 0.0));
        assert_eq!(out.bytes()[1], 62);
    }

    #[test]
    fn test_swapped_range_is_normalized() {
        let control = ShiftControl::new(0, 10, -10);
        assert_eq!(control.range(), (-10, 10));
    }
}
