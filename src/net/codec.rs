//! Framing of MIDI events on the byte stream
//!
//! Frame layout (big-endian):
//! - tag: `0x4D` ('M')
//! - len: u16, payload length
//! - timestamp: f64 seconds
//! - payload: `len` raw MIDI bytes
//!
//! A frame with `len == 0` is a keepalive and carries no event.

use crate::error::RelayError;
use crate::event::MidiEvent;

pub const FRAME_TAG: u8 = 0x4D;
pub const HEADER_LEN: usize = 1 + 2 + 8;
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Serialize one event. Events too large for a frame are refused.
pub fn encode(event: &MidiEvent) -> Result<Vec<u8>, RelayError> {
    let payload = event.bytes();
    if payload.len() > MAX_PAYLOAD {
        return Err(RelayError::Frame(format!(
            "event of {} bytes exceeds the {} byte frame limit",
            payload.len(),
            MAX_PAYLOAD
        )));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(FRAME_TAG);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(&event.timestamp().to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

pub fn keepalive() -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN);
    frame.push(FRAME_TAG);
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&0f64.to_be_bytes());
    frame
}

/// Reassembles events from arbitrarily fragmented stream reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete event. A bad tag means the stream is out of
    /// sync and is fatal.
    pub fn next_event(&mut self) -> Result<Option<MidiEvent>, RelayError> {
        loop {
            if self.buf.len() < HEADER_LEN {
                return Ok(None);
            }
            if self.buf[0] != FRAME_TAG {
                return Err(RelayError::Frame(format!(
                    "unexpected tag byte {:#04x}",
                    self.buf[0]
                )));
            }
            let len = u16::from_be_bytes([self.buf[1], self.buf[2]]) as usize;
            if self.buf.len() < HEADER_LEN + len {
                return Ok(None);
            }
            let mut stamp = [0u8; 8];
            stamp.copy_from_slice(&self.buf[3..HEADER_LEN]);
            let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
            self.buf.drain(..HEADER_LEN + len);
            if len == 0 {
                continue;
            }
            return Ok(Some(MidiEvent::new(payload, f64::from_be_bytes(stamp))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all(decoder: &mut FrameDecoder) -> Vec<MidiEvent> {
        let mut events = Vec::new();
        while let Some(event) = decoder.next_event().unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode(&MidiEvent::new(vec![0x90, 60, 100], 1.0)).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + 3);
        assert_eq!(frame[0], FRAME_TAG);
        assert_eq!(&frame[1..3], &[0, 3]);
        assert_eq!(&frame[3..11], &1.0f64.to_be_bytes());
        assert_eq!(&frame[11..], &[0x90, 60, 100]);
    }

    #[test]
    fn test_split_at_every_boundary() {
        let events = vec![
            MidiEvent::new(vec![0x90, 60, 100], 0.001),
            MidiEvent::new(vec![0xF8], 0.002),
            MidiEvent::new(vec![0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7], 0.003),
        ];
        let stream: Vec<u8> = events.iter().flat_map(|e| encode(e).unwrap()).collect();
        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new();
            decoder.extend(&stream[..split]);
            let mut decoded = decode_all(&mut decoder);
            decoder.extend(&stream[split..]);
            decoded.extend(decode_all(&mut decoder));
            assert_eq!(decoded, events, "split at {}", split);
            assert_eq!(decoder.pending(), 0);
        }
    }

    #[test]
    fn test_keepalive_yields_nothing() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&keepalive());
        decoder.extend(&encode(&MidiEvent::new(vec![0xC0, 5], 2.5)).unwrap());
        let decoded = decode_all(&mut decoder);
        assert_eq!(decoded, vec![MidiEvent::new(vec![0xC0, 5], 2.5)]);
    }

    #[test]
    fn test_bad_tag_is_fatal() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"hello, world!");
        assert!(matches!(decoder.next_event(), Err(RelayError::Frame(_))));
    }

    #[test]
    fn test_oversized_event_is_refused() {
        let event = MidiEvent::new(vec![0; MAX_PAYLOAD + 1], 0.0);
        assert!(matches!(encode(&event), Err(RelayError::Frame(_))));
    }
}
