//! MIDI items and the notes they contain

use serde::{Deserialize, Serialize};

use crate::error::{MagenticError, Result};
use crate::timebase::{ItemFrame, Seconds, Ticks};

pub const MAX_PITCH: u8 = 127;
pub const MAX_VELOCITY: u8 = 127;
pub const DEFAULT_VELOCITY: u8 = 100;

/// A MIDI note inside a note container, positioned in item-relative ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI note number (0-127, 60 = middle C)
    pub pitch: u8,
    pub start: Ticks,
    pub end: Ticks,
    pub velocity: u8,
    pub channel: u8,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub muted: bool,
}

impl Note {
    pub fn new(pitch: u8, start: Ticks, end: Ticks, velocity: u8) -> Self {
        Self {
            pitch: pitch.min(MAX_PITCH),
            start,
            end,
            velocity: velocity.min(MAX_VELOCITY),
            channel: 0,
            selected: false,
            muted: false,
        }
    }

    /// Copy shifted by `interval` semitones, or `None` when it leaves 0-127.
    pub fn transposed(&self, interval: i32) -> Option<Note> {
        let pitch = self.pitch as i32 + interval;
        if !(0..=MAX_PITCH as i32).contains(&pitch) {
            return None;
        }
        Some(Note { pitch: pitch as u8, ..*self })
    }
}

/// Caller-facing note: item-relative beats (quarter-notes).
///
/// Velocity 0 is raised to 1 on conversion, since a zero velocity reads as a
/// note-off in MIDI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatNote {
    pub pitch: i32,
    /// Start beat relative to the item
    pub start: f64,
    /// Length in beats
    pub length: f64,
    #[serde(default = "default_velocity")]
    pub velocity: i32,
    #[serde(default)]
    pub channel: u8,
}

fn default_velocity() -> i32 {
    DEFAULT_VELOCITY as i32
}

impl BeatNote {
    pub fn new(pitch: i32, start: f64, length: f64) -> Self {
        Self { pitch, start, length, velocity: default_velocity(), channel: 0 }
    }

    /// Place the note in an item's tick grid.
    ///
    /// Pitch and velocity are clamped into MIDI range; a non-positive or
    /// non-finite length is rejected since the note would have no extent.
    pub fn to_note(&self, frame: &ItemFrame) -> Result<Note> {
        if !self.start.is_finite() || !self.length.is_finite() || self.length <= 0.0 {
            return Err(MagenticError::InvalidArgument(format!(
                "note at beat {} needs a positive length, got {}",
                self.start, self.length
            )));
        }
        let start = frame.beat_to_ticks(self.start);
        let mut end = frame.beat_to_ticks(self.start + self.length);
        if end <= start {
            // Shorter than one tick after rounding
            end = Ticks(start.0 + 1);
        }
        Ok(Note {
            pitch: self.pitch.clamp(0, MAX_PITCH as i32) as u8,
            start,
            end,
            velocity: self.velocity.clamp(1, MAX_VELOCITY as i32) as u8,
            channel: self.channel.min(15),
            selected: false,
            muted: false,
        })
    }
}

/// Read-back view of a note in musician units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteView {
    pub index: usize,
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    /// Item-relative beats
    pub start: f64,
    pub length: f64,
    /// Project-absolute seconds
    pub start_time: f64,
    pub end_time: f64,
}

/// A MIDI item as placed on a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MidiItem {
    pub position: Seconds,
    pub length: Seconds,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::{ConstantTempo, TimeBase};

    fn frame() -> ItemFrame {
        ItemFrame::new(&ConstantTempo { bpm: 120.0 }, TimeBase::default(), Seconds(2.0))
    }

    #[test]
    fn test_transpose_drops_out_of_range() {
        let note = Note::new(120, Ticks(0), Ticks(960), 90);
        assert_eq!(note.transposed(7).map(|n| n.pitch), Some(127));
        assert_eq!(note.transposed(8), None);
        assert_eq!(Note::new(3, Ticks(0), Ticks(1), 1).transposed(-4), None);
    }

    #[test]
    fn test_beat_note_placement() {
        let note = BeatNote::new(60, 2.0, 0.5).to_note(&frame()).unwrap();
        assert_eq!((note.start, note.end), (Ticks(1920), Ticks(2400)));
        assert_eq!(note.velocity, DEFAULT_VELOCITY);
    }

    #[test]
    fn test_beat_note_clamps_pitch_and_velocity() {
        let note = BeatNote { pitch: 140, velocity: 0, ..BeatNote::new(0, 0.0, 1.0) };
        let placed = note.to_note(&frame()).unwrap();
        assert_eq!((placed.pitch, placed.velocity), (127, 1));
    }

    #[test]
    fn test_beat_note_rejects_empty_length() {
        assert!(BeatNote::new(60, 0.0, 0.0).to_note(&frame()).is_err());
        assert!(BeatNote::new(60, f64::NAN, 1.0).to_note(&frame()).is_err());
        let tiny = BeatNote::new(60, 0.0, 1e-6).to_note(&frame()).unwrap();
        assert!(tiny.start < tiny.end);
    }
}
