//! Harmony generation: transposed copies of existing notes

use serde::{Deserialize, Serialize};

use crate::clip::Note;

/// Transposed copies of `source`, one per (note, interval) pair.
///
/// Output is note-major, interval-minor. Copies landing outside 0-127 are
/// dropped rather than clamped; clamping would stack wrong pitches on the
/// range edge. Interval 0 must be listed explicitly to keep the unison.
pub fn extend(source: &[Note], intervals: &[i32]) -> Vec<Note> {
    source
        .iter()
        .flat_map(|note| intervals.iter().filter_map(move |&i| note.transposed(i)))
        .collect()
}

/// Counts from a [`replace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Replaced {
    pub removed: usize,
    pub inserted: usize,
}

/// Clear `target` completely, then fill it with `extend(source, intervals)`.
pub fn replace(target: &mut Vec<Note>, source: &[Note], intervals: &[i32]) -> Replaced {
    let voiced = extend(source, intervals);
    let removed = target.len();
    target.clear();
    target.extend_from_slice(&voiced);
    Replaced { removed, inserted: voiced.len() }
}

/// Chord quality, usable as a named interval set for harmonizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Major7,
    Minor7,
    Dominant7,
    Diminished7,
    HalfDiminished7,
    Sus2,
    Sus4,
    Add9,
}

impl ChordQuality {
    /// Intervals from the root, unison included
    pub fn intervals(&self) -> &'static [i32] {
        match self {
            Self::Major => &[0, 4, 7],
            Self::Minor => &[0, 3, 7],
            Self::Diminished => &[0, 3, 6],
            Self::Augmented => &[0, 4, 8],
            Self::Major7 => &[0, 4, 7, 11],
            Self::Minor7 => &[0, 3, 7, 10],
            Self::Dominant7 => &[0, 4, 7, 10],
            Self::Diminished7 => &[0, 3, 6, 9],
            Self::HalfDiminished7 => &[0, 3, 6, 10],
            Self::Sus2 => &[0, 2, 7],
            Self::Sus4 => &[0, 5, 7],
            Self::Add9 => &[0, 4, 7, 14],
        }
    }

    /// Intervals without the unison, for adding voices next to the source.
    pub fn upper_voices(&self) -> &'static [i32] {
        &self.intervals()[1..]
    }
}
