//! magentic-core: musical time, harmony and automation translation for a DAW host
//!
//! Everything here is pure computation over host-neutral types. Talking to the
//! host lives in `magentic-services`.

pub mod chunk;
mod clip;
pub mod curve;
mod error;
mod handle;
pub mod harmony;
pub mod timebase;
mod track;

pub use chunk::{EnvelopeKind, EnvelopeState};
pub use clip::{BeatNote, MidiItem, Note, NoteView, DEFAULT_VELOCITY, MAX_PITCH, MAX_VELOCITY};
pub use curve::{CurveKind, EnvelopePoint, PointShape};
pub use error::{MagenticError, Result};
pub use handle::Handle;
pub use harmony::{ChordQuality, Replaced};
pub use timebase::{ConstantTempo, ItemFrame, Qn, Seconds, TempoMap, TempoSegments, Ticks, TimeBase};
pub use track::{native_to_rgb, rgb_to_native, EntityRef, TrackMix, TrackParam};
