//! The host's scripting surface
//!
//! Every method is one synchronous call into the live project. Calls may block
//! and are not reentrant; `Session` serializes them behind a single lock.

use magentic_core::{Handle, MidiItem, Note, Qn, Result, Seconds, TimeBase, TrackParam};

/// Built-in command toggling the volume envelope of the selected tracks.
pub const TOGGLE_VOLUME_ENVELOPE: u32 = 40406;

pub trait Host: Send {
    // Project
    fn count_tracks(&mut self) -> Result<usize>;
    fn track(&mut self, index: usize) -> Result<Handle>;
    fn tempo_bpm(&mut self) -> Result<f64>;
    fn cursor_position(&mut self) -> Result<Seconds>;
    fn is_playing(&mut self) -> Result<bool>;
    fn time_to_qn(&mut self, time: Seconds) -> Result<Qn>;
    fn qn_to_time(&mut self, qn: Qn) -> Result<Seconds>;

    // Tracks
    fn track_param(&mut self, track: &Handle, param: TrackParam) -> Result<f64>;
    fn set_track_param(&mut self, track: &Handle, param: TrackParam, value: f64) -> Result<()>;
    fn track_name(&mut self, track: &Handle) -> Result<String>;
    fn set_track_selected(&mut self, track: &Handle, selected: bool) -> Result<()>;
    fn count_fx(&mut self, track: &Handle) -> Result<usize>;
    fn fx_name(&mut self, track: &Handle, index: usize) -> Result<String>;
    fn fx_enabled(&mut self, track: &Handle, index: usize) -> Result<bool>;

    // Items and takes
    fn count_items(&mut self, track: &Handle) -> Result<usize>;
    fn item(&mut self, track: &Handle, index: usize) -> Result<Handle>;
    fn item_span(&mut self, item: &Handle) -> Result<MidiItem>;
    fn create_midi_item(&mut self, track: &Handle, start: Seconds, end: Seconds) -> Result<Handle>;
    fn active_take(&mut self, item: &Handle) -> Result<Handle>;
    /// Absolute QN position to the take's (fractional) tick position.
    fn take_qn_to_ticks(&mut self, take: &Handle, qn: Qn) -> Result<f64>;

    // Notes
    fn count_notes(&mut self, take: &Handle) -> Result<usize>;
    fn note(&mut self, take: &Handle, index: usize) -> Result<Note>;
    /// Appends without re-sorting; call `sort_notes` after a batch.
    fn insert_note(&mut self, take: &Handle, note: &Note) -> Result<()>;
    fn delete_note(&mut self, take: &Handle, index: usize) -> Result<()>;
    fn sort_notes(&mut self, take: &Handle) -> Result<()>;

    // Envelopes
    fn envelope_by_name(&mut self, track: &Handle, name: &str) -> Result<Handle>;
    fn envelope_chunk(&mut self, envelope: &Handle) -> Result<String>;
    fn set_envelope_chunk(&mut self, envelope: &Handle, chunk: &str) -> Result<()>;
    fn sort_envelope_points(&mut self, envelope: &Handle) -> Result<()>;

    // Misc
    fn run_command(&mut self, command: u32) -> Result<()>;
    fn refresh_ui(&mut self) -> Result<()>;

    /// Tick resolution of a take, measured by converting two positions one
    /// quarter-note apart rather than assuming a fixed value.
    fn take_timebase(&mut self, take: &Handle, origin: Qn) -> Result<TimeBase> {
        let at_origin = self.take_qn_to_ticks(take, origin)?;
        let one_later = self.take_qn_to_ticks(take, Qn(origin.0 + 1.0))?;
        TimeBase::from_measurement(at_origin, one_later)
    }
}
