//! Public operations against a host project
//!
//! A `Session` owns its host behind one mutex. Every operation takes the lock
//! once and holds it through its whole read-compute-write sequence, so two
//! instructions can never interleave on positional track and item indices.

use std::sync::{Mutex, MutexGuard};

use magentic_core::chunk::EnvelopeKind;
use magentic_core::curve::{self, DEFAULT_STEPS};
use magentic_core::harmony;
use magentic_core::{
    BeatNote, ChordQuality, CurveKind, EntityRef, EnvelopePoint, EnvelopeState, Handle, ItemFrame,
    MagenticError, Note, NoteView, Qn, Result, Seconds, Ticks, TrackMix, TrackParam,
};
use serde::{Deserialize, Serialize};

use crate::host::{Host, TOGGLE_VOLUME_ENVELOPE};
use crate::snapshot::{self, ProjectSnapshot};

/// A MIDI item addressed by positional indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAddr {
    #[serde(rename = "track_index")]
    pub track: usize,
    #[serde(rename = "item_index")]
    pub item: usize,
}

impl ItemAddr {
    pub fn new(track: usize, item: usize) -> Self {
        Self { track, item }
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::item(self.track, self.item)
    }
}

/// Which voices to derive: explicit semitone offsets or a named chord.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Voicing {
    Intervals(Vec<i32>),
    Chord(ChordQuality),
}

impl Voicing {
    /// Offsets for adding voices next to the source: a chord skips its unison.
    pub fn added_voices(&self) -> &[i32] {
        match self {
            Self::Intervals(intervals) => intervals,
            Self::Chord(chord) => chord.upper_voices(),
        }
    }

    /// Offsets for a target that replaces the source: a chord keeps its unison.
    pub fn full_voicing(&self) -> &[i32] {
        match self {
            Self::Intervals(intervals) => intervals,
            Self::Chord(chord) => chord.intervals(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    #[default]
    Seconds,
    /// Project-absolute quarter-notes
    Beats,
}

/// Volume automation to write onto one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRequest {
    pub points: Vec<EnvelopePoint>,
    #[serde(default)]
    pub curve: CurveKind,
    #[serde(default)]
    pub time_unit: TimeUnit,
    /// Overrides the session's interpolation steps
    #[serde(default)]
    pub steps: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreatedItem {
    pub track: usize,
    pub item: usize,
    pub position: Seconds,
    pub length: Seconds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesWritten {
    pub added: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesDeleted {
    pub removed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonyWritten {
    pub source_notes: usize,
    pub removed: usize,
    pub inserted: usize,
    /// (note, interval) pairs that left the MIDI range
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationWritten {
    pub track: usize,
    pub points: usize,
    /// The envelope had to be materialized with the toggle command first
    pub materialized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalStatus {
    Removed,
    AlreadyRemoved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationRemoved {
    pub track: usize,
    pub status: RemovalStatus,
    /// Points held before clearing, when the old chunk could be read
    pub points_removed: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityChanged {
    pub track: usize,
    pub visible: bool,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixApplied {
    pub track: usize,
    pub applied: Vec<TrackParam>,
}

/// Resolved handles and coordinate frame of one item's active take.
struct Take {
    addr: ItemAddr,
    take: Handle,
    frame: ItemFrame,
}

pub struct Session<H: Host> {
    host: Mutex<H>,
    curve_steps: usize,
}

impl<H: Host> Session<H> {
    pub fn new(host: H) -> Self {
        Self { host: Mutex::new(host), curve_steps: DEFAULT_STEPS }
    }

    /// Default number of constant-dB steps per segment; zero is rejected.
    pub fn with_curve_steps(mut self, steps: usize) -> Result<Self> {
        if steps == 0 {
            return Err(MagenticError::InvalidArgument("curve steps must be at least 1".into()));
        }
        self.curve_steps = steps;
        Ok(self)
    }

    pub fn into_host(self) -> Result<H> {
        self.host.into_inner().map_err(|_| MagenticError::LockPoisoned)
    }

    fn lock(&self) -> Result<MutexGuard<'_, H>> {
        self.host.lock().map_err(|_| MagenticError::LockPoisoned)
    }

    /// Create an empty MIDI item at `position` beats spanning `length` beats.
    pub fn create_midi_item(&self, track: usize, position: f64, length: f64) -> Result<CreatedItem> {
        if !position.is_finite() || position < 0.0 || !length.is_finite() || length <= 0.0 {
            return Err(MagenticError::InvalidArgument(format!(
                "item needs a position >= 0 and a positive length in beats, got {position} / {length}"
            )));
        }
        let mut host = self.lock()?;
        let track_handle = resolve_track(&mut *host, track)?;
        let start = host.qn_to_time(Qn(position))?;
        let end = host.qn_to_time(Qn(position + length))?;
        let item = host
            .create_midi_item(&track_handle, start, end)?
            .require(EntityRef::track(track), "new item")?;

        // Items are kept in position order, so the new index has to be looked up
        let count = host.count_items(&track_handle)?;
        let mut index = None;
        for i in 0..count {
            if host.item(&track_handle, i)? == item {
                index = Some(i);
                break;
            }
        }
        let index = index.ok_or_else(|| MagenticError::Host {
            call: "CreateNewMIDIItemInProj".into(),
            message: format!("created item {item} is not listed on track {track}"),
        })?;

        tracing::info!("Created MIDI item {} on track {} ({:.3}s..{:.3}s)", index, track, start.0, end.0);
        Ok(CreatedItem { track, item: index, position: start, length: Seconds(end.0 - start.0) })
    }

    /// Insert notes given in item-relative beats.
    ///
    /// Every note is converted before the first insert, so one invalid note
    /// rejects the whole batch without touching the item.
    pub fn add_midi_notes(&self, addr: ItemAddr, notes: &[BeatNote]) -> Result<NotesWritten> {
        let mut host = self.lock()?;
        let take = resolve_take(&mut *host, addr)?;
        let placed = notes
            .iter()
            .map(|n| n.to_note(&take.frame))
            .collect::<Result<Vec<Note>>>()?;
        write_notes(&mut *host, &take, &placed)?;
        let total = host.count_notes(&take.take)?;
        tracing::info!("Added {} notes to {}", placed.len(), addr.entity());
        Ok(NotesWritten { added: placed.len(), total })
    }

    pub fn read_midi_notes(&self, addr: ItemAddr) -> Result<Vec<NoteView>> {
        let mut host = self.lock()?;
        let take = resolve_take(&mut *host, addr)?;
        let notes = read_notes(&mut *host, &take.take)?;
        let mut views = Vec::with_capacity(notes.len());
        for (index, note) in notes.iter().enumerate() {
            let start = take.frame.ticks_to_beat(note.start);
            let end = take.frame.ticks_to_beat(note.end);
            let start_time = host.qn_to_time(take.frame.ticks_to_project_qn(note.start))?;
            let end_time = host.qn_to_time(take.frame.ticks_to_project_qn(note.end))?;
            views.push(NoteView {
                index,
                pitch: note.pitch,
                velocity: note.velocity,
                channel: note.channel,
                start,
                length: end - start,
                start_time: start_time.0,
                end_time: end_time.0,
            });
        }
        Ok(views)
    }

    /// Delete every note of an item, or only those whose pitch is listed.
    pub fn delete_midi_notes(&self, addr: ItemAddr, pitches: Option<&[u8]>) -> Result<NotesDeleted> {
        let mut host = self.lock()?;
        let take = resolve_take(&mut *host, addr)?;
        let count = host.count_notes(&take.take)?;
        let mut removed = 0;
        // Highest index first so earlier indices stay valid
        for index in (0..count).rev() {
            let matches = match pitches {
                None => true,
                Some(pitches) => pitches.contains(&host.note(&take.take, index)?.pitch),
            };
            if matches {
                host.delete_note(&take.take, index)?;
                removed += 1;
            }
        }
        let remaining = host.count_notes(&take.take)?;
        tracing::info!("Deleted {} notes from {} ({} remain)", removed, addr.entity(), remaining);
        Ok(NotesDeleted { removed, remaining })
    }

    /// Add transposed copies of the source notes to `target` (the source item
    /// itself when `None`) at the same offsets from the item start.
    pub fn extend_harmony(&self, source: ItemAddr, target: Option<ItemAddr>, voicing: &Voicing) -> Result<HarmonyWritten> {
        let intervals = voicing.added_voices();
        let mut host = self.lock()?;
        let source_take = resolve_take(&mut *host, source)?;
        let source_notes = read_notes(&mut *host, &source_take.take)?;
        let target_take = match target {
            Some(addr) if addr != source => resolve_take(&mut *host, addr)?,
            _ => resolve_take(&mut *host, source)?,
        };

        let placed = retime_notes(&source_notes, &source_take.frame, &target_take.frame);
        let voiced = harmony::extend(&placed, intervals);
        write_notes(&mut *host, &target_take, &voiced)?;

        let dropped = source_notes.len() * intervals.len() - voiced.len();
        if dropped > 0 {
            tracing::warn!("Dropped {} harmony notes outside the MIDI range", dropped);
        }
        tracing::info!(
            "Extended {} notes from {} into {} with intervals {:?}",
            source_notes.len(),
            source.entity(),
            target_take.addr.entity(),
            intervals
        );
        Ok(HarmonyWritten { source_notes: source_notes.len(), removed: 0, inserted: voiced.len(), dropped })
    }

    /// Clear `target` completely, then fill it with the source's harmony.
    ///
    /// Deletion is verified before the first insert; if any note survives the
    /// clear, nothing is inserted and `IncompleteDelete` is returned.
    pub fn replace_harmony(&self, source: ItemAddr, target: ItemAddr, voicing: &Voicing) -> Result<HarmonyWritten> {
        let intervals = voicing.full_voicing();
        let mut host = self.lock()?;
        let source_take = resolve_take(&mut *host, source)?;
        let target_take = resolve_take(&mut *host, target)?;
        let source_notes = read_notes(&mut *host, &source_take.take)?;
        let placed = retime_notes(&source_notes, &source_take.frame, &target_take.frame);

        let mut lane = read_notes(&mut *host, &target_take.take)?;
        let replaced = harmony::replace(&mut lane, &placed, intervals);

        for index in (0..replaced.removed).rev() {
            host.delete_note(&target_take.take, index)?;
        }
        let remaining = host.count_notes(&target_take.take)?;
        if remaining > 0 {
            tracing::error!("{} notes survived clearing {}, nothing inserted", remaining, target.entity());
            return Err(MagenticError::IncompleteDelete { target: target.entity(), remaining });
        }
        write_notes(&mut *host, &target_take, &lane)?;

        tracing::info!(
            "Replaced {} notes in {} with {} from {}",
            replaced.removed,
            target.entity(),
            replaced.inserted,
            source.entity()
        );
        Ok(HarmonyWritten {
            source_notes: source_notes.len(),
            removed: replaced.removed,
            inserted: replaced.inserted,
            dropped: source_notes.len() * intervals.len() - replaced.inserted,
        })
    }

    /// Replace the track's volume automation with the request's points.
    pub fn write_volume_automation(&self, track: usize, request: &AutomationRequest) -> Result<AutomationWritten> {
        let steps = request.steps.unwrap_or(self.curve_steps);
        if request.points.is_empty() {
            return Err(MagenticError::InvalidArgument("automation needs at least one point".into()));
        }
        let mut host = self.lock()?;
        let track_handle = resolve_track(&mut *host, track)?;

        let mut points = request.points.clone();
        if request.time_unit == TimeUnit::Beats {
            for p in &mut points {
                p.time = host.qn_to_time(Qn(p.time))?.0;
            }
        }
        curve::sort_by_time(&mut points);
        let expanded = curve::interpolate(&points, steps, request.curve)?;

        let (envelope, materialized) = volume_envelope(&mut *host, track, &track_handle)?;
        let state = EnvelopeState::volume(expanded);
        host.set_envelope_chunk(&envelope, &state.to_chunk())?;
        host.sort_envelope_points(&envelope)?;
        host.refresh_ui()?;

        tracing::info!(
            "Wrote {} volume points ({:?}) to track {}",
            state.points.len(),
            request.curve,
            track
        );
        Ok(AutomationWritten { track, points: state.points.len(), materialized })
    }

    /// Deactivate, hide and empty the track's volume envelope.
    pub fn remove_volume_automation(&self, track: usize) -> Result<AutomationRemoved> {
        let mut host = self.lock()?;
        let track_handle = resolve_track(&mut *host, track)?;
        let envelope = host.envelope_by_name(&track_handle, EnvelopeKind::Volume.name())?;
        if envelope.is_null() {
            tracing::info!("Track {} has no volume envelope, already removed", track);
            return Ok(AutomationRemoved { track, status: RemovalStatus::AlreadyRemoved, points_removed: None });
        }

        let old = host.envelope_chunk(&envelope)?;
        let points_removed = match old.parse::<EnvelopeState>() {
            Ok(state) => Some(state.points.len()),
            Err(e) => {
                tracing::warn!("Could not read the old volume envelope of track {}: {}", track, e);
                None
            }
        };
        host.set_envelope_chunk(&envelope, &EnvelopeState::cleared().to_chunk())?;
        host.refresh_ui()?;
        tracing::info!("Removed volume automation from track {}", track);
        Ok(AutomationRemoved { track, status: RemovalStatus::Removed, points_removed })
    }

    /// Show or hide the volume lane without touching its points.
    pub fn set_envelope_visibility(&self, track: usize, visible: bool) -> Result<VisibilityChanged> {
        let mut host = self.lock()?;
        let track_handle = resolve_track(&mut *host, track)?;
        let existing = host.envelope_by_name(&track_handle, EnvelopeKind::Volume.name())?;
        if existing.is_null() && !visible {
            return Ok(VisibilityChanged { track, visible, changed: false });
        }

        let (envelope, materialized) = volume_envelope(&mut *host, track, &track_handle)?;
        let state: EnvelopeState = host.envelope_chunk(&envelope)?.parse()?;
        if state.visible == visible && state.in_lane == visible {
            return Ok(VisibilityChanged { track, visible, changed: materialized });
        }
        host.set_envelope_chunk(&envelope, &state.with_visibility(visible).to_chunk())?;
        host.refresh_ui()?;
        tracing::info!("Volume envelope of track {} visible={}", track, visible);
        Ok(VisibilityChanged { track, visible, changed: true })
    }

    pub fn set_track_mix(&self, track: usize, mix: &TrackMix) -> Result<MixApplied> {
        if mix.is_empty() {
            return Err(MagenticError::InvalidArgument("mix update sets no property".into()));
        }
        let writes = mix.writes();
        let mut host = self.lock()?;
        let track_handle = resolve_track(&mut *host, track)?;
        for (param, value) in &writes {
            host.set_track_param(&track_handle, *param, *value)?;
        }
        tracing::debug!("Applied {:?} to track {}", writes, track);
        Ok(MixApplied { track, applied: writes.into_iter().map(|(p, _)| p).collect() })
    }

    pub fn snapshot(&self) -> Result<ProjectSnapshot> {
        let mut host = self.lock()?;
        snapshot::capture(&mut *host)
    }
}

fn resolve_track(host: &mut impl Host, index: usize) -> Result<Handle> {
    let target = EntityRef::track(index);
    let count = host.count_tracks()?;
    if index >= count {
        return Err(MagenticError::invalid_reference(target, format!("project has {count} tracks")));
    }
    host.track(index)?.require(target, "track")
}

fn resolve_take(host: &mut impl Host, addr: ItemAddr) -> Result<Take> {
    let track = resolve_track(host, addr.track)?;
    let target = addr.entity();
    let count = host.count_items(&track)?;
    if addr.item >= count {
        return Err(MagenticError::invalid_reference(
            target,
            format!("track {} has {count} items", addr.track),
        ));
    }
    let item = host.item(&track, addr.item)?.require(target, "item")?;
    let take = host.active_take(&item)?.require(target, "take")?;

    let span = host.item_span(&item)?;
    let start_qn = host.time_to_qn(span.position)?;
    let timebase = host.take_timebase(&take, start_qn)?;
    Ok(Take { addr, take, frame: ItemFrame { timebase, position: span.position, start_qn } })
}

fn read_notes(host: &mut impl Host, take: &Handle) -> Result<Vec<Note>> {
    let count = host.count_notes(take)?;
    (0..count).map(|i| host.note(take, i)).collect()
}

/// Insert a batch unsorted, then sort once.
fn write_notes(host: &mut impl Host, take: &Take, notes: &[Note]) -> Result<()> {
    for (i, note) in notes.iter().enumerate() {
        host.insert_note(&take.take, note).map_err(|e| match e {
            MagenticError::Host { message, .. } => MagenticError::Host {
                call: "MIDI_InsertNote".into(),
                message: format!("{} note {i}: {message}", take.addr.entity()),
            },
            other => other,
        })?;
    }
    host.sort_notes(&take.take)
}

/// Source notes at the same item-relative offsets in the target's resolution.
fn retime_notes(notes: &[Note], from: &ItemFrame, to: &ItemFrame) -> Vec<Note> {
    notes
        .iter()
        .map(|n| {
            let start = from.retime(n.start, to);
            let end = from.retime(n.end, to).max(Ticks(start.0 + 1));
            Note { start, end, ..*n }
        })
        .collect()
}

/// Volume envelope handle, materializing the envelope when the track has none.
///
/// The host only creates the envelope through its toggle command, which acts
/// on the selected tracks, so the target is made the sole selection first and
/// the handle is queried again afterwards.
fn volume_envelope(host: &mut impl Host, track: usize, track_handle: &Handle) -> Result<(Handle, bool)> {
    let name = EnvelopeKind::Volume.name();
    let envelope = host.envelope_by_name(track_handle, name)?;
    if envelope.is_valid() {
        return Ok((envelope, false));
    }

    tracing::debug!("Track {} has no volume envelope, toggling it on", track);
    let count = host.count_tracks()?;
    for i in 0..count {
        let other = host.track(i)?;
        if other.is_valid() {
            host.set_track_selected(&other, i == track)?;
        }
    }
    host.run_command(TOGGLE_VOLUME_ENVELOPE)?;
    let envelope = host
        .envelope_by_name(track_handle, name)?
        .require(EntityRef::track(track), "volume envelope")?;
    Ok((envelope, true))
}
