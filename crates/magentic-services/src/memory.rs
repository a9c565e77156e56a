//! In-process simulated project
//!
//! Behaves like the live host where this layer depends on it: handles are
//! typed pointer strings, items stay sorted by position, notes are appended
//! unsorted until `sort_notes`, and a track's volume envelope does not exist
//! until the toggle command has run with that track selected.

use std::collections::HashMap;

use magentic_core::{
    EnvelopeState, Handle, MagenticError, MidiItem, Note, Qn, Result, Seconds, TempoMap, TempoSegments,
    TimeBase, TrackParam,
};

use crate::host::{Host, TOGGLE_VOLUME_ENVELOPE};

const TRACK: &str = "MediaTrack";
const ITEM: &str = "MediaItem";
const TAKE: &str = "MediaItem_Take";
const ENVELOPE: &str = "TrackEnvelope";

#[derive(Debug, Clone)]
struct MemFx {
    name: String,
    enabled: bool,
}

#[derive(Debug, Clone)]
struct MemItem {
    id: u64,
    take: u64,
    position: Seconds,
    length: Seconds,
    notes: Vec<Note>,
}

#[derive(Debug, Clone)]
struct MemEnvelope {
    id: u64,
    chunk: String,
}

#[derive(Debug, Clone)]
struct MemTrack {
    id: u64,
    name: String,
    params: HashMap<TrackParam, f64>,
    selected: bool,
    fx: Vec<MemFx>,
    items: Vec<MemItem>,
    volume_envelope: Option<MemEnvelope>,
}

impl MemTrack {
    fn param(&self, param: TrackParam) -> f64 {
        let default = if param == TrackParam::Volume { 1.0 } else { 0.0 };
        self.params.get(&param).copied().unwrap_or(default)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryHost {
    tempo: TempoSegments,
    timebase: TimeBase,
    tracks: Vec<MemTrack>,
    cursor: Seconds,
    playing: bool,
    commands: Vec<u32>,
    refreshes: usize,
    next_id: u64,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl MemoryHost {
    pub fn new(bpm: f64) -> Self {
        Self::with_tempo(TempoSegments::new(bpm))
    }

    pub fn with_tempo(tempo: TempoSegments) -> Self {
        Self {
            tempo,
            timebase: TimeBase::default(),
            tracks: Vec::new(),
            cursor: Seconds(0.0),
            playing: false,
            commands: Vec::new(),
            refreshes: 0,
            next_id: 0x1000,
        }
    }

    /// Project with one empty track per name, used for offline dry runs.
    pub fn from_seed(bpm: f64, track_names: &[String]) -> Self {
        let mut host = Self::new(bpm);
        for name in track_names {
            host.add_track(name);
        }
        host
    }

    /// Tick resolution given to newly created takes.
    pub fn with_ppq(mut self, ppq: u32) -> Result<Self> {
        self.timebase = TimeBase::new(ppq)?;
        Ok(self)
    }

    fn alloc(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 0x10;
        id
    }

    pub fn add_track(&mut self, name: &str) -> usize {
        let id = self.alloc();
        self.tracks.push(MemTrack {
            id,
            name: name.to_string(),
            params: HashMap::new(),
            selected: false,
            fx: Vec::new(),
            items: Vec::new(),
            volume_envelope: None,
        });
        self.tracks.len() - 1
    }

    fn track_mut(&mut self, index: usize) -> Result<&mut MemTrack> {
        self.tracks
            .get_mut(index)
            .ok_or_else(|| seed_error(format!("no track {index}")))
    }

    /// Place an empty MIDI item; returns its index after position sorting.
    pub fn add_midi_item(&mut self, track: usize, position: Seconds, length: Seconds) -> Result<usize> {
        let (id, take) = (self.alloc(), self.alloc());
        let track = self.track_mut(track)?;
        Ok(insert_item(track, MemItem { id, take, position, length, notes: Vec::new() }))
    }

    pub fn add_note(&mut self, track: usize, item: usize, note: Note) -> Result<()> {
        let item = self
            .track_mut(track)?
            .items
            .get_mut(item)
            .ok_or_else(|| seed_error(format!("no item {item} on track {track}")))?;
        item.notes.push(note);
        Ok(())
    }

    pub fn add_fx(&mut self, track: usize, name: &str, enabled: bool) -> Result<()> {
        self.track_mut(track)?.fx.push(MemFx { name: name.to_string(), enabled });
        Ok(())
    }

    pub fn set_param(&mut self, track: usize, param: TrackParam, value: f64) -> Result<()> {
        self.track_mut(track)?.params.insert(param, value);
        Ok(())
    }

    /// Store raw chunk text as the track's (materialized) volume envelope.
    pub fn set_volume_chunk(&mut self, track: usize, chunk: &str) -> Result<()> {
        let id = self.alloc();
        self.track_mut(track)?.volume_envelope = Some(MemEnvelope { id, chunk: chunk.to_string() });
        Ok(())
    }

    pub fn set_cursor(&mut self, position: Seconds) {
        self.cursor = position;
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn notes(&self, track: usize, item: usize) -> Option<&[Note]> {
        self.tracks.get(track)?.items.get(item).map(|i| i.notes.as_slice())
    }

    pub fn items(&self, track: usize) -> Vec<MidiItem> {
        self.tracks.get(track).map_or_else(Vec::new, |t| {
            t.items.iter().map(|i| MidiItem { position: i.position, length: i.length }).collect()
        })
    }

    pub fn volume_chunk(&self, track: usize) -> Option<&str> {
        self.tracks.get(track)?.volume_envelope.as_ref().map(|e| e.chunk.as_str())
    }

    pub fn param(&self, track: usize, param: TrackParam) -> Option<f64> {
        self.tracks.get(track).map(|t| t.param(param))
    }

    pub fn is_selected(&self, track: usize) -> bool {
        self.tracks.get(track).is_some_and(|t| t.selected)
    }

    /// Command ids run so far, oldest first.
    pub fn commands(&self) -> &[u32] {
        &self.commands
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes
    }

    fn find_track(&self, handle: &Handle, call: &str) -> Result<usize> {
        let address = handle.address().filter(|a| *a != 0);
        self.tracks
            .iter()
            .position(|t| Some(t.id) == address)
            .ok_or_else(|| unknown_handle(call, handle))
    }

    fn track_ref(&self, handle: &Handle, call: &str) -> Result<&MemTrack> {
        let index = self.find_track(handle, call)?;
        Ok(&self.tracks[index])
    }

    fn track_ref_mut(&mut self, handle: &Handle, call: &str) -> Result<&mut MemTrack> {
        let index = self.find_track(handle, call)?;
        Ok(&mut self.tracks[index])
    }

    /// (track, item) index pair owning an item or take handle.
    fn locate(&self, handle: &Handle, take: bool, call: &str) -> Result<(usize, usize)> {
        let address = handle.address().filter(|a| *a != 0);
        for (t, track) in self.tracks.iter().enumerate() {
            for (i, item) in track.items.iter().enumerate() {
                let id = if take { item.take } else { item.id };
                if Some(id) == address {
                    return Ok((t, i));
                }
            }
        }
        Err(unknown_handle(call, handle))
    }

    fn item_ref(&self, handle: &Handle, take: bool, call: &str) -> Result<&MemItem> {
        let (t, i) = self.locate(handle, take, call)?;
        Ok(&self.tracks[t].items[i])
    }

    fn take_mut(&mut self, handle: &Handle, call: &str) -> Result<&mut MemItem> {
        let (t, i) = self.locate(handle, true, call)?;
        Ok(&mut self.tracks[t].items[i])
    }

    fn envelope_mut(&mut self, handle: &Handle, call: &str) -> Result<&mut MemEnvelope> {
        let address = handle.address().filter(|a| *a != 0);
        self.tracks
            .iter_mut()
            .filter_map(|t| t.volume_envelope.as_mut())
            .find(|e| Some(e.id) == address)
            .ok_or_else(|| unknown_handle(call, handle))
    }

    fn toggle_volume_envelopes(&mut self) -> Result<()> {
        let selected: Vec<usize> = (0..self.tracks.len()).filter(|&i| self.tracks[i].selected).collect();
        for index in selected {
            let id = self.alloc();
            let track = &mut self.tracks[index];
            match track.volume_envelope.as_mut() {
                None => {
                    track.volume_envelope = Some(MemEnvelope { id, chunk: EnvelopeState::volume(Vec::new()).to_chunk() });
                }
                Some(envelope) => {
                    let state: EnvelopeState = envelope.chunk.parse()?;
                    let visible = state.visible;
                    envelope.chunk = state.with_visibility(!visible).to_chunk();
                }
            }
        }
        Ok(())
    }
}

fn insert_item(track: &mut MemTrack, item: MemItem) -> usize {
    let id = item.id;
    track.items.push(item);
    track.items.sort_by(|a, b| a.position.0.total_cmp(&b.position.0));
    track.items.iter().position(|i| i.id == id).unwrap_or(track.items.len() - 1)
}

fn seed_error(message: String) -> MagenticError {
    MagenticError::InvalidArgument(message)
}

fn unknown_handle(call: &str, handle: &Handle) -> MagenticError {
    MagenticError::Host { call: call.to_string(), message: format!("unknown handle {handle}") }
}

fn null_pointer(type_name: &str) -> Handle {
    Handle::pointer(type_name, 0)
}

impl Host for MemoryHost {
    fn count_tracks(&mut self) -> Result<usize> {
        Ok(self.tracks.len())
    }

    fn track(&mut self, index: usize) -> Result<Handle> {
        Ok(self
            .tracks
            .get(index)
            .map_or_else(|| null_pointer(TRACK), |t| Handle::pointer(TRACK, t.id)))
    }

    fn tempo_bpm(&mut self) -> Result<f64> {
        let qn = self.tempo.time_to_qn(self.cursor);
        Ok(self.tempo.bpm_at(qn))
    }

    fn cursor_position(&mut self) -> Result<Seconds> {
        Ok(self.cursor)
    }

    fn is_playing(&mut self) -> Result<bool> {
        Ok(self.playing)
    }

    fn time_to_qn(&mut self, time: Seconds) -> Result<Qn> {
        Ok(self.tempo.time_to_qn(time))
    }

    fn qn_to_time(&mut self, qn: Qn) -> Result<Seconds> {
        Ok(self.tempo.qn_to_time(qn))
    }

    fn track_param(&mut self, track: &Handle, param: TrackParam) -> Result<f64> {
        Ok(self.track_ref(track, "GetMediaTrackInfo_Value")?.param(param))
    }

    fn set_track_param(&mut self, track: &Handle, param: TrackParam, value: f64) -> Result<()> {
        self.track_ref_mut(track, "SetMediaTrackInfo_Value")?.params.insert(param, value);
        Ok(())
    }

    fn track_name(&mut self, track: &Handle) -> Result<String> {
        Ok(self.track_ref(track, "GetSetMediaTrackInfo_String")?.name.clone())
    }

    fn set_track_selected(&mut self, track: &Handle, selected: bool) -> Result<()> {
        self.track_ref_mut(track, "SetTrackSelected")?.selected = selected;
        Ok(())
    }

    fn count_fx(&mut self, track: &Handle) -> Result<usize> {
        Ok(self.track_ref(track, "TrackFX_GetCount")?.fx.len())
    }

    fn fx_name(&mut self, track: &Handle, index: usize) -> Result<String> {
        let fx = self.track_ref(track, "TrackFX_GetFXName")?.fx.get(index);
        Ok(fx.map(|f| f.name.clone()).unwrap_or_default())
    }

    fn fx_enabled(&mut self, track: &Handle, index: usize) -> Result<bool> {
        let fx = self.track_ref(track, "TrackFX_GetEnabled")?.fx.get(index);
        Ok(fx.is_some_and(|f| f.enabled))
    }

    fn count_items(&mut self, track: &Handle) -> Result<usize> {
        Ok(self.track_ref(track, "CountTrackMediaItems")?.items.len())
    }

    fn item(&mut self, track: &Handle, index: usize) -> Result<Handle> {
        let item = self.track_ref(track, "GetTrackMediaItem")?.items.get(index);
        Ok(item.map_or_else(|| null_pointer(ITEM), |i| Handle::pointer(ITEM, i.id)))
    }

    fn item_span(&mut self, item: &Handle) -> Result<MidiItem> {
        let item = self.item_ref(item, false, "GetMediaItemInfo_Value")?;
        Ok(MidiItem { position: item.position, length: item.length })
    }

    fn create_midi_item(&mut self, track: &Handle, start: Seconds, end: Seconds) -> Result<Handle> {
        let (id, take) = (self.alloc(), self.alloc());
        let track = self.track_ref_mut(track, "CreateNewMIDIItemInProj")?;
        let length = Seconds((end.0 - start.0).max(0.0));
        insert_item(track, MemItem { id, take, position: start, length, notes: Vec::new() });
        Ok(Handle::pointer(ITEM, id))
    }

    fn active_take(&mut self, item: &Handle) -> Result<Handle> {
        let item = self.item_ref(item, false, "GetActiveTake")?;
        Ok(Handle::pointer(TAKE, item.take))
    }

    fn take_qn_to_ticks(&mut self, take: &Handle, qn: Qn) -> Result<f64> {
        let position = self.item_ref(take, true, "MIDI_GetPPQPosFromProjQN")?.position;
        let start_qn = self.tempo.time_to_qn(position);
        Ok((qn.0 - start_qn.0) * self.timebase.ppq as f64)
    }

    fn count_notes(&mut self, take: &Handle) -> Result<usize> {
        Ok(self.item_ref(take, true, "MIDI_CountEvts")?.notes.len())
    }

    fn note(&mut self, take: &Handle, index: usize) -> Result<Note> {
        self.item_ref(take, true, "MIDI_GetNote")?
            .notes
            .get(index)
            .copied()
            .ok_or_else(|| MagenticError::Host { call: "MIDI_GetNote".into(), message: format!("no note at index {index}") })
    }

    fn insert_note(&mut self, take: &Handle, note: &Note) -> Result<()> {
        self.take_mut(take, "MIDI_InsertNote")?.notes.push(*note);
        Ok(())
    }

    fn delete_note(&mut self, take: &Handle, index: usize) -> Result<()> {
        let item = self.take_mut(take, "MIDI_DeleteNote")?;
        if index >= item.notes.len() {
            return Err(MagenticError::Host {
                call: "MIDI_DeleteNote".into(),
                message: format!("no note at index {index}"),
            });
        }
        item.notes.remove(index);
        Ok(())
    }

    fn sort_notes(&mut self, take: &Handle) -> Result<()> {
        self.take_mut(take, "MIDI_Sort")?
            .notes
            .sort_by_key(|n| (n.start, n.pitch, n.end));
        Ok(())
    }

    fn envelope_by_name(&mut self, track: &Handle, name: &str) -> Result<Handle> {
        let track = self.track_ref(track, "GetTrackEnvelopeByName")?;
        let found = match (name, &track.volume_envelope) {
            ("Volume", Some(envelope)) => Handle::pointer(ENVELOPE, envelope.id),
            _ => null_pointer(ENVELOPE),
        };
        Ok(found)
    }

    fn envelope_chunk(&mut self, envelope: &Handle) -> Result<String> {
        Ok(self.envelope_mut(envelope, "GetEnvelopeStateChunk")?.chunk.clone())
    }

    fn set_envelope_chunk(&mut self, envelope: &Handle, chunk: &str) -> Result<()> {
        self.envelope_mut(envelope, "SetEnvelopeStateChunk")?.chunk = chunk.to_string();
        Ok(())
    }

    fn sort_envelope_points(&mut self, envelope: &Handle) -> Result<()> {
        let envelope = self.envelope_mut(envelope, "Envelope_SortPoints")?;
        // Decoding already returns points in time order
        if let Ok(state) = envelope.chunk.parse::<EnvelopeState>() {
            envelope.chunk = state.to_chunk();
        }
        Ok(())
    }

    fn run_command(&mut self, command: u32) -> Result<()> {
        self.commands.push(command);
        if command == TOGGLE_VOLUME_ENVELOPE {
            self.toggle_volume_envelopes()?;
        }
        Ok(())
    }

    fn refresh_ui(&mut self) -> Result<()> {
        self.refreshes += 1;
        Ok(())
    }
}
