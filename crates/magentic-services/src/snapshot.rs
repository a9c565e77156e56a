//! Read-only summary of the project state

use magentic_core::chunk::EnvelopeKind;
use magentic_core::{native_to_rgb, EnvelopeState, Handle, Result, TrackParam};
use serde::{Deserialize, Serialize};

use crate::host::Host;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub bpm: f64,
    pub n_tracks: usize,
    pub cursor_position: f64,
    pub is_playing: bool,
    pub tracks: Vec<TrackSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub index: usize,
    pub name: String,
    pub volume: f64,
    pub pan: f64,
    pub is_muted: bool,
    pub is_solo: bool,
    pub is_armed: bool,
    pub color: Option<[u8; 3]>,
    pub items: Vec<ItemSnapshot>,
    pub fx: Vec<FxSnapshot>,
    pub volume_envelope: Option<EnvelopeSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub position: f64,
    pub length: f64,
    pub n_notes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxSnapshot {
    pub name: String,
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeSnapshot {
    pub active: bool,
    pub visible: bool,
    /// `None` when the stored chunk could not be decoded
    pub n_points: Option<usize>,
}

pub(crate) fn capture(host: &mut impl Host) -> Result<ProjectSnapshot> {
    let n_tracks = host.count_tracks()?;
    let mut tracks = Vec::with_capacity(n_tracks);
    for index in 0..n_tracks {
        let track = host.track(index)?;
        if track.is_null() {
            tracing::warn!("Track {} returned a null handle, skipped", index);
            continue;
        }
        tracks.push(capture_track(host, index, &track)?);
    }
    Ok(ProjectSnapshot {
        bpm: host.tempo_bpm()?,
        n_tracks,
        cursor_position: host.cursor_position()?.0,
        is_playing: host.is_playing()?,
        tracks,
    })
}

fn capture_track(host: &mut impl Host, index: usize, track: &Handle) -> Result<TrackSnapshot> {
    let name = host.track_name(track)?;
    let name = if name.is_empty() { format!("Track {}", index + 1) } else { name };

    let mut items = Vec::new();
    for i in 0..host.count_items(track)? {
        let item = host.item(track, i)?;
        if item.is_null() {
            continue;
        }
        let span = host.item_span(&item)?;
        let take = host.active_take(&item)?;
        let n_notes = if take.is_valid() { host.count_notes(&take)? } else { 0 };
        items.push(ItemSnapshot { position: span.position.0, length: span.length.0, n_notes });
    }

    let mut fx = Vec::new();
    for i in 0..host.count_fx(track)? {
        fx.push(FxSnapshot { name: host.fx_name(track, i)?, is_enabled: host.fx_enabled(track, i)? });
    }

    let envelope = host.envelope_by_name(track, EnvelopeKind::Volume.name())?;
    let volume_envelope = if envelope.is_valid() {
        let chunk = host.envelope_chunk(&envelope)?;
        Some(match chunk.parse::<EnvelopeState>() {
            Ok(state) => EnvelopeSnapshot {
                active: state.active,
                visible: state.visible,
                n_points: Some(state.points.len()),
            },
            Err(e) => {
                tracing::warn!("Unreadable volume envelope on track {}: {}", index, e);
                EnvelopeSnapshot { active: false, visible: false, n_points: None }
            }
        })
    } else {
        None
    };

    Ok(TrackSnapshot {
        index,
        name,
        volume: host.track_param(track, TrackParam::Volume)?,
        pan: host.track_param(track, TrackParam::Pan)?,
        is_muted: host.track_param(track, TrackParam::Mute)? != 0.0,
        is_solo: host.track_param(track, TrackParam::Solo)? != 0.0,
        is_armed: host.track_param(track, TrackParam::RecArm)? != 0.0,
        color: native_to_rgb(host.track_param(track, TrackParam::Color)? as i64),
        items,
        fx,
        volume_envelope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;
    use magentic_core::{Note, Seconds, Ticks, rgb_to_native};

    #[test]
    fn test_snapshot_fields() {
        let mut host = MemoryHost::new(96.0);
        host.add_track("");
        host.add_track("Drums");
        host.add_fx(1, "ReaComp", false).unwrap();
        host.add_midi_item(1, Seconds(1.0), Seconds(2.5)).unwrap();
        host.add_note(1, 0, Note::new(36, Ticks(0), Ticks(480), 110)).unwrap();
        host.set_param(1, TrackParam::Mute, 1.0).unwrap();
        host.set_param(1, TrackParam::Color, rgb_to_native([10, 20, 30]) as f64).unwrap();
        host.set_volume_chunk(1, "<VOLENV\nACT 1 -1\nVIS 0 1 1\nPT 0 1 0\n>").unwrap();
        host.set_playing(true);
        host.set_cursor(Seconds(2.5));

        let snap = capture(&mut host).unwrap();
        assert_eq!(snap.bpm, 96.0);
        assert_eq!(snap.n_tracks, 2);
        assert!(snap.is_playing);
        assert_eq!(snap.cursor_position, 2.5);
        assert_eq!(snap.tracks[0].name, "Track 1");
        assert_eq!(snap.tracks[0].volume, 1.0);
        assert!(snap.tracks[0].volume_envelope.is_none());

        let drums = &snap.tracks[1];
        assert!(drums.is_muted);
        assert_eq!(drums.color, Some([10, 20, 30]));
        assert_eq!(drums.fx, vec![FxSnapshot { name: "ReaComp".into(), is_enabled: false }]);
        assert_eq!(drums.items[0].position, 1.0);
        assert_eq!(drums.items[0].n_notes, 1);
        assert_eq!(
            drums.volume_envelope,
            Some(EnvelopeSnapshot { active: true, visible: false, n_points: Some(1) })
        );
    }

    #[test]
    fn test_unreadable_envelope_is_reported_not_fatal() {
        let mut host = MemoryHost::new(120.0);
        host.add_track("Pad");
        host.set_volume_chunk(0, "<VOLENV\nPT 0 1 0\n>").unwrap();
        let snap = capture(&mut host).unwrap();
        assert_eq!(snap.tracks[0].volume_envelope.unwrap().n_points, None);
    }
}
