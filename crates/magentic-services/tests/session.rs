use std::sync::Arc;
use std::thread;

use approx::assert_abs_diff_eq;
use magentic_core::chunk::EnvelopeState;
use magentic_core::curve::gain_to_db;
use magentic_core::{BeatNote, ChordQuality, CurveKind, EntityRef, EnvelopePoint, Seconds, TempoSegments, Ticks, TrackMix, TrackParam};
use magentic_services::{
    execute_all, parse_batch, AutomationRequest, ItemAddr, MemoryHost, RemovalStatus, Session, TimeUnit, Voicing,
    TOGGLE_VOLUME_ENVELOPE,
};

fn project() -> Session<MemoryHost> {
    let mut host = MemoryHost::new(120.0);
    host.add_track("Keys");
    host.add_track("Strings");
    host.add_midi_item(0, Seconds(0.0), Seconds(4.0)).unwrap();
    host.add_midi_item(1, Seconds(0.0), Seconds(4.0)).unwrap();
    Session::new(host)
}

fn automation(points: Vec<EnvelopePoint>, curve: CurveKind) -> AutomationRequest {
    AutomationRequest { points, curve, time_unit: TimeUnit::Seconds, steps: None }
}

#[test]
fn test_extend_harmony_adds_third_and_fifth() {
    let session = project();
    let keys = ItemAddr::new(0, 0);
    session.add_midi_notes(keys, &[BeatNote::new(60, 0.0, 1.0)]).unwrap();

    let written = session.extend_harmony(keys, None, &Voicing::Intervals(vec![4, 7])).unwrap();
    assert_eq!(written.inserted, 2);
    assert_eq!(written.dropped, 0);

    let pitches: Vec<u8> = session.read_midi_notes(keys).unwrap().iter().map(|n| n.pitch).collect();
    assert_eq!(pitches, vec![60, 64, 67]);
}

#[test]
fn test_replace_harmony_clears_target_first() {
    let session = project();
    let source = ItemAddr::new(0, 0);
    let target = ItemAddr::new(1, 0);
    session.add_midi_notes(source, &[BeatNote::new(60, 0.0, 1.0)]).unwrap();
    let old: Vec<BeatNote> = (0..5).map(|i| BeatNote::new(40 + i, i as f64 * 0.5, 0.5)).collect();
    session.add_midi_notes(target, &old).unwrap();

    let replaced = session.replace_harmony(source, target, &Voicing::Intervals(vec![4, 7])).unwrap();
    assert_eq!((replaced.removed, replaced.inserted), (5, 2));

    let notes = session.read_midi_notes(target).unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes.iter().map(|n| n.pitch).collect::<Vec<_>>(), vec![64, 67]);
    // Source is untouched
    assert_eq!(session.read_midi_notes(source).unwrap().len(), 1);
}

#[test]
fn test_replace_onto_empty_target() {
    let session = project();
    session.add_midi_notes(ItemAddr::new(0, 0), &[BeatNote::new(50, 1.0, 1.0)]).unwrap();
    let replaced = session
        .replace_harmony(ItemAddr::new(0, 0), ItemAddr::new(1, 0), &Voicing::Chord(ChordQuality::Minor))
        .unwrap();
    assert_eq!((replaced.removed, replaced.inserted), (0, 3));
}

#[test]
fn test_harmony_into_item_at_other_position_keeps_item_offset() {
    let mut host = MemoryHost::with_tempo(TempoSegments::new(120.0).with_change(4.0, 90.0));
    host.add_track("Lead");
    host.add_track("Pad");
    host.add_midi_item(0, Seconds(0.0), Seconds(8.0)).unwrap();
    // Starts at QN 4, where the tempo drops to 90 bpm
    host.add_midi_item(1, Seconds(2.0), Seconds(8.0)).unwrap();
    let session = Session::new(host);

    session.add_midi_notes(ItemAddr::new(0, 0), &[BeatNote::new(62, 5.0, 1.0)]).unwrap();
    session
        .extend_harmony(ItemAddr::new(0, 0), Some(ItemAddr::new(1, 0)), &Voicing::Intervals(vec![-12]))
        .unwrap();

    let copy = session.read_midi_notes(ItemAddr::new(1, 0)).unwrap();
    assert_eq!(copy[0].pitch, 50);
    assert_abs_diff_eq!(copy[0].start, 5.0, epsilon = 1e-9);
    assert_abs_diff_eq!(copy[0].length, 1.0, epsilon = 1e-9);
    // 5 QN after the target start, all at 90 bpm
    assert_abs_diff_eq!(copy[0].start_time, 2.0 + 5.0 * 60.0 / 90.0, epsilon = 1e-9);

    let host = session.into_host().unwrap();
    let raw = host.notes(1, 0).unwrap()[0];
    assert_eq!((raw.start, raw.end), (Ticks(4800), Ticks(5760)));
}

#[test]
fn test_harmony_into_later_item_lands_inside_it() {
    let mut host = MemoryHost::new(120.0);
    host.add_track("Keys");
    host.add_track("Strings");
    host.add_midi_item(0, Seconds(0.0), Seconds(4.0)).unwrap();
    // QN 8, after every source note
    host.add_midi_item(1, Seconds(4.0), Seconds(4.0)).unwrap();
    let session = Session::new(host);

    let source = ItemAddr::new(0, 0);
    let target = ItemAddr::new(1, 0);
    session.add_midi_notes(source, &[BeatNote::new(60, 0.0, 1.0)]).unwrap();
    let replaced = session.replace_harmony(source, target, &Voicing::Intervals(vec![4, 7])).unwrap();
    assert_eq!(replaced.inserted, 2);

    let copy = session.read_midi_notes(target).unwrap();
    assert_eq!(copy.iter().map(|n| n.pitch).collect::<Vec<_>>(), vec![64, 67]);
    for note in &copy {
        assert_abs_diff_eq!(note.start, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(note.start_time, 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(note.end_time, 4.5, epsilon = 1e-9);
    }

    let host = session.into_host().unwrap();
    let raw: Vec<_> = host.notes(1, 0).unwrap().iter().map(|n| (n.start, n.end)).collect();
    assert_eq!(raw, vec![(Ticks(0), Ticks(960)), (Ticks(0), Ticks(960))]);
}

#[test]
fn test_host_tick_resolution_drives_placement() {
    let mut host = MemoryHost::new(120.0).with_ppq(480).unwrap();
    host.add_track("Keys");
    host.add_track("Strings");
    host.add_midi_item(0, Seconds(0.0), Seconds(4.0)).unwrap();
    host.add_midi_item(1, Seconds(0.0), Seconds(4.0)).unwrap();
    let session = Session::new(host);

    let keys = ItemAddr::new(0, 0);
    session.add_midi_notes(keys, &[BeatNote::new(60, 1.5, 0.5)]).unwrap();
    let read = session.read_midi_notes(keys).unwrap();
    assert_abs_diff_eq!(read[0].start, 1.5, epsilon = 1e-9);
    assert_abs_diff_eq!(read[0].length, 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(read[0].start_time, 0.75, epsilon = 1e-9);

    session.extend_harmony(keys, Some(ItemAddr::new(1, 0)), &Voicing::Intervals(vec![7])).unwrap();
    let fifth = session.read_midi_notes(ItemAddr::new(1, 0)).unwrap();
    assert_eq!(fifth[0].pitch, 67);
    assert_abs_diff_eq!(fifth[0].start, 1.5, epsilon = 1e-9);

    let host = session.into_host().unwrap();
    let raw = host.notes(0, 0).unwrap()[0];
    assert_eq!((raw.start, raw.end), (Ticks(720), Ticks(960)));
    assert_eq!(host.notes(1, 0).unwrap()[0].start, Ticks(720));
}

#[test]
fn test_concurrent_operations_stay_consistent() {
    let session = Arc::new(project());
    let keys = ItemAddr::new(0, 0);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for i in 0..25 {
                    let note = BeatNote::new(40 + t, i as f64 * 0.125, 0.125);
                    session.add_midi_notes(keys, &[note]).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    let notes = session.read_midi_notes(keys).unwrap();
    assert_eq!(notes.len(), 100);
    assert!(notes.iter().enumerate().all(|(i, n)| n.index == i));
    for pitch in 40..44 {
        assert_eq!(notes.iter().filter(|n| n.pitch == pitch).count(), 25);
    }

    // Each pass doubles the item, whatever order the threads run in
    let harmonizers: Vec<_> = (0..4)
        .map(|_| {
            let session = Arc::clone(&session);
            thread::spawn(move || session.extend_harmony(keys, None, &Voicing::Intervals(vec![12])).unwrap())
        })
        .collect();
    let mut inserted: Vec<usize> = harmonizers.into_iter().map(|h| h.join().unwrap().inserted).collect();
    inserted.sort();
    assert_eq!(inserted, vec![100, 200, 400, 800]);

    let notes = session.read_midi_notes(keys).unwrap();
    assert_eq!(notes.len(), 1600);
    assert!(notes.iter().enumerate().all(|(i, n)| n.index == i));
    assert!(notes.windows(2).all(|w| w[0].start <= w[1].start));
}

#[test]
fn test_out_of_range_transpositions_are_dropped() {
    let session = project();
    let keys = ItemAddr::new(0, 0);
    session.add_midi_notes(keys, &[BeatNote::new(120, 0.0, 1.0), BeatNote::new(60, 1.0, 1.0)]).unwrap();
    let written = session.extend_harmony(keys, Some(ItemAddr::new(1, 0)), &Voicing::Intervals(vec![12])).unwrap();
    assert_eq!((written.inserted, written.dropped), (1, 1));
}

#[test]
fn test_notes_placed_in_beats_after_tempo_change() {
    let mut host = MemoryHost::with_tempo(TempoSegments::new(120.0).with_change(2.0, 60.0));
    host.add_track("Bass");
    let session = Session::new(host);

    let created = session.create_midi_item(0, 1.0, 4.0).unwrap();
    assert_abs_diff_eq!(created.position.0, 0.5, epsilon = 1e-12);
    // QN 1..2 at 120 bpm, QN 2..5 at 60 bpm
    assert_abs_diff_eq!(created.length.0, 0.5 + 3.0, epsilon = 1e-12);

    let addr = ItemAddr::new(0, created.item);
    session.add_midi_notes(addr, &[BeatNote::new(40, 2.0, 1.0)]).unwrap();
    let note = session.read_midi_notes(addr).unwrap()[0];
    assert_abs_diff_eq!(note.start, 2.0, epsilon = 1e-9);
    // QN 3 = 1s + 1s at 60 bpm
    assert_abs_diff_eq!(note.start_time, 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(note.end_time, 3.0, epsilon = 1e-9);
}

#[test]
fn test_created_item_index_follows_position_order() {
    let session = project();
    let created = session.create_midi_item(0, 16.0, 4.0).unwrap();
    assert_eq!(created.item, 1);
    let earlier = session.create_midi_item(0, 8.0, 4.0).unwrap();
    assert_eq!(earlier.item, 1);
}

#[test]
fn test_volume_write_materializes_missing_envelope() {
    let session = project();
    let points = vec![EnvelopePoint::new(0.0, 1.0), EnvelopePoint::new(10.0, 0.0)];
    let written = session.write_volume_automation(1, &automation(points, CurveKind::ConstantDb)).unwrap();
    assert!(written.materialized);
    assert_eq!(written.points, 21);

    let host = session.into_host().unwrap();
    assert_eq!(host.commands(), &[TOGGLE_VOLUME_ENVELOPE]);
    assert!(host.is_selected(1));
    assert!(!host.is_selected(0));
    assert!(host.refreshes() > 0);

    let state: EnvelopeState = host.volume_chunk(1).unwrap().parse().unwrap();
    assert!(state.active && state.visible);
    assert_eq!(state.points.len(), 21);
    assert_abs_diff_eq!(gain_to_db(state.points[10].value), -40.0, epsilon = 1e-9);
    assert_eq!(state.points[20].value, 0.0);
}

#[test]
fn test_volume_write_reuses_existing_envelope_and_forces_visible() {
    let mut host = MemoryHost::new(120.0);
    host.add_track("Pad");
    host.set_volume_chunk(0, "<VOLENV\nACT 1 -1\nVIS 0 0 1\nPT 0 0.5 0\n>").unwrap();
    let session = Session::new(host);

    let request = AutomationRequest {
        points: vec![EnvelopePoint::new(8.0, 0.25), EnvelopePoint::new(0.0, 1.0)],
        curve: CurveKind::Linear,
        time_unit: TimeUnit::Beats,
        steps: None,
    };
    let written = session.write_volume_automation(0, &request).unwrap();
    assert!(!written.materialized);

    let host = session.into_host().unwrap();
    assert!(host.commands().is_empty());
    let state: EnvelopeState = host.volume_chunk(0).unwrap().parse().unwrap();
    assert!(state.visible);
    // Beats converted through the tempo map and sorted
    assert_eq!(state.points, vec![EnvelopePoint::new(0.0, 1.0), EnvelopePoint::new(4.0, 0.25)]);
}

#[test]
fn test_remove_missing_envelope_reports_already_removed() {
    let session = project();
    let removed = session.remove_volume_automation(0).unwrap();
    assert_eq!(removed.status, RemovalStatus::AlreadyRemoved);
    assert!(session.into_host().unwrap().commands().is_empty());
}

#[test]
fn test_remove_clears_points() {
    let session = project();
    let points = vec![EnvelopePoint::new(0.0, 1.0), EnvelopePoint::new(2.0, 0.5)];
    session.write_volume_automation(0, &automation(points, CurveKind::Linear)).unwrap();
    let removed = session.remove_volume_automation(0).unwrap();
    assert_eq!(removed.status, RemovalStatus::Removed);
    assert_eq!(removed.points_removed, Some(2));

    let host = session.into_host().unwrap();
    assert_eq!(host.volume_chunk(0).unwrap(), EnvelopeState::cleared().to_chunk());
}

#[test]
fn test_visibility_edit_is_idempotent() {
    let session = project();
    let points = vec![EnvelopePoint::new(0.0, 1.0)];
    session.write_volume_automation(0, &automation(points, CurveKind::Linear)).unwrap();

    assert!(session.set_envelope_visibility(0, false).unwrap().changed);
    assert!(!session.set_envelope_visibility(0, false).unwrap().changed);
    let host = session.into_host().unwrap();
    let state: EnvelopeState = host.volume_chunk(0).unwrap().parse().unwrap();
    assert!(!state.visible);
    assert_eq!(state.points.len(), 1);
}

#[test]
fn test_hiding_missing_envelope_does_nothing() {
    let session = project();
    assert!(!session.set_envelope_visibility(1, false).unwrap().changed);
    assert!(session.into_host().unwrap().volume_chunk(1).is_none());
}

#[test]
fn test_malformed_chunk_surfaces_raw_text() {
    let mut host = MemoryHost::new(120.0);
    host.add_track("Broken");
    host.set_volume_chunk(0, "<VOLENV\nACT 1 -1\nPT 0 1 0\n>").unwrap();
    let session = Session::new(host);

    let err = session.set_envelope_visibility(0, true).unwrap_err();
    assert_eq!(err.kind(), "malformed_chunk");
    assert!(err.to_string().contains("PT 0 1 0"));
}

#[test]
fn test_invalid_indices() {
    let session = project();
    let err = session.read_midi_notes(ItemAddr::new(7, 0)).unwrap_err();
    assert_eq!(err.kind(), "invalid_reference");
    assert_eq!(err.target(), Some(&EntityRef::track(7)));

    let err = session.add_midi_notes(ItemAddr::new(1, 3), &[BeatNote::new(60, 0.0, 1.0)]).unwrap_err();
    assert_eq!(err.target(), Some(&EntityRef::item(1, 3)));
}

#[test]
fn test_zero_steps_rejected_before_any_write() {
    let session = project();
    let points = vec![EnvelopePoint::new(0.0, 1.0), EnvelopePoint::new(1.0, 0.5)];
    let request = AutomationRequest { steps: Some(0), ..automation(points, CurveKind::ConstantDb) };
    assert_eq!(session.write_volume_automation(0, &request).unwrap_err().kind(), "invalid_argument");
    assert!(session.into_host().unwrap().volume_chunk(0).is_none());
}

#[test]
fn test_track_mix() {
    let session = project();
    let mix = TrackMix {
        volume: Some(0.5),
        pan: Some(-3.0),
        mute: Some(true),
        color: Some([255, 0, 0]),
        ..TrackMix::default()
    };
    let applied = session.set_track_mix(1, &mix).unwrap();
    assert_eq!(applied.applied.len(), 4);

    let snap = session.snapshot().unwrap();
    let strings = &snap.tracks[1];
    assert_eq!(strings.volume, 0.5);
    assert_eq!(strings.pan, -1.0);
    assert!(strings.is_muted);
    assert_eq!(strings.color, Some([255, 0, 0]));
    let host = session.into_host().unwrap();
    assert_eq!(host.param(1, TrackParam::Solo), Some(0.0));
}

#[test]
fn test_dispatch_batch_reports_each_step() {
    let session = project();
    let batch = parse_batch(
        r#"[
            {"op": "add_midi_notes", "track_index": 0, "item_index": 0,
             "notes": [{"pitch": 60, "start": 0, "length": 1}]},
            {"op": "extend_harmony", "source": {"track_index": 0, "item_index": 0},
             "target": {"track_index": 1, "item_index": 0}, "intervals": "major"},
            {"op": "remove_volume_automation", "track_index": 5},
            {"op": "read_midi_notes", "track_index": 1, "item_index": 0}
        ]"#,
    )
    .unwrap();

    let reports = execute_all(&session, &batch);
    assert!(reports[0].success);
    assert_eq!(reports[1].result.as_ref().unwrap()["inserted"], 2);
    assert!(!reports[2].success);
    assert_eq!(reports[2].error.as_ref().unwrap().kind, "invalid_reference");
    let read = reports[3].result.as_ref().unwrap().as_array().unwrap();
    assert_eq!(read.iter().map(|n| n["pitch"].as_u64().unwrap()).collect::<Vec<_>>(), vec![64, 67]);
}
