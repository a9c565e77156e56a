//! Conversions between seconds, quarter-notes and ticks
//!
//! This is the only module allowed to mix time units. Seconds are
//! project-absolute; quarter-notes (QN) are project-absolute musical
//! positions; ticks are integer, item-relative positions inside a note
//! container. Tempo maps are piecewise, so ticks are derived from QN and never
//! from seconds directly, and only the final tick value is rounded.

use serde::{Deserialize, Serialize};

use crate::error::{MagenticError, Result};

/// Canonical tick resolution (ticks per quarter-note).
pub const DEFAULT_PPQ: u32 = 960;

/// Project-absolute time in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Seconds(pub f64);

/// Project-absolute position in quarter-notes.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Qn(pub f64);

/// Item-relative integer tick position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticks(pub i64);

/// Read-only mapping between absolute time and musical position.
pub trait TempoMap {
    fn time_to_qn(&self, time: Seconds) -> Qn;
    fn qn_to_time(&self, qn: Qn) -> Seconds;
}

/// Fixed tempo for the whole project.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantTempo {
    pub bpm: f64,
}

impl TempoMap for ConstantTempo {
    fn time_to_qn(&self, time: Seconds) -> Qn {
        Qn(time.0 * self.bpm / 60.0)
    }

    fn qn_to_time(&self, qn: Qn) -> Seconds {
        Seconds(qn.0 * 60.0 / self.bpm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct TempoMarker {
    qn: f64,
    time: f64,
    bpm: f64,
}

/// Piecewise-constant tempo map (instant tempo changes at QN positions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoSegments {
    markers: Vec<TempoMarker>,
}

impl TempoSegments {
    pub fn new(bpm: f64) -> Self {
        Self { markers: vec![TempoMarker { qn: 0.0, time: 0.0, bpm }] }
    }

    /// Add a tempo change at `qn`; later markers are re-timed.
    pub fn with_change(mut self, qn: f64, bpm: f64) -> Self {
        if qn <= 0.0 {
            self.markers[0].bpm = bpm;
        } else {
            self.markers.retain(|m| m.qn != qn);
            self.markers.push(TempoMarker { qn, time: 0.0, bpm });
            self.markers.sort_by(|a, b| a.qn.total_cmp(&b.qn));
        }
        self.retime();
        self
    }

    fn retime(&mut self) {
        for i in 1..self.markers.len() {
            let prev = self.markers[i - 1];
            self.markers[i].time = prev.time + (self.markers[i].qn - prev.qn) * 60.0 / prev.bpm;
        }
    }

    /// Tempo in effect at a musical position.
    pub fn bpm_at(&self, qn: Qn) -> f64 {
        self.marker_by_qn(qn.0).bpm
    }

    fn marker_by_qn(&self, qn: f64) -> &TempoMarker {
        let idx = self.markers.partition_point(|m| m.qn <= qn);
        &self.markers[idx.saturating_sub(1)]
    }

    fn marker_by_time(&self, time: f64) -> &TempoMarker {
        let idx = self.markers.partition_point(|m| m.time <= time);
        &self.markers[idx.saturating_sub(1)]
    }
}

impl TempoMap for TempoSegments {
    fn time_to_qn(&self, time: Seconds) -> Qn {
        let m = self.marker_by_time(time.0);
        Qn(m.qn + (time.0 - m.time) * m.bpm / 60.0)
    }

    fn qn_to_time(&self, qn: Qn) -> Seconds {
        let m = self.marker_by_qn(qn.0);
        Seconds(m.time + (qn.0 - m.qn) * 60.0 / m.bpm)
    }
}

/// Tick resolution of one note container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub ppq: u32,
}

impl Default for TimeBase {
    fn default() -> Self {
        Self { ppq: DEFAULT_PPQ }
    }
}

impl TimeBase {
    pub fn new(ppq: u32) -> Result<Self> {
        if ppq == 0 {
            return Err(MagenticError::InvalidArgument("tick resolution must be positive".into()));
        }
        Ok(Self { ppq })
    }

    /// Resolution from two host conversions one quarter-note apart.
    pub fn from_measurement(ticks_at_origin: f64, ticks_one_qn_later: f64) -> Result<Self> {
        let ppq = (ticks_one_qn_later - ticks_at_origin).round();
        if !ppq.is_finite() || ppq < 1.0 || ppq > u32::MAX as f64 {
            return Err(MagenticError::InvalidArgument(format!(
                "host reported an unusable tick resolution ({ticks_at_origin} -> {ticks_one_qn_later})"
            )));
        }
        Self::new(ppq as u32)
    }

    /// Relative QN span to ticks. The only rounding step.
    pub fn qn_to_ticks(&self, qn: f64) -> Ticks {
        Ticks((qn * self.ppq as f64).round() as i64)
    }

    pub fn ticks_to_qn(&self, ticks: Ticks) -> f64 {
        ticks.0 as f64 / self.ppq as f64
    }
}

/// Coordinate frame of one MIDI item: its tick resolution and where it
/// starts in the project, both in seconds and in quarter-notes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemFrame {
    pub timebase: TimeBase,
    pub position: Seconds,
    pub start_qn: Qn,
}

impl ItemFrame {
    pub fn new(map: &impl TempoMap, timebase: TimeBase, position: Seconds) -> Self {
        Self { timebase, position, start_qn: map.time_to_qn(position) }
    }

    /// Beat offset inside the item to its absolute QN position.
    pub fn beat_to_project_qn(&self, beat: f64) -> Qn {
        Qn(self.start_qn.0 + beat)
    }

    pub fn project_qn_to_ticks(&self, qn: Qn) -> Ticks {
        self.timebase.qn_to_ticks(qn.0 - self.start_qn.0)
    }

    /// Item-relative beat to item-relative ticks, via the absolute QN position.
    pub fn beat_to_ticks(&self, beat: f64) -> Ticks {
        self.project_qn_to_ticks(self.beat_to_project_qn(beat))
    }

    pub fn ticks_to_project_qn(&self, ticks: Ticks) -> Qn {
        Qn(self.start_qn.0 + self.timebase.ticks_to_qn(ticks))
    }

    pub fn ticks_to_beat(&self, ticks: Ticks) -> f64 {
        self.ticks_to_project_qn(ticks).0 - self.start_qn.0
    }

    /// Project-absolute time of an item-relative tick.
    pub fn ticks_to_seconds(&self, map: &impl TempoMap, ticks: Ticks) -> Seconds {
        map.qn_to_time(self.ticks_to_project_qn(ticks))
    }

    /// Same item-relative offset expressed in another item's ticks.
    ///
    /// Only the resolution changes; the offset in quarter-notes from the item
    /// start is kept, wherever the target item sits in the project.
    pub fn retime(&self, ticks: Ticks, target: &ItemFrame) -> Ticks {
        if self.timebase == target.timebase {
            return ticks;
        }
        target.timebase.qn_to_ticks(self.timebase.ticks_to_qn(ticks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn variable_map() -> TempoSegments {
        TempoSegments::new(120.0).with_change(4.0, 90.0).with_change(10.0, 174.0)
    }

    #[test]
    fn test_constant_tempo() {
        let map = ConstantTempo { bpm: 120.0 };
        assert_abs_diff_eq!(map.time_to_qn(Seconds(1.0)).0, 2.0);
        assert_abs_diff_eq!(map.qn_to_time(Qn(3.0)).0, 1.5);
    }

    #[test]
    fn test_segments_are_continuous() {
        let map = variable_map();
        // 4 QN at 120 bpm = 2s, then 6 QN at 90 bpm = 4s
        assert_abs_diff_eq!(map.qn_to_time(Qn(4.0)).0, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(map.qn_to_time(Qn(10.0)).0, 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(map.time_to_qn(Seconds(3.0)).0, 5.5, epsilon = 1e-12);
        assert_abs_diff_eq!(map.bpm_at(Qn(11.0)), 174.0);
        for i in 0..200 {
            let t = Seconds(i as f64 * 0.05);
            assert_abs_diff_eq!(map.qn_to_time(map.time_to_qn(t)).0, t.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_tempo_change_at_origin_replaces_initial() {
        let map = TempoSegments::new(120.0).with_change(0.0, 60.0);
        assert_abs_diff_eq!(map.bpm_at(Qn(0.0)), 60.0);
        assert_abs_diff_eq!(map.qn_to_time(Qn(1.0)).0, 1.0);
        assert_abs_diff_eq!(map.time_to_qn(Seconds(4.0)).0, 4.0);
    }

    #[test]
    fn test_tick_round_trip_within_resolution() {
        let timebase = TimeBase::default();
        let maps: Vec<Box<dyn Fn(Seconds) -> ItemFrame>> = vec![
            Box::new(|p| ItemFrame::new(&ConstantTempo { bpm: 97.0 }, TimeBase::default(), p)),
            Box::new(|p| ItemFrame::new(&variable_map(), TimeBase::default(), p)),
        ];
        for frame_at in &maps {
            for position in [0.0, 1.3, 2.0, 5.77] {
                let frame = frame_at(Seconds(position));
                for k in 0..97 {
                    let beat = k as f64 * 0.173;
                    let back = frame.ticks_to_beat(frame.beat_to_ticks(beat));
                    assert!((back - beat).abs() <= 1.0 / timebase.ppq as f64);
                }
            }
        }
    }

    #[test]
    fn test_item_offset_uses_tempo_map() {
        let map = variable_map();
        // Item starts at 2s = QN 4, where tempo drops to 90 bpm
        let frame = ItemFrame::new(&map, TimeBase::default(), Seconds(2.0));
        assert_abs_diff_eq!(frame.start_qn.0, 4.0, epsilon = 1e-12);
        assert_eq!(frame.beat_to_ticks(1.5), Ticks(1440));
        // Beat 1.5 in the item is 1.5 QN at 90 bpm = 1s after the item start
        assert_abs_diff_eq!(frame.ticks_to_seconds(&map, Ticks(1440)).0, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_retime_between_resolutions() {
        let map = ConstantTempo { bpm: 120.0 };
        let source = ItemFrame::new(&map, TimeBase::default(), Seconds(0.0));
        let target = ItemFrame::new(&map, TimeBase::new(480).unwrap(), Seconds(8.0));
        assert_eq!(source.retime(Ticks(960), &target), Ticks(480));
        assert_eq!(source.retime(Ticks(960), &source), Ticks(960));
        assert_eq!(source.retime(Ticks(0), &target), Ticks(0));
    }

    #[test]
    fn test_measured_and_invalid_resolution() {
        assert_eq!(TimeBase::from_measurement(3840.0, 4800.0).unwrap().ppq, 960);
        assert!(TimeBase::from_measurement(10.0, 10.0).is_err());
        assert!(TimeBase::new(0).is_err());
    }
}
