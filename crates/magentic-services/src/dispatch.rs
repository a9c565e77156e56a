//! Serializable instructions and their per-step reports

use magentic_core::{BeatNote, EntityRef, MagenticError, Result, TrackMix};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host::Host;
use crate::session::{AutomationRequest, ItemAddr, Session, Voicing};

/// One caller instruction, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    CreateMidiItem {
        track_index: usize,
        /// Beats
        position: f64,
        /// Beats
        length: f64,
    },
    AddMidiNotes {
        track_index: usize,
        item_index: usize,
        notes: Vec<BeatNote>,
    },
    ReadMidiNotes {
        track_index: usize,
        item_index: usize,
    },
    DeleteMidiNotes {
        track_index: usize,
        item_index: usize,
        #[serde(default)]
        pitches: Option<Vec<u8>>,
    },
    ExtendHarmony {
        source: ItemAddr,
        #[serde(default)]
        target: Option<ItemAddr>,
        intervals: Voicing,
    },
    ReplaceHarmony {
        source: ItemAddr,
        target: ItemAddr,
        intervals: Voicing,
    },
    WriteVolumeAutomation {
        track_index: usize,
        #[serde(flatten)]
        request: AutomationRequest,
    },
    RemoveVolumeAutomation {
        track_index: usize,
    },
    SetEnvelopeVisibility {
        track_index: usize,
        visible: bool,
    },
    SetTrackMix {
        track_index: usize,
        #[serde(flatten)]
        mix: TrackMix,
    },
    Snapshot,
}

impl Instruction {
    pub fn op(&self) -> &'static str {
        match self {
            Self::CreateMidiItem { .. } => "create_midi_item",
            Self::AddMidiNotes { .. } => "add_midi_notes",
            Self::ReadMidiNotes { .. } => "read_midi_notes",
            Self::DeleteMidiNotes { .. } => "delete_midi_notes",
            Self::ExtendHarmony { .. } => "extend_harmony",
            Self::ReplaceHarmony { .. } => "replace_harmony",
            Self::WriteVolumeAutomation { .. } => "write_volume_automation",
            Self::RemoveVolumeAutomation { .. } => "remove_volume_automation",
            Self::SetEnvelopeVisibility { .. } => "set_envelope_visibility",
            Self::SetTrackMix { .. } => "set_track_mix",
            Self::Snapshot => "snapshot",
        }
    }

    /// Entity the instruction addresses, used when the error carries none.
    pub fn target(&self) -> EntityRef {
        match self {
            Self::CreateMidiItem { track_index, .. }
            | Self::WriteVolumeAutomation { track_index, .. }
            | Self::RemoveVolumeAutomation { track_index }
            | Self::SetEnvelopeVisibility { track_index, .. }
            | Self::SetTrackMix { track_index, .. } => EntityRef::track(*track_index),
            Self::AddMidiNotes { track_index, item_index, .. }
            | Self::ReadMidiNotes { track_index, item_index }
            | Self::DeleteMidiNotes { track_index, item_index, .. } => EntityRef::item(*track_index, *item_index),
            Self::ExtendHarmony { source, target, .. } => (*target).unwrap_or(*source).entity(),
            Self::ReplaceHarmony { target, .. } => target.entity(),
            Self::Snapshot => EntityRef::project(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportError {
    /// Stable snake_case error tag
    pub kind: String,
    pub message: String,
    pub target: EntityRef,
}

/// Outcome of one instruction. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub op: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
}

impl Report {
    pub fn ok(op: &str, result: Value) -> Self {
        Self { op: op.to_string(), success: true, result: Some(result), error: None }
    }

    pub fn failed(op: &str, fallback_target: EntityRef, err: &MagenticError) -> Self {
        Self {
            op: op.to_string(),
            success: false,
            result: None,
            error: Some(ReportError {
                kind: err.kind().to_string(),
                message: err.to_string(),
                target: err.target().copied().unwrap_or(fallback_target),
            }),
        }
    }
}

fn to_value(payload: impl Serialize) -> Result<Value> {
    serde_json::to_value(payload).map_err(|e| MagenticError::Json(e.to_string()))
}

fn run<H: Host>(session: &Session<H>, instruction: &Instruction) -> Result<Value> {
    match instruction {
        Instruction::CreateMidiItem { track_index, position, length } => {
            to_value(session.create_midi_item(*track_index, *position, *length)?)
        }
        Instruction::AddMidiNotes { track_index, item_index, notes } => {
            to_value(session.add_midi_notes(ItemAddr::new(*track_index, *item_index), notes)?)
        }
        Instruction::ReadMidiNotes { track_index, item_index } => {
            to_value(session.read_midi_notes(ItemAddr::new(*track_index, *item_index))?)
        }
        Instruction::DeleteMidiNotes { track_index, item_index, pitches } => to_value(
            session.delete_midi_notes(ItemAddr::new(*track_index, *item_index), pitches.as_deref())?,
        ),
        Instruction::ExtendHarmony { source, target, intervals } => {
            to_value(session.extend_harmony(*source, *target, intervals)?)
        }
        Instruction::ReplaceHarmony { source, target, intervals } => {
            to_value(session.replace_harmony(*source, *target, intervals)?)
        }
        Instruction::WriteVolumeAutomation { track_index, request } => {
            to_value(session.write_volume_automation(*track_index, request)?)
        }
        Instruction::RemoveVolumeAutomation { track_index } => {
            to_value(session.remove_volume_automation(*track_index)?)
        }
        Instruction::SetEnvelopeVisibility { track_index, visible } => {
            to_value(session.set_envelope_visibility(*track_index, *visible)?)
        }
        Instruction::SetTrackMix { track_index, mix } => to_value(session.set_track_mix(*track_index, mix)?),
        Instruction::Snapshot => to_value(session.snapshot()?),
    }
}

/// Run one instruction; failures become a report instead of an error.
pub fn execute<H: Host>(session: &Session<H>, instruction: &Instruction) -> Report {
    let op = instruction.op();
    match run(session, instruction) {
        Ok(result) => Report::ok(op, result),
        Err(e) => {
            tracing::error!("{} failed: {}", op, e);
            Report::failed(op, instruction.target(), &e)
        }
    }
}

/// Run instructions in order. Later steps still run after a failure, since
/// each one re-resolves its indices against the current project.
pub fn execute_all<H: Host>(session: &Session<H>, instructions: &[Instruction]) -> Vec<Report> {
    instructions.iter().map(|i| execute(session, i)).collect()
}

/// Parse either a single instruction object or an array of them.
pub fn parse_batch(text: &str) -> Result<Vec<Instruction>> {
    let value: Value = serde_json::from_str(text).map_err(|e| MagenticError::Json(e.to_string()))?;
    let batch = match value {
        Value::Array(_) => serde_json::from_value(value),
        single => serde_json::from_value(single).map(|i| vec![i]),
    };
    batch.map_err(|e| MagenticError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;
    use serde_json::json;

    #[test]
    fn test_parse_single_and_batch() {
        let one = parse_batch(r#"{"op": "snapshot"}"#).unwrap();
        assert_eq!(one, vec![Instruction::Snapshot]);
        let many = parse_batch(
            r#"[{"op": "remove_volume_automation", "track_index": 2},
                {"op": "set_track_mix", "track_index": 0, "volume": 0.5, "pan": -0.25}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].op(), "set_track_mix");
        assert!(parse_batch(r#"{"op": "explode"}"#).is_err());
    }

    #[test]
    fn test_automation_instruction_fields() {
        let batch = parse_batch(
            r#"{"op": "write_volume_automation", "track_index": 1, "curve": "constant_db",
                "points": [{"time": 0, "value": 1.0}, {"t": 4, "v": 0}]}"#,
        )
        .unwrap();
        match &batch[0] {
            Instruction::WriteVolumeAutomation { track_index, request } => {
                assert_eq!(*track_index, 1);
                assert_eq!(request.points.len(), 2);
                assert_eq!(request.points[1].time, 4.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failure_report_names_target() {
        let session = Session::new(MemoryHost::new(120.0));
        let report = execute(&session, &Instruction::ReadMidiNotes { track_index: 3, item_index: 0 });
        assert!(!report.success);
        let error = report.error.unwrap();
        assert_eq!(error.kind, "invalid_reference");
        assert_eq!(error.target, EntityRef::track(3));
        assert_eq!(
            serde_json::to_value(&Report::ok("snapshot", json!({}))).unwrap(),
            json!({"op": "snapshot", "success": true, "result": {}})
        );
    }
}
