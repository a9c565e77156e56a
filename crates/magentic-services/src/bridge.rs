//! Host implementation that forwards scripting calls to the bridge process
//!
//! # Bridge contract
//!
//! `HttpHost` defines the protocol; a bridge process must serve these two
//! endpoints to be usable:
//!
//! - `POST {base_url}/call` with `{"function": <name>, "args": [...]}`. The
//!   bridge runs the named host scripting function with the positional
//!   `args`, one call at a time under its own lock, and answers
//!   `{"ok": true, "result": <json>}` or `{"ok": false, "error": <string>}`.
//!   Function names and argument order are the host's own scripting API.
//!   Functions with output parameters return their whole result tuple as a
//!   JSON array. Object handles travel as the host's pointer strings.
//! - `GET {base_url}/status`, answered by
//!   `{"reaper_connected": bool, "reaper_version": <string>, "error": <string>}`.
//!
//! A non-success HTTP status surfaces as a host error carrying the status
//! code; a refused connection as `HostUnreachable`.

use std::io;
use std::time::Duration;

use magentic_core::{Handle, MagenticError, MidiItem, Note, Qn, Result, Seconds, Ticks, TrackParam};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::host::Host;

/// Size hint passed for string output parameters.
const STRING_BUF: usize = 256;
const CHUNK_BUF: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub base_url: String,
    /// Applied to every ordinary call
    pub timeout: Duration,
    /// For calls that can make the host instantiate things (commands, new items)
    pub slow_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            timeout: Duration::from_secs(15),
            slow_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    function: &'a str,
    args: Value,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: String,
}

/// Bridge liveness as reported by `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub reaper_connected: bool,
    #[serde(default)]
    pub reaper_version: String,
    #[serde(default)]
    pub error: String,
}

pub struct HttpHost {
    agent: ureq::Agent,
    config: BridgeConfig,
}

impl HttpHost {
    pub fn new(config: BridgeConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .build();
        Self { agent, config }
    }

    pub fn status(&self) -> Result<BridgeStatus> {
        let url = format!("{}/status", self.config.base_url.trim_end_matches('/'));
        let response = self
            .agent
            .get(&url)
            .timeout(self.config.timeout)
            .call()
            .map_err(|e| transport_error("status", self.config.timeout, e))?;
        response.into_json().map_err(|e| read_error("status", self.config.timeout, e))
    }

    fn call_with(&self, function: &str, args: Value, timeout: Duration) -> Result<Value> {
        let url = format!("{}/call", self.config.base_url.trim_end_matches('/'));
        tracing::debug!("bridge call {}({})", function, args);
        let response = self
            .agent
            .post(&url)
            .timeout(timeout)
            .send_json(CallRequest { function, args })
            .map_err(|e| transport_error(function, timeout, e))?;
        let body: CallResponse = response.into_json().map_err(|e| read_error(function, timeout, e))?;
        if !body.ok {
            tracing::warn!("Host rejected {}: {}", function, body.error);
            return Err(MagenticError::Host { call: function.to_string(), message: body.error });
        }
        Ok(body.result)
    }

    fn call(&self, function: &str, args: Value) -> Result<Value> {
        self.call_with(function, args, self.config.timeout)
    }

    fn call_as<T: DeserializeOwned>(&self, function: &str, args: Value) -> Result<T> {
        let value = self.call(function, args)?;
        decode(function, value)
    }

    /// Element `index` of a tuple-shaped result.
    fn call_at<T: DeserializeOwned>(&self, function: &str, args: Value, index: usize) -> Result<T> {
        let value = self.call(function, args)?;
        let element = tuple_element(function, &value, index)?;
        decode(function, element)
    }
}

fn decode<T: DeserializeOwned>(function: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| MagenticError::Host {
        call: function.to_string(),
        message: format!("unexpected result shape: {e}"),
    })
}

fn tuple_element(function: &str, value: &Value, index: usize) -> Result<Value> {
    value.get(index).cloned().ok_or_else(|| MagenticError::Host {
        call: function.to_string(),
        message: format!("expected a tuple with at least {} values, got {value}", index + 1),
    })
}

fn transport_error(call: &str, timeout: Duration, err: ureq::Error) -> MagenticError {
    match err {
        ureq::Error::Status(code, response) => MagenticError::Host {
            call: call.to_string(),
            message: format!("bridge answered HTTP {code}: {}", response.into_string().unwrap_or_default()),
        },
        ureq::Error::Transport(transport) if is_timeout(&transport) => {
            MagenticError::Timeout { call: call.to_string(), secs: timeout.as_secs() }
        }
        ureq::Error::Transport(transport) => MagenticError::HostUnreachable(transport.to_string()),
    }
}

fn read_error(call: &str, timeout: Duration, err: io::Error) -> MagenticError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            MagenticError::Timeout { call: call.to_string(), secs: timeout.as_secs() }
        }
        io::ErrorKind::InvalidData => MagenticError::Json(err.to_string()),
        _ => MagenticError::HostUnreachable(err.to_string()),
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock);
        }
        source = err.source();
    }
    false
}

fn item_key(param: &str) -> Value {
    Value::String(param.to_string())
}

impl Host for HttpHost {
    fn count_tracks(&mut self) -> Result<usize> {
        self.call_as("CountTracks", json!([0]))
    }

    fn track(&mut self, index: usize) -> Result<Handle> {
        self.call_as("GetTrack", json!([0, index]))
    }

    fn tempo_bpm(&mut self) -> Result<f64> {
        self.call_as("Master_GetTempo", json!([]))
    }

    fn cursor_position(&mut self) -> Result<Seconds> {
        self.call_as("GetCursorPosition", json!([])).map(Seconds)
    }

    fn is_playing(&mut self) -> Result<bool> {
        let state: i64 = self.call_as("GetPlayState", json!([]))?;
        Ok(state & 1 != 0)
    }

    fn time_to_qn(&mut self, time: Seconds) -> Result<Qn> {
        self.call_as("TimeMap2_timeToQN", json!([0, time.0])).map(Qn)
    }

    fn qn_to_time(&mut self, qn: Qn) -> Result<Seconds> {
        self.call_as("TimeMap2_QNToTime", json!([0, qn.0])).map(Seconds)
    }

    fn track_param(&mut self, track: &Handle, param: TrackParam) -> Result<f64> {
        self.call_as("GetMediaTrackInfo_Value", json!([track, param.key()]))
    }

    fn set_track_param(&mut self, track: &Handle, param: TrackParam, value: f64) -> Result<()> {
        self.call("SetMediaTrackInfo_Value", json!([track, param.key(), value]))?;
        Ok(())
    }

    fn track_name(&mut self, track: &Handle) -> Result<String> {
        // (retval, track, parm, value, set)
        self.call_at("GetSetMediaTrackInfo_String", json!([track, "P_NAME", "", false]), 3)
    }

    fn set_track_selected(&mut self, track: &Handle, selected: bool) -> Result<()> {
        self.call("SetTrackSelected", json!([track, selected]))?;
        Ok(())
    }

    fn count_fx(&mut self, track: &Handle) -> Result<usize> {
        self.call_as("TrackFX_GetCount", json!([track]))
    }

    fn fx_name(&mut self, track: &Handle, index: usize) -> Result<String> {
        // (retval, track, fx, name, size)
        self.call_at("TrackFX_GetFXName", json!([track, index, "", STRING_BUF]), 3)
    }

    fn fx_enabled(&mut self, track: &Handle, index: usize) -> Result<bool> {
        self.call_as("TrackFX_GetEnabled", json!([track, index]))
    }

    fn count_items(&mut self, track: &Handle) -> Result<usize> {
        self.call_as("CountTrackMediaItems", json!([track]))
    }

    fn item(&mut self, track: &Handle, index: usize) -> Result<Handle> {
        self.call_as("GetTrackMediaItem", json!([track, index]))
    }

    fn item_span(&mut self, item: &Handle) -> Result<MidiItem> {
        let position: f64 = self.call_as("GetMediaItemInfo_Value", json!([item, item_key("D_POSITION")]))?;
        let length: f64 = self.call_as("GetMediaItemInfo_Value", json!([item, item_key("D_LENGTH")]))?;
        Ok(MidiItem { position: Seconds(position), length: Seconds(length) })
    }

    fn create_midi_item(&mut self, track: &Handle, start: Seconds, end: Seconds) -> Result<Handle> {
        let value = self.call_with(
            "CreateNewMIDIItemInProj",
            json!([track, start.0, end.0, false]),
            self.config.slow_timeout,
        )?;
        decode("CreateNewMIDIItemInProj", value)
    }

    fn active_take(&mut self, item: &Handle) -> Result<Handle> {
        self.call_as("GetActiveTake", json!([item]))
    }

    fn take_qn_to_ticks(&mut self, take: &Handle, qn: Qn) -> Result<f64> {
        self.call_as("MIDI_GetPPQPosFromProjQN", json!([take, qn.0]))
    }

    fn count_notes(&mut self, take: &Handle) -> Result<usize> {
        // (retval, take, notes, ccs, sysex)
        self.call_at("MIDI_CountEvts", json!([take, 0, 0, 0]), 2)
    }

    fn note(&mut self, take: &Handle, index: usize) -> Result<Note> {
        // (retval, take, index, selected, muted, start, end, channel, pitch, velocity)
        let value = self.call("MIDI_GetNote", json!([take, index, 0, 0, 0, 0, 0, 0, 0]))?;
        let found: bool = decode("MIDI_GetNote", tuple_element("MIDI_GetNote", &value, 0)?)?;
        if !found {
            return Err(MagenticError::Host {
                call: "MIDI_GetNote".into(),
                message: format!("no note at index {index}"),
            });
        }
        let field = |i: usize| tuple_element("MIDI_GetNote", &value, i);
        let start: f64 = decode("MIDI_GetNote", field(5)?)?;
        let end: f64 = decode("MIDI_GetNote", field(6)?)?;
        Ok(Note {
            selected: decode("MIDI_GetNote", field(3)?)?,
            muted: decode("MIDI_GetNote", field(4)?)?,
            start: Ticks(start.round() as i64),
            end: Ticks(end.round() as i64),
            channel: decode("MIDI_GetNote", field(7)?)?,
            pitch: decode("MIDI_GetNote", field(8)?)?,
            velocity: decode("MIDI_GetNote", field(9)?)?,
        })
    }

    fn insert_note(&mut self, take: &Handle, note: &Note) -> Result<()> {
        let inserted: bool = self.call_as(
            "MIDI_InsertNote",
            json!([
                take,
                note.selected,
                note.muted,
                note.start.0 as f64,
                note.end.0 as f64,
                note.channel,
                note.pitch,
                note.velocity,
                true
            ]),
        )?;
        if !inserted {
            return Err(MagenticError::Host {
                call: "MIDI_InsertNote".into(),
                message: format!("host refused note {} at tick {}", note.pitch, note.start.0),
            });
        }
        Ok(())
    }

    fn delete_note(&mut self, take: &Handle, index: usize) -> Result<()> {
        self.call("MIDI_DeleteNote", json!([take, index]))?;
        Ok(())
    }

    fn sort_notes(&mut self, take: &Handle) -> Result<()> {
        self.call("MIDI_Sort", json!([take]))?;
        Ok(())
    }

    fn envelope_by_name(&mut self, track: &Handle, name: &str) -> Result<Handle> {
        self.call_as("GetTrackEnvelopeByName", json!([track, name]))
    }

    fn envelope_chunk(&mut self, envelope: &Handle) -> Result<String> {
        let value = self.call("GetEnvelopeStateChunk", json!([envelope, "", CHUNK_BUF, false]))?;
        // Output parameters come back in a tuple; the chunk is the string element that opens a block
        let found = match &value {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => parts
                .iter()
                .filter_map(Value::as_str)
                .find(|s| s.trim_start().starts_with('<'))
                .map(str::to_string),
            _ => None,
        };
        found.ok_or_else(|| MagenticError::Host {
            call: "GetEnvelopeStateChunk".into(),
            message: format!("no chunk text in result {value}"),
        })
    }

    fn set_envelope_chunk(&mut self, envelope: &Handle, chunk: &str) -> Result<()> {
        self.call("SetEnvelopeStateChunk", json!([envelope, chunk, false]))?;
        Ok(())
    }

    fn sort_envelope_points(&mut self, envelope: &Handle) -> Result<()> {
        self.call("Envelope_SortPoints", json!([envelope]))?;
        Ok(())
    }

    fn run_command(&mut self, command: u32) -> Result<()> {
        self.call_with("Main_OnCommand", json!([command, 0]), self.config.slow_timeout)?;
        Ok(())
    }

    fn refresh_ui(&mut self) -> Result<()> {
        self.call("TrackList_AdjustWindows", json!([false]))?;
        self.call("UpdateArrange", json!([]))?;
        Ok(())
    }
}
