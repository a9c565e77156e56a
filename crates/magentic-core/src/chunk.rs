//! Envelope state chunk encoding and decoding
//!
//! The host persists an automation lane as a small text block:
//!
//! ```text
//! <VOLENV
//! ACT 1 -1
//! VIS 1 1 1
//! LANEHEIGHT 0 0
//! ARM 0
//! DEFSHAPE 0 -1 -1
//! PT 0 1 0
//! PT 10 0 0
//! >
//! ```
//!
//! Only this envelope sub-structure is ever produced here. The owning track's
//! chunk also carries items, FX chains and routing and is never rebuilt.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::curve::{EnvelopePoint, PointShape, sort_by_time};
use crate::error::{MagenticError, Result};

/// Envelope kinds this layer reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    #[default]
    Volume,
}

impl EnvelopeKind {
    /// Name the host resolves the envelope by.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Volume => "Volume",
        }
    }

    pub fn chunk_tag(&self) -> &'static str {
        match self {
            Self::Volume => "VOLENV",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "VOLENV" | "VOLENV2" => Some(Self::Volume),
            _ => None,
        }
    }
}

/// Typed contents of one envelope chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeState {
    pub kind: EnvelopeKind,
    pub active: bool,
    pub visible: bool,
    /// Shown in its own lane rather than over the media
    pub in_lane: bool,
    pub lane_height: i32,
    pub armed: bool,
    pub default_shape: PointShape,
    pub points: Vec<EnvelopePoint>,
}

impl EnvelopeState {
    /// Active, visible volume lane holding `points`.
    pub fn volume(points: Vec<EnvelopePoint>) -> Self {
        Self {
            kind: EnvelopeKind::Volume,
            active: true,
            visible: true,
            in_lane: true,
            lane_height: 0,
            armed: false,
            default_shape: PointShape::Linear,
            points,
        }
    }

    /// Inactive, hidden and empty. Envelopes cannot be destroyed, only cleared.
    pub fn cleared() -> Self {
        Self {
            active: false,
            visible: false,
            in_lane: false,
            ..Self::volume(Vec::new())
        }
    }

    pub fn with_visibility(mut self, visible: bool) -> Self {
        self.visible = visible;
        self.in_lane = visible;
        self
    }

    pub fn to_chunk(&self) -> String {
        encode(self)
    }
}

impl FromStr for EnvelopeState {
    type Err = MagenticError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

fn flag(b: bool) -> i32 {
    b as i32
}

/// Serialize an envelope; points are written in ascending time order.
pub fn encode(state: &EnvelopeState) -> String {
    let mut points = state.points.clone();
    sort_by_time(&mut points);

    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = writeln!(out, "<{}", state.kind.chunk_tag());
    let _ = writeln!(out, "ACT {} -1", flag(state.active));
    let _ = writeln!(
        out,
        "VIS {} {} {}",
        flag(state.visible),
        flag(state.in_lane),
        flag(state.visible)
    );
    let _ = writeln!(out, "LANEHEIGHT {} 0", state.lane_height);
    let _ = writeln!(out, "ARM {}", flag(state.armed));
    let _ = writeln!(out, "DEFSHAPE {} -1 -1", i32::from(state.default_shape));
    for p in &points {
        let _ = writeln!(out, "PT {} {} {}", p.time, p.value, i32::from(p.shape));
    }
    out.push('>');
    out
}

/// Parse an envelope chunk.
///
/// Tokens are matched by name, not by line or offset: the host may wrap
/// fields differently or add header tokens between versions. Unknown tokens
/// and nested `<...>` blocks are skipped. `ACT` and `VIS` are required.
pub fn decode(text: &str) -> Result<EnvelopeState> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let Some(open) = tokens.first().and_then(|t| t.strip_prefix('<')) else {
        return Err(MagenticError::malformed_chunk("missing opening '<' tag", text));
    };
    let kind = EnvelopeKind::from_tag(open)
        .ok_or_else(|| MagenticError::malformed_chunk(format!("unsupported envelope block <{open}"), text))?;

    let mut state = EnvelopeState { kind, ..EnvelopeState::cleared() };
    let mut saw_act = false;
    let mut saw_vis = false;
    let mut closed = false;
    let mut depth = 1usize;
    let mut i = 1;

    while i < tokens.len() {
        let token = tokens[i];
        i += 1;
        if token.starts_with('<') {
            depth += 1;
            continue;
        }
        if token == ">" {
            depth -= 1;
            if depth == 0 {
                closed = true;
                break;
            }
            continue;
        }
        if depth > 1 {
            continue;
        }
        let args = numeric_run(&tokens[i..]);
        i += args.len();
        match token {
            "ACT" => {
                state.active = required_flag(&args, "ACT", text)?;
                saw_act = true;
            }
            "VIS" => {
                state.visible = required_flag(&args, "VIS", text)?;
                state.in_lane = args.get(1).map_or(state.visible, |v| *v != 0.0);
                saw_vis = true;
            }
            "LANEHEIGHT" => {
                if let Some(h) = args.first() {
                    state.lane_height = *h as i32;
                }
            }
            "ARM" => {
                if let Some(a) = args.first() {
                    state.armed = *a != 0.0;
                }
            }
            "DEFSHAPE" => {
                if let Some(s) = args.first() {
                    state.default_shape = PointShape::from(*s as i32);
                }
            }
            "PT" => state.points.push(parse_point(&args, text)?),
            _ => {}
        }
    }

    if !closed {
        return Err(MagenticError::malformed_chunk("missing closing '>'", text));
    }
    if !saw_act {
        return Err(MagenticError::malformed_chunk("missing ACT token", text));
    }
    if !saw_vis {
        return Err(MagenticError::malformed_chunk("missing VIS token", text));
    }
    sort_by_time(&mut state.points);
    Ok(state)
}

/// Leading run of numeric tokens following a keyword.
fn numeric_run(tokens: &[&str]) -> Vec<f64> {
    tokens
        .iter()
        .map_while(|t| t.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect()
}

fn required_flag(args: &[f64], key: &str, raw: &str) -> Result<bool> {
    match args.first() {
        Some(v) => Ok(*v != 0.0),
        None => Err(MagenticError::malformed_chunk(format!("{key} has no value"), raw)),
    }
}

fn parse_point(args: &[f64], raw: &str) -> Result<EnvelopePoint> {
    match *args {
        [time, value] => Ok(EnvelopePoint::new(time, value)),
        [time, value, shape, ..] => Ok(EnvelopePoint::with_shape(time, value, PointShape::from(shape as i32))),
        _ => Err(MagenticError::malformed_chunk(
            format!("PT needs time and value, found {} numbers", args.len()),
            raw,
        )),
    }
}
