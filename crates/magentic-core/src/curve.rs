//! Volume automation points and perceptual curve synthesis
//!
//! The host interpolates linearly in gain between stored points, which makes a
//! two-point fade to silence sound like a late, sudden drop. A constant-dB
//! curve inserts intermediate points so the level changes at an even dB/s rate.

use serde::{Deserialize, Serialize};

use crate::error::{MagenticError, Result};

/// Lowest level used for dB math; 0.0 gain has no dB value.
pub const DB_FLOOR: f64 = -80.0;
/// `DB_FLOOR` as linear gain (0.0001)
pub const LIN_FLOOR: f64 = 1e-4;
/// Intermediate steps per segment when none is requested.
pub const DEFAULT_STEPS: usize = 20;

/// Envelope point shape, as the host numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum PointShape {
    #[default]
    Linear,
    Square,
    SlowStartEnd,
    FastStart,
    FastEnd,
    Bezier,
    Other(i32),
}

impl From<i32> for PointShape {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Linear,
            1 => Self::Square,
            2 => Self::SlowStartEnd,
            3 => Self::FastStart,
            4 => Self::FastEnd,
            5 => Self::Bezier,
            other => Self::Other(other),
        }
    }
}

impl From<PointShape> for i32 {
    fn from(shape: PointShape) -> Self {
        match shape {
            PointShape::Linear => 0,
            PointShape::Square => 1,
            PointShape::SlowStartEnd => 2,
            PointShape::FastStart => 3,
            PointShape::FastEnd => 4,
            PointShape::Bezier => 5,
            PointShape::Other(code) => code,
        }
    }
}

/// One automation point: absolute time in seconds, linear gain value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    #[serde(alias = "t")]
    pub time: f64,
    #[serde(alias = "v")]
    pub value: f64,
    #[serde(default, alias = "s")]
    pub shape: PointShape,
}

impl EnvelopePoint {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value, shape: PointShape::Linear }
    }

    pub fn with_shape(time: f64, value: f64, shape: PointShape) -> Self {
        Self { time, value, shape }
    }
}

/// How the space between two caller points should sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveKind {
    /// Straight line in gain; the host already does this
    #[default]
    Linear,
    /// Straight line in dB
    ConstantDb,
}

pub fn gain_to_db(gain: f64) -> f64 {
    20.0 * gain.max(LIN_FLOOR).log10()
}

pub fn db_to_gain(db: f64) -> f64 {
    10f64.powf(db.max(DB_FLOOR) / 20.0)
}

/// Reject points that cannot be written: non-finite times or negative/non-finite gains.
pub fn validate(points: &[EnvelopePoint]) -> Result<()> {
    for (i, p) in points.iter().enumerate() {
        if !p.time.is_finite() {
            return Err(MagenticError::InvalidArgument(format!("point {i} has non-finite time {}", p.time)));
        }
        if !p.value.is_finite() || p.value < 0.0 {
            return Err(MagenticError::InvalidArgument(format!(
                "point {i} has gain {}, expected a finite value >= 0",
                p.value
            )));
        }
    }
    Ok(())
}

/// Sort points by time, keeping the caller's order for equal times.
pub fn sort_by_time(points: &mut [EnvelopePoint]) {
    points.sort_by(|a, b| a.time.total_cmp(&b.time));
}

/// Expand caller points into what should be stored for `kind`.
///
/// Linear curves and inputs with fewer than two points come back unchanged.
/// For constant-dB, every consecutive pair yields `steps + 1` points, so the
/// shared boundary of adjacent segments appears twice. Segment endpoints keep
/// the caller's exact values, which keeps requested silence at exactly 0.0.
pub fn interpolate(points: &[EnvelopePoint], steps: usize, kind: CurveKind) -> Result<Vec<EnvelopePoint>> {
    if steps == 0 {
        return Err(MagenticError::InvalidArgument("interpolation steps must be at least 1".into()));
    }
    validate(points)?;
    if kind == CurveKind::Linear || points.len() < 2 {
        return Ok(points.to_vec());
    }

    let mut expanded = Vec::with_capacity((points.len() - 1) * (steps + 1));
    for pair in points.windows(2) {
        let (p0, p1) = (pair[0], pair[1]);
        let (db0, db1) = (gain_to_db(p0.value), gain_to_db(p1.value));
        for j in 0..=steps {
            let frac = j as f64 / steps as f64;
            let value = match j {
                // Both ends keep the exact caller value, so a silent start is
                // written as 0.0 rather than raised to the floor gain
                0 => p0.value,
                j if j == steps => p1.value,
                _ => db_to_gain(db0 + frac * (db1 - db0)),
            };
            expanded.push(EnvelopePoint::new(p0.time + frac * (p1.time - p0.time), value));
        }
    }
    Ok(expanded)
}
