//! Track-level references and mix properties

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which musical entity an operation targeted.
///
/// Indices are positional snapshots: inserting or removing a track or item
/// shifts every index after it, so a reference is only meaningful against
/// the project state it was read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<usize>,
}

impl EntityRef {
    pub fn project() -> Self {
        Self::default()
    }

    pub fn track(track: usize) -> Self {
        Self { track: Some(track), ..Self::default() }
    }

    pub fn item(track: usize, item: usize) -> Self {
        Self { track: Some(track), item: Some(item), note: None }
    }

    pub fn note(self, note: usize) -> Self {
        Self { note: Some(note), ..self }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.track, self.item, self.note) {
            (None, _, _) => write!(f, "project"),
            (Some(t), None, _) => write!(f, "track {t}"),
            (Some(t), Some(i), None) => write!(f, "track {t} item {i}"),
            (Some(t), Some(i), Some(n)) => write!(f, "track {t} item {i} note {n}"),
        }
    }
}

/// Numeric track properties exposed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackParam {
    /// Linear gain, 1.0 = unity
    Volume,
    /// -1.0 left .. 1.0 right
    Pan,
    Mute,
    Solo,
    RecArm,
    /// Host-native packed color
    Color,
}

impl TrackParam {
    /// Host property key.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Volume => "D_VOL",
            Self::Pan => "D_PAN",
            Self::Mute => "B_MUTE",
            Self::Solo => "I_SOLO",
            Self::RecArm => "I_RECARM",
            Self::Color => "I_CUSTOMCOLOR",
        }
    }
}

/// Partial mix update for one track. Unset fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMix {
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub pan: Option<f64>,
    #[serde(default)]
    pub mute: Option<bool>,
    #[serde(default)]
    pub solo: Option<bool>,
    #[serde(default)]
    pub armed: Option<bool>,
    /// RGB, 0-255 each
    #[serde(default)]
    pub color: Option<[u8; 3]>,
}

impl TrackMix {
    /// Property writes in host units, clamped to the host's accepted ranges.
    pub fn writes(&self) -> Vec<(TrackParam, f64)> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let mut out = Vec::new();
        if let Some(v) = self.volume {
            out.push((TrackParam::Volume, v.max(0.0)));
        }
        if let Some(p) = self.pan {
            out.push((TrackParam::Pan, p.clamp(-1.0, 1.0)));
        }
        if let Some(m) = self.mute {
            out.push((TrackParam::Mute, flag(m)));
        }
        if let Some(s) = self.solo {
            out.push((TrackParam::Solo, flag(s)));
        }
        if let Some(a) = self.armed {
            out.push((TrackParam::RecArm, flag(a)));
        }
        if let Some(rgb) = self.color {
            out.push((TrackParam::Color, rgb_to_native(rgb) as f64));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.writes().is_empty()
    }
}

/// Flag bit the host sets on a custom color that is in use.
pub const CUSTOM_COLOR_FLAG: i64 = 0x0100_0000;

/// Pack RGB into the host's native color value (custom-color flag set).
pub fn rgb_to_native([r, g, b]: [u8; 3]) -> i64 {
    (r as i64) | ((g as i64) << 8) | ((b as i64) << 16) | CUSTOM_COLOR_FLAG
}

/// Unpack a native color; `None` when no custom color is set.
pub fn native_to_rgb(native: i64) -> Option<[u8; 3]> {
    if native & CUSTOM_COLOR_FLAG == 0 {
        return None;
    }
    Some([
        (native & 0xFF) as u8,
        ((native >> 8) & 0xFF) as u8,
        ((native >> 16) & 0xFF) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_display() {
        assert_eq!(EntityRef::project().to_string(), "project");
        assert_eq!(EntityRef::track(2).to_string(), "track 2");
        assert_eq!(EntityRef::item(2, 0).note(5).to_string(), "track 2 item 0 note 5");
    }

    #[test]
    fn test_mix_writes_clamp() {
        let mix = TrackMix { pan: Some(-3.0), mute: Some(true), ..Default::default() };
        assert_eq!(mix.writes(), vec![(TrackParam::Pan, -1.0), (TrackParam::Mute, 1.0)]);
        assert!(TrackMix::default().is_empty());
    }

    #[test]
    fn test_color_packing() {
        let native = rgb_to_native([255, 128, 0]);
        assert_eq!(native_to_rgb(native), Some([255, 128, 0]));
        assert_eq!(native_to_rgb(0), None);
    }
}
