//! Opaque host object handles

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MagenticError, Result};
use crate::track::EntityRef;

/// An opaque handle returned by the host's scripting surface.
///
/// Depending on which call produced it, the same "no object" answer can come
/// back as JSON `null`, a numeric zero, an empty string, the words `None` or
/// `nil`, or a typed pointer string like `(TrackEnvelope*)0x0000000000000000`.
/// [`Handle::is_null`] is the only place these encodings are interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Handle {
    #[default]
    Missing,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Handle {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Typed pointer string in the host's notation, e.g. `(MediaTrack*)0x00000000000A1F20`.
    pub fn pointer(type_name: &str, address: u64) -> Self {
        Self::Text(format!("({type_name}*)0x{address:016X}"))
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::Int(n) => *n == 0,
            Self::Float(f) => *f == 0.0,
            Self::Text(s) => text_is_null(s.trim()),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.is_null()
    }

    /// Address carried by a pointer string or integer handle.
    pub fn address(&self) -> Option<u64> {
        match self {
            Self::Int(n) => u64::try_from(*n).ok(),
            Self::Text(s) => {
                let (_, hex) = s.rsplit_once("0x")?;
                u64::from_str_radix(hex.trim_end_matches(')'), 16).ok()
            }
            _ => None,
        }
    }

    /// Pass the handle through, or fail with `NullHandle` naming what it was for.
    pub fn require(self, target: EntityRef, what: &str) -> Result<Self> {
        if self.is_null() {
            return Err(MagenticError::NullHandle { target, what: what.to_string() });
        }
        Ok(self)
    }
}

fn text_is_null(s: &str) -> bool {
    if matches!(s, "" | "0" | "None" | "nil") {
        return true;
    }
    let Some((_, hex)) = s.rsplit_once("0x") else {
        return false;
    };
    let hex = hex.trim_end_matches(')');
    !hex.is_empty()
        && hex.chars().all(|c| c.is_ascii_hexdigit())
        && hex.chars().all(|c| c == '0')
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "None"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_encodings() {
        assert!(Handle::text("(TrackEnvelope*)0x0000000000000000").is_null());
        assert!(Handle::Int(0).is_null());
        assert!(Handle::Float(0.0).is_null());
        assert!(Handle::Missing.is_null());
        assert!(Handle::text("").is_null());
        assert!(Handle::text("None").is_null());
        assert!(Handle::text("nil").is_null());
        assert!(Handle::text("0").is_null());
        assert!(Handle::text("0x0").is_null());
    }

    #[test]
    fn test_valid_encodings() {
        assert!(!Handle::text("(TrackEnvelope*)0x00007FF1A2B3C4D5").is_null());
        assert!(!Handle::Int(140_737_488_355_328).is_null());
        assert!(!Handle::text("(MediaItem*)0xnothex").is_null());
        assert!(!Handle::text("0x").is_null());
        assert!(!Handle::text("track").is_null());
    }

    #[test]
    fn test_pointer_round_trip() {
        let handle = Handle::pointer("MediaTrack", 0xA1F20);
        assert_eq!(handle, Handle::text("(MediaTrack*)0x00000000000A1F20"));
        assert_eq!(handle.address(), Some(0xA1F20));
        assert!(Handle::pointer("TrackEnvelope", 0).is_null());
    }

    #[test]
    fn test_deserialize_any_shape() {
        let handles: Vec<Handle> =
            serde_json::from_str(r#"[null, 0, 12, 0.0, "", "(MediaTrack*)0x00000000000000FF"]"#).unwrap();
        let nulls: Vec<bool> = handles.iter().map(Handle::is_null).collect();
        assert_eq!(nulls, vec![true, true, false, true, true, false]);
    }

    #[test]
    fn test_require() {
        let target = EntityRef::track(3);
        let err = Handle::Int(0).require(target, "volume envelope").unwrap_err();
        assert_eq!(err.kind(), "null_handle");
        assert_eq!(err.target(), Some(&target));
        assert!(Handle::Int(7).require(target, "track").is_ok());
    }
}
