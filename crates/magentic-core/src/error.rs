//! Error types for magentic

use thiserror::Error;

use crate::track::EntityRef;

#[derive(Debug, Error)]
pub enum MagenticError {
    #[error("Host unreachable: {0}")]
    HostUnreachable(String),
    #[error("Host call {call} timed out after {secs}s (outcome unknown, the host may have applied it)")]
    Timeout { call: String, secs: u64 },
    #[error("Host call {call} failed: {message}")]
    Host { call: String, message: String },
    #[error("Invalid reference to {target}: {reason}")]
    InvalidReference { target: EntityRef, reason: String },
    #[error("Null {what} handle for {target}")]
    NullHandle { target: EntityRef, what: String },
    #[error("Malformed envelope chunk: {reason}\n--- raw chunk ---\n{raw}")]
    MalformedChunk { reason: String, raw: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Could not clear {target}: {remaining} notes remain")]
    IncompleteDelete { target: EntityRef, remaining: usize },
    #[error("Host lock poisoned by an earlier panic")]
    LockPoisoned,
    #[error("JSON error: {0}")]
    Json(String),
}

impl MagenticError {
    /// Stable tag used in structured reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HostUnreachable(_) => "host_unreachable",
            Self::Timeout { .. } => "timeout",
            Self::Host { .. } => "host_error",
            Self::InvalidReference { .. } => "invalid_reference",
            Self::NullHandle { .. } => "null_handle",
            Self::MalformedChunk { .. } => "malformed_chunk",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::IncompleteDelete { .. } => "incomplete_delete",
            Self::LockPoisoned => "lock_poisoned",
            Self::Json(_) => "json",
        }
    }

    /// The musical entity the failing step targeted, when known.
    pub fn target(&self) -> Option<&EntityRef> {
        match self {
            Self::InvalidReference { target, .. }
            | Self::NullHandle { target, .. }
            | Self::IncompleteDelete { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn invalid_reference(target: EntityRef, reason: impl Into<String>) -> Self {
        Self::InvalidReference { target, reason: reason.into() }
    }

    pub fn malformed_chunk(reason: impl Into<String>, raw: &str) -> Self {
        Self::MalformedChunk { reason: reason.into(), raw: raw.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, MagenticError>;
