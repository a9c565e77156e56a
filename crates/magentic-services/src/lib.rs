//! magentic-services: host access, session operations and instruction dispatch

pub mod bridge;
pub mod dispatch;
pub mod host;
pub mod memory;
pub mod session;
pub mod snapshot;

pub use bridge::{BridgeConfig, BridgeStatus, HttpHost};
pub use dispatch::{execute, execute_all, parse_batch, Instruction, Report, ReportError};
pub use host::{Host, TOGGLE_VOLUME_ENVELOPE};
pub use memory::MemoryHost;
pub use session::{
    AutomationRemoved, AutomationRequest, AutomationWritten, CreatedItem, HarmonyWritten, ItemAddr,
    MixApplied, NotesDeleted, NotesWritten, RemovalStatus, Session, TimeUnit, VisibilityChanged, Voicing,
};
pub use snapshot::{EnvelopeSnapshot, FxSnapshot, ItemSnapshot, ProjectSnapshot, TrackSnapshot};
