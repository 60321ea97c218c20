//! Events
//!
//! Raw, append-only occurrences emitted by pipeline vehicles. Signals are
//! derived from events and point back to them through `SignalSource`.

mod event;
mod log;

pub use event::{Event, EventType, PipelineStage};
pub use log::{EventLog, EventLogCounts, ExportFormat};
