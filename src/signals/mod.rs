//! Signals
//!
//! Immutable, hash-addressable facts derived from events. A signal always
//! knows where it applies (`SignalContext`), where it came from
//! (`SignalSource`) and how sure its producer is (`SignalConfidence`).

mod audit;
mod body;
mod hash;
mod signal;
mod types;

pub use audit::{AuditLog, AuditRecord};
pub use body::{
    ConsumptionKind, ContrastKind, EpistemicKind, IntegrityKind, OperationalKind, SignalBody,
    StructuralKind,
};
pub use hash::{canonical_json, ContentHash};
pub use signal::{Signal, SignalBuilder};
pub use types::{AuditEntry, SignalCategory, SignalConfidence, SignalContext, SignalSource};
