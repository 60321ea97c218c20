//! SISAS: Signal Infrastructure Substrate
//!
//! Event-sourced, contract-gated signal delivery for document-analysis
//! pipelines:
//! - Append-only event log with archival and a JSONL journal
//! - Immutable, hash-addressed signals with provenance
//! - Publication, consumption and irrigation contracts
//! - One priority bus per signal category, with back-pressure,
//!   per-consumer circuit breaking, retries and dead letters
//! - Vehicles that turn input into signals

pub mod bus;
pub mod config;
pub mod contracts;
pub mod error;
pub mod events;
pub mod signals;
pub mod substrate;
pub mod utils;
pub mod vehicles;

// Re-exports for convenience
pub use bus::{BusCategory, BusRegistry, SignalBus};
pub use config::SubstrateConfig;
pub use error::SisasError;
pub use events::{Event, EventLog, EventType};
pub use signals::{Signal, SignalConfidence, SignalContext};
pub use substrate::{Substrate, SubstrateHandles};
pub use vehicles::Vehicle;
