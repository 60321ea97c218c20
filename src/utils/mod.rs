//! Utils Module
pub mod jsonl;
pub mod telemetry;
