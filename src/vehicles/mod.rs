//! Vehicles
//!
//! Producers (and some consumers) of signals. A vehicle turns input into
//! signals in `process`; `run` publishes what `process` produced through the
//! vehicle's publication contract.

mod base;
mod extractor;
mod irrigator;
mod loader;
mod quality;
mod registry;
mod scoper;

pub use base::{Capability, VehicleCapabilities, VehicleCore, VehicleStats};
pub use extractor::EvidenceExtractor;
pub use irrigator::SignalIrrigator;
pub use loader::DocumentLoader;
pub use quality::QualityMetrics;
pub use registry::VehicleRegistry;
pub use scoper::ContextScoper;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::contracts::{ConsumptionContract, PublicationContract};
use crate::error::VehicleError;
use crate::signals::{Signal, SignalContext};

/// Result of one `run`: publications that went through and those that did not.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    pub published: Vec<String>,
    pub rejected: Vec<RejectedSignal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedSignal {
    pub signal_id: String,
    pub signal_type: String,
    pub reason: String,
}

#[async_trait]
pub trait Vehicle: Send + Sync {
    fn core(&self) -> &VehicleCore;

    fn vehicle_id(&self) -> &str {
        self.core().vehicle_id()
    }

    /// Contract this vehicle publishes under, if it publishes at all.
    fn publication_contract(&self) -> Option<PublicationContract> {
        None
    }

    /// Contract this vehicle consumes under, if it consumes at all.
    fn consumption_contract(&self) -> Option<ConsumptionContract> {
        None
    }

    /// Turn `input` into signals scoped by `context`. Does not publish.
    async fn process(
        &self,
        input: &Value,
        context: &SignalContext,
    ) -> Result<Vec<Signal>, VehicleError>;

    /// `process`, then publish every signal. A rejected signal does not stop the rest.
    async fn run(
        &self,
        input: &Value,
        context: &SignalContext,
    ) -> Result<RunOutcome, VehicleError> {
        let signals = self.process(input, context).await?;
        let mut outcome = RunOutcome::default();
        for signal in signals {
            let signal_id = signal.signal_id().to_string();
            let signal_type = signal.signal_type().to_string();
            match self.core().publish_signal(signal).await {
                Ok(message_id) => outcome.published.push(message_id),
                Err(e) => outcome.rejected.push(RejectedSignal {
                    signal_id,
                    signal_type,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }
}

/// Confidence from a ratio in `[0, 1]`: 1 is High, at least half is Medium,
/// anything above zero is Low.
pub(crate) fn confidence_from_ratio(ratio: f64) -> crate::signals::SignalConfidence {
    use crate::signals::SignalConfidence;
    if ratio >= 1.0 {
        SignalConfidence::High
    } else if ratio >= 0.5 {
        SignalConfidence::Medium
    } else if ratio > 0.0 {
        SignalConfidence::Low
    } else {
        SignalConfidence::Indeterminate
    }
}

/// Required string field from a JSON input object.
pub(crate) fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, VehicleError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| VehicleError::InvalidInput(format!("missing string field '{field}'")))
}
