use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Capability, Vehicle, VehicleCapabilities, VehicleCore};
use crate::bus::BusCategory;
use crate::contracts::{ConsumptionContract, PublicationContract, SignalHandler};
use crate::error::{HandlerError, VehicleError};
use crate::events::EventType;
use crate::signals::{
    ConsumptionKind, ContrastKind, Signal, SignalBody, SignalCategory, SignalConfidence,
    SignalContext,
};
use crate::substrate::SubstrateHandles;

#[derive(Debug, Clone, Serialize)]
struct ConfidenceDrop {
    node_id: String,
    signal_type: String,
    from: SignalConfidence,
    to: SignalConfidence,
    signal_id: String,
}

#[derive(Debug, Default)]
struct Ledger {
    total: u64,
    received: BTreeMap<String, u64>,
    latest: HashMap<(String, String), SignalConfidence>,
    drops: Vec<ConfidenceDrop>,
}

impl Ledger {
    fn record(&mut self, signal: &Signal) {
        self.total += 1;
        *self.received.entry(signal.signal_type().to_string()).or_default() += 1;

        let key = (signal.context().node_id.clone(), signal.signal_type().to_string());
        if let Some(previous) = self.latest.insert(key.clone(), signal.confidence()) {
            if signal.confidence() < previous {
                self.drops.push(ConfidenceDrop {
                    node_id: key.0,
                    signal_type: key.1,
                    from: previous,
                    to: signal.confidence(),
                    signal_id: signal.signal_id().to_string(),
                });
            }
        }
    }
}

struct QualityIntake {
    ledger: Arc<Mutex<Ledger>>,
}

#[async_trait]
impl SignalHandler for QualityIntake {
    async fn on_receive(&self, signal: Arc<Signal>) -> Result<(), HandlerError> {
        self.ledger.lock().await.record(&signal);
        debug!("quality_metrics received {}", signal.signal_id());
        Ok(())
    }
}

/// Watches epistemic and integrity traffic and reports on it.
///
/// Consumes every signal on the epistemic and integrity buses. `process`
/// publishes consumption frequency and consumer health, plus one contrast
/// signal per confidence drop seen since the last run.
pub struct QualityMetrics {
    core: VehicleCore,
    ledger: Arc<Mutex<Ledger>>,
}

impl QualityMetrics {
    pub const ID: &'static str = "quality_metrics";

    pub fn new(substrate: SubstrateHandles) -> Self {
        let capabilities = VehicleCapabilities::new()
            .with(Capability::Analyze)
            .with(Capability::Publish)
            .producing(["FrequencySignal", "ConsumerHealthSignal", "ConfidenceDropSignal"])
            .consuming([
                "EmpiricalSupportSignal",
                "AnswerDeterminacySignal",
                "AnswerSpecificitySignal",
                "EventPresenceSignal",
                "EventCompletenessSignal",
                "DataIntegritySignal",
            ]);
        Self {
            core: VehicleCore::new(Self::ID, capabilities, substrate),
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    /// Signals received so far.
    pub async fn received_total(&self) -> u64 {
        self.ledger.lock().await.total
    }
}

#[async_trait]
impl Vehicle for QualityMetrics {
    fn core(&self) -> &VehicleCore {
        &self.core
    }

    fn publication_contract(&self) -> Option<PublicationContract> {
        Some(
            self.core
                .publication_contract([BusCategory::Consumption, BusCategory::Contrast]),
        )
    }

    fn consumption_contract(&self) -> Option<ConsumptionContract> {
        let intake = QualityIntake {
            ledger: Arc::clone(&self.ledger),
        };
        Some(
            ConsumptionContract::new(format!("con-{}", Self::ID), Self::ID)
                .with_buses([BusCategory::Epistemic, BusCategory::Integrity])
                .with_categories([SignalCategory::Epistemic, SignalCategory::Integrity])
                .with_handler(Arc::new(intake)),
        )
    }

    async fn process(
        &self,
        _input: &Value,
        context: &SignalContext,
    ) -> Result<Vec<Signal>, VehicleError> {
        self.core.require(Capability::Analyze)?;
        let (total, received, drops) = {
            let mut ledger = self.ledger.lock().await;
            (ledger.total, ledger.received.clone(), std::mem::take(&mut ledger.drops))
        };

        let assessed = self
            .core
            .create_event(
                EventType::QualityAssessed,
                json!({
                    "received": total,
                    "signal_types": received.len(),
                    "confidence_drops": drops.len(),
                }),
                None,
            )
            .await;
        let source = self.core.create_signal_source(&assessed);

        let health = match (total, drops.is_empty()) {
            (0, _) => SignalConfidence::Indeterminate,
            (_, true) => SignalConfidence::High,
            (_, false) => SignalConfidence::Medium,
        };

        let mut signals = vec![
            Signal::new(
                SignalBody::consumption(
                    ConsumptionKind::FrequencySignal,
                    json!({"total": total, "by_type": received}),
                ),
                Some(context.clone()),
                Some(source.clone()),
                if total > 0 { SignalConfidence::High } else { SignalConfidence::Indeterminate },
                format!("{total} signals consumed"),
            )?,
            Signal::new(
                SignalBody::consumption(
                    ConsumptionKind::ConsumerHealth,
                    json!({"consumer": Self::ID, "total": total, "confidence_drops": drops.len()}),
                ),
                Some(context.clone()),
                Some(source.clone()),
                health,
                format!("{} confidence drops across {} signals", drops.len(), total),
            )?,
        ];

        for drop in drops {
            let rationale = format!(
                "{} on {} fell from {} to {}",
                drop.signal_type, drop.node_id, drop.from, drop.to
            );
            signals.push(Signal::new(
                SignalBody::contrast(
                    ContrastKind::ConfidenceDrop,
                    serde_json::to_value(&drop).unwrap_or(Value::Null),
                ),
                Some(context.clone()),
                Some(source.clone()),
                SignalConfidence::Medium,
                rationale,
            )?);
        }

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{EpistemicKind, SignalSource};

    fn support(node: &str, confidence: SignalConfidence) -> Arc<Signal> {
        Arc::new(
            Signal::new(
                SignalBody::epistemic(EpistemicKind::EmpiricalSupport, json!({})),
                Some(SignalContext::new("document", node, "extraction")),
                Some(SignalSource::new("evt-1", "evidence_extractor")),
                confidence,
                "support",
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_intake_detects_confidence_drop() {
        let quality = QualityMetrics::new(SubstrateHandles::in_memory());
        let contract = quality.consumption_contract().unwrap();
        let handler = contract.handler().unwrap();

        handler.on_receive(support("doc-1", SignalConfidence::High)).await.unwrap();
        handler.on_receive(support("doc-1", SignalConfidence::Low)).await.unwrap();
        handler.on_receive(support("doc-2", SignalConfidence::Low)).await.unwrap();
        assert_eq!(quality.received_total().await, 3);

        let signals = quality
            .process(&json!({}), &SignalContext::new("pipeline", "run-1", "analysis"))
            .await
            .unwrap();
        let types: Vec<&str> = signals.iter().map(|s| s.signal_type()).collect();
        assert_eq!(types, vec!["FrequencySignal", "ConsumerHealthSignal", "ConfidenceDropSignal"]);
        assert_eq!(signals[1].confidence(), SignalConfidence::Medium);
        assert_eq!(signals[2].payload()["from"], "HIGH");

        // Drops are reported once.
        let again = quality
            .process(&json!({}), &SignalContext::new("pipeline", "run-1", "analysis"))
            .await
            .unwrap();
        assert_eq!(again.len(), 2);
    }
}
