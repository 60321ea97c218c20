use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{required_str, Capability, Vehicle, VehicleCapabilities, VehicleCore};
use crate::bus::BusCategory;
use crate::contracts::{ConsumptionContract, PublicationContract, SignalHandler};
use crate::error::{HandlerError, VehicleError};
use crate::events::EventType;
use crate::signals::{OperationalKind, Signal, SignalBody, SignalConfidence, SignalContext};
use crate::substrate::SubstrateHandles;

struct Inbox {
    signals: Arc<Mutex<Vec<Arc<Signal>>>>,
}

#[async_trait]
impl SignalHandler for Inbox {
    async fn on_receive(&self, signal: Arc<Signal>) -> Result<(), HandlerError> {
        self.signals.lock().await.push(signal);
        Ok(())
    }
}

/// Collects structural and epistemic signals and dispatches them downstream
/// once an irrigation contract allows it.
///
/// Input: `{"irrigation_contract": str}`. Deliveries into the inbox are held
/// by the buses while any irrigation contract targeting this vehicle is blocked.
pub struct SignalIrrigator {
    core: VehicleCore,
    inbox: Arc<Mutex<Vec<Arc<Signal>>>>,
}

impl SignalIrrigator {
    pub const ID: &'static str = "signal_irrigator";

    pub fn new(substrate: SubstrateHandles) -> Self {
        let capabilities = VehicleCapabilities::new()
            .with(Capability::Irrigate)
            .with(Capability::Publish)
            .producing(["IrrigationDispatchSignal", "ExecutionAttemptSignal", "FailureModeSignal"])
            .consuming([
                "StructuralAlignmentSignal",
                "CanonicalMappingSignal",
                "SchemaConflictSignal",
                "EmpiricalSupportSignal",
                "AnswerDeterminacySignal",
                "AnswerSpecificitySignal",
            ]);
        Self {
            core: VehicleCore::new(Self::ID, capabilities, substrate),
            inbox: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn inbox_len(&self) -> usize {
        self.inbox.lock().await.len()
    }
}

#[async_trait]
impl Vehicle for SignalIrrigator {
    fn core(&self) -> &VehicleCore {
        &self.core
    }

    fn publication_contract(&self) -> Option<PublicationContract> {
        Some(self.core.publication_contract([BusCategory::Operational]))
    }

    fn consumption_contract(&self) -> Option<ConsumptionContract> {
        let inbox = Inbox {
            signals: Arc::clone(&self.inbox),
        };
        Some(
            ConsumptionContract::new(format!("con-{}", Self::ID), Self::ID)
                .with_buses([BusCategory::Structural, BusCategory::Epistemic])
                .with_handler(Arc::new(inbox)),
        )
    }

    async fn process(
        &self,
        input: &Value,
        context: &SignalContext,
    ) -> Result<Vec<Signal>, VehicleError> {
        self.core.require(Capability::Irrigate)?;
        let contract_id = required_str(input, "irrigation_contract")?;
        let contract = self
            .core
            .substrate()
            .contracts
            .get_irrigation(contract_id)
            .await
            .ok_or_else(|| {
                VehicleError::InvalidInput(format!("unknown irrigation contract '{contract_id}'"))
            })?;

        let requested = self
            .core
            .create_event(
                EventType::IrrigationRequested,
                json!({"contract_id": contract_id, "source_path": contract.source_path()}),
                None,
            )
            .await;
        let inbox_len = self.inbox.lock().await.len();

        let mut signals = vec![Signal::new(
            SignalBody::operational(
                OperationalKind::ExecutionAttempt,
                json!({
                    "contract_id": contract_id,
                    "inbox": inbox_len,
                    "irrigable": contract.is_irrigable(),
                }),
            ),
            Some(context.clone()),
            Some(self.core.create_signal_source(&requested)),
            SignalConfidence::High,
            format!("irrigation attempted with {inbox_len} signals waiting"),
        )?];

        if !contract.is_irrigable() {
            let gaps = contract.get_blocking_gaps();
            warn!("Irrigation {} blocked: {}", contract_id, gaps.join("; "));
            let blocked = self
                .core
                .create_event(
                    EventType::IrrigationBlocked,
                    json!({"contract_id": contract_id, "blocking_gaps": gaps}),
                    None,
                )
                .await;
            signals.push(Signal::new(
                SignalBody::operational(
                    OperationalKind::FailureMode,
                    json!({"contract_id": contract_id, "blocking_gaps": gaps}),
                ),
                Some(context.clone()),
                Some(self.core.create_signal_source(&blocked)),
                SignalConfidence::High,
                format!("{} blocking gap(s)", gaps.len()),
            )?);
            return Ok(signals);
        }

        let drained: Vec<Arc<Signal>> = std::mem::take(&mut *self.inbox.lock().await);
        let signal_ids: Vec<&str> = drained.iter().map(|s| s.signal_id()).collect();
        let completed = self
            .core
            .create_event(
                EventType::IrrigationCompleted,
                json!({"contract_id": contract_id, "dispatched": drained.len()}),
                None,
            )
            .await;
        info!(
            "Irrigation {} dispatched {} signals to {}",
            contract_id,
            drained.len(),
            contract.target_consumer()
        );
        signals.push(Signal::new(
            SignalBody::operational(
                OperationalKind::IrrigationDispatch,
                json!({
                    "contract_id": contract_id,
                    "source_path": contract.source_path(),
                    "target_consumer": contract.target_consumer(),
                    "dispatched": drained.len(),
                    "signal_ids": signal_ids,
                }),
            ),
            Some(context.clone()),
            Some(self.core.create_signal_source(&completed)),
            if drained.is_empty() { SignalConfidence::Low } else { SignalConfidence::High },
            format!("{} signals dispatched", drained.len()),
        )?);
        Ok(signals)
    }
}
