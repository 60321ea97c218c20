use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bus::{BusCategory, MessagePriority};
use crate::contracts::{ConsumptionContract, PublicationContract};
use crate::error::VehicleError;
use crate::events::{Event, EventType};
use crate::signals::{AuditEntry, Signal, SignalSource};
use crate::substrate::SubstrateHandles;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Load,
    Transform,
    Scope,
    Extract,
    Analyze,
    Irrigate,
    Publish,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Load => "load",
            Capability::Transform => "transform",
            Capability::Scope => "scope",
            Capability::Extract => "extract",
            Capability::Analyze => "analyze",
            Capability::Irrigate => "irrigate",
            Capability::Publish => "publish",
        }
    }
}

/// What a vehicle can do and which signal types it produces and consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleCapabilities {
    pub can_load: bool,
    pub can_transform: bool,
    pub can_scope: bool,
    pub can_extract: bool,
    pub can_analyze: bool,
    pub can_irrigate: bool,
    pub can_publish: bool,
    pub produces: BTreeSet<String>,
    pub consumes: BTreeSet<String>,
}

impl VehicleCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Load => self.can_load = true,
            Capability::Transform => self.can_transform = true,
            Capability::Scope => self.can_scope = true,
            Capability::Extract => self.can_extract = true,
            Capability::Analyze => self.can_analyze = true,
            Capability::Irrigate => self.can_irrigate = true,
            Capability::Publish => self.can_publish = true,
        }
        self
    }

    pub fn producing<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn consuming<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.consumes.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Load => self.can_load,
            Capability::Transform => self.can_transform,
            Capability::Scope => self.can_scope,
            Capability::Extract => self.can_extract,
            Capability::Analyze => self.can_analyze,
            Capability::Irrigate => self.can_irrigate,
            Capability::Publish => self.can_publish,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleStats {
    pub vehicle_id: String,
    pub active: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub events_created: u64,
    pub signals_published: u64,
    pub signals_rejected: u64,
    pub capabilities: VehicleCapabilities,
}

/// State and substrate access shared by every vehicle.
///
/// Capabilities are fixed at construction. A vehicle starts inactive.
pub struct VehicleCore {
    vehicle_id: String,
    capabilities: VehicleCapabilities,
    active: AtomicBool,
    last_activity: RwLock<Option<DateTime<Utc>>>,
    events_created: AtomicU64,
    signals_published: AtomicU64,
    signals_rejected: AtomicU64,
    substrate: SubstrateHandles,
}

impl VehicleCore {
    pub fn new(
        vehicle_id: impl Into<String>,
        capabilities: VehicleCapabilities,
        substrate: SubstrateHandles,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            capabilities,
            active: AtomicBool::new(false),
            last_activity: RwLock::new(None),
            events_created: AtomicU64::new(0),
            signals_published: AtomicU64::new(0),
            signals_rejected: AtomicU64::new(0),
            substrate,
        }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn capabilities(&self) -> &VehicleCapabilities {
        &self.capabilities
    }

    pub fn substrate(&self) -> &SubstrateHandles {
        &self.substrate
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn activate(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            info!("Vehicle {} activated", self.vehicle_id);
            self.touch().await;
        }
    }

    pub async fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("Vehicle {} deactivated", self.vehicle_id);
        }
    }

    pub async fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.read().await
    }

    async fn touch(&self) {
        *self.last_activity.write().await = Some(Utc::now());
    }

    pub fn require(&self, capability: Capability) -> Result<(), VehicleError> {
        if self.capabilities.has(capability) {
            Ok(())
        } else {
            Err(VehicleError::MissingCapability {
                vehicle: self.vehicle_id.clone(),
                capability: capability.as_str().to_string(),
            })
        }
    }

    /// Append an event authored by this vehicle and return it.
    pub async fn create_event(
        &self,
        event_type: EventType,
        payload: Value,
        source_file: Option<&str>,
    ) -> Event {
        let mut event = Event::new(event_type, self.vehicle_id.clone(), payload);
        if let Some(file) = source_file {
            event = event.with_source_file(file);
        }
        self.substrate.event_log.append(event.clone()).await;
        self.events_created.fetch_add(1, Ordering::Relaxed);
        self.touch().await;
        event
    }

    /// Provenance pointing at `event`, generated by this vehicle.
    pub fn create_signal_source(&self, event: &Event) -> SignalSource {
        let source = SignalSource::new(event.event_id(), self.vehicle_id.clone());
        match event.source_file() {
            Some(file) => source.with_source_file(file),
            None => source,
        }
    }

    /// A publication contract allowing every produced type on `buses`.
    pub fn publication_contract(
        &self,
        buses: impl IntoIterator<Item = BusCategory>,
    ) -> PublicationContract {
        PublicationContract::new(format!("pub-{}", self.vehicle_id), self.vehicle_id.clone())
            .with_signal_types(self.capabilities.produces.iter().cloned())
            .with_buses(buses)
    }

    pub async fn publish_signal(&self, signal: Signal) -> Result<String, VehicleError> {
        self.publish_signal_with_priority(signal, MessagePriority::Normal).await
    }

    /// Check capabilities and the registered publication contract, then hand
    /// the signal to the bus registry.
    pub async fn publish_signal_with_priority(
        &self,
        signal: Signal,
        priority: MessagePriority,
    ) -> Result<String, VehicleError> {
        let outcome = self.try_publish(signal, priority).await;
        match &outcome {
            Ok(_) => {
                self.signals_published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.signals_rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Vehicle {} could not publish: {}", self.vehicle_id, e);
            }
        }
        self.touch().await;
        outcome
    }

    async fn try_publish(
        &self,
        signal: Signal,
        priority: MessagePriority,
    ) -> Result<String, VehicleError> {
        if !self.is_active() {
            return Err(VehicleError::Inactive(self.vehicle_id.clone()));
        }
        self.require(Capability::Publish)?;
        if !self.capabilities.produces.contains(signal.signal_type()) {
            return Err(VehicleError::UndeclaredSignalType {
                vehicle: self.vehicle_id.clone(),
                signal_type: signal.signal_type().to_string(),
            });
        }
        let contract = self
            .substrate
            .contracts
            .active_publication_for(&self.vehicle_id)
            .await
            .ok_or_else(|| VehicleError::NoPublicationContract(self.vehicle_id.clone()))?;

        let signal_id = signal.signal_id().to_string();
        let message_id = self
            .substrate
            .buses
            .publish_to_appropriate_bus_with_priority(
                Arc::new(signal),
                &self.vehicle_id,
                &contract,
                priority,
            )
            .await?;

        let entry =
            AuditEntry::new(self.vehicle_id.clone(), "published").with_detail(message_id.clone());
        self.substrate.audit.append(&signal_id, entry).await;
        debug!("Vehicle {} published {} as {}", self.vehicle_id, signal_id, message_id);
        Ok(message_id)
    }

    /// Register `contract` and subscribe it on every bus it lists.
    ///
    /// The contract must name this vehicle as consumer and may only filter on
    /// declared consumed types.
    pub async fn subscribe(
        &self,
        contract: ConsumptionContract,
    ) -> Result<Vec<BusCategory>, VehicleError> {
        if contract.consumer_id() != self.vehicle_id {
            return Err(VehicleError::InvalidInput(format!(
                "consumption contract '{}' names consumer '{}'",
                contract.contract_id(),
                contract.consumer_id()
            )));
        }
        if let Some(undeclared) = contract
            .signal_types()
            .iter()
            .find(|t| !self.capabilities.consumes.contains(*t))
        {
            return Err(VehicleError::UndeclaredSignalType {
                vehicle: self.vehicle_id.clone(),
                signal_type: undeclared.clone(),
            });
        }

        let contract_id = contract.contract_id().to_string();
        self.substrate.contracts.register_consumption(contract).await?;
        let registered = self
            .substrate
            .contracts
            .get_consumption(&contract_id)
            .await
            .ok_or_else(|| {
                VehicleError::InvalidInput(format!(
                    "contract '{contract_id}' vanished after registration"
                ))
            })?;
        Ok(self.substrate.buses.subscribe(registered).await)
    }

    pub async fn get_stats(&self) -> VehicleStats {
        VehicleStats {
            vehicle_id: self.vehicle_id.clone(),
            active: self.is_active(),
            last_activity: self.last_activity().await,
            events_created: self.events_created.load(Ordering::Relaxed),
            signals_published: self.signals_published.load(Ordering::Relaxed),
            signals_rejected: self.signals_rejected.load(Ordering::Relaxed),
            capabilities: self.capabilities.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{IntegrityKind, SignalBody, SignalConfidence, SignalContext};
    use serde_json::json;

    fn core(substrate: SubstrateHandles) -> VehicleCore {
        VehicleCore::new(
            "sampler",
            VehicleCapabilities::new()
                .with(Capability::Publish)
                .producing(["EventPresenceSignal"]),
            substrate,
        )
    }

    fn signal(core: &VehicleCore, event: &Event, kind: IntegrityKind) -> Signal {
        Signal::new(
            SignalBody::integrity(kind, json!({"present": true})),
            Some(SignalContext::new("document", "doc-1", "ingestion")),
            Some(core.create_signal_source(event)),
            SignalConfidence::High,
            "sampler",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_requires_activation_and_contract() {
        let substrate = SubstrateHandles::in_memory();
        let core = core(substrate.clone());
        let event = core.create_event(EventType::DocumentLoaded, json!({}), Some("a.pdf")).await;
        assert_eq!(substrate.event_log.count().await, 1);

        let err = core
            .publish_signal(signal(&core, &event, IntegrityKind::EventPresence))
            .await
            .unwrap_err();
        assert!(matches!(err, VehicleError::Inactive(_)));

        core.activate().await;
        let err = core
            .publish_signal(signal(&core, &event, IntegrityKind::EventPresence))
            .await
            .unwrap_err();
        assert!(matches!(err, VehicleError::NoPublicationContract(_)));

        substrate
            .contracts
            .register_publication(core.publication_contract([BusCategory::Integrity]))
            .await
            .unwrap();
        let message_id = core
            .publish_signal(signal(&core, &event, IntegrityKind::EventPresence))
            .await
            .unwrap();
        assert!(message_id.starts_with("msg-"));

        let stats = core.get_stats().await;
        assert_eq!(stats.signals_published, 1);
        assert_eq!(stats.signals_rejected, 2);
        assert_eq!(stats.events_created, 1);
        assert_eq!(substrate.audit.len().await, 1);
    }

    #[tokio::test]
    async fn test_undeclared_type_rejected() {
        let substrate = SubstrateHandles::in_memory();
        let core = core(substrate.clone());
        core.activate().await;
        let event = core.create_event(EventType::DocumentLoaded, json!({}), None).await;
        let err = core
            .publish_signal(signal(&core, &event, IntegrityKind::DataIntegrity))
            .await
            .unwrap_err();
        assert!(matches!(err, VehicleError::UndeclaredSignalType { .. }));
    }

    #[test]
    fn test_signal_source_carries_event_and_file() {
        let core = core(SubstrateHandles::in_memory());
        let event = Event::new(EventType::DocumentLoaded, "sampler", json!({}))
            .with_source_file("plan.pdf");
        let source = core.create_signal_source(&event);
        assert_eq!(source.event_id, event.event_id());
        assert_eq!(source.source_file.as_deref(), Some("plan.pdf"));
    }
}
