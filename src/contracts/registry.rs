use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ConsumptionContract, ContractStatus, IrrigationContract, PublicationContract};
use crate::error::ContractError;
use crate::signals::Signal;

/// Any contract, for registration paths that take all three kinds.
#[derive(Debug, Clone)]
pub enum Contract {
    Publication(PublicationContract),
    Consumption(ConsumptionContract),
    Irrigation(IrrigationContract),
}

impl Contract {
    pub fn contract_id(&self) -> &str {
        match self {
            Contract::Publication(c) => c.contract_id(),
            Contract::Consumption(c) => c.contract_id(),
            Contract::Irrigation(c) => c.contract_id(),
        }
    }
}

/// Contracts that name a given vehicle.
#[derive(Debug, Clone, Default)]
pub struct VehicleContracts {
    pub publication: Vec<Arc<PublicationContract>>,
    pub consumption: Vec<Arc<ConsumptionContract>>,
    pub irrigation: Vec<Arc<IrrigationContract>>,
}

impl VehicleContracts {
    pub fn is_empty(&self) -> bool {
        self.publication.is_empty() && self.consumption.is_empty() && self.irrigation.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContractSummary {
    pub publication: usize,
    pub consumption: usize,
    pub irrigation: usize,
    pub draft: usize,
    pub active: usize,
    pub suspended: usize,
    pub terminated: usize,
    pub irrigable: usize,
    pub blocked: usize,
}

struct Entry<C> {
    contract: Arc<C>,
    status: ContractStatus,
}

impl<C> Entry<C> {
    fn new(contract: C, status: ContractStatus) -> Self {
        Self {
            contract: Arc::new(contract),
            status,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    publication: HashMap<String, Entry<PublicationContract>>,
    consumption: HashMap<String, Entry<ConsumptionContract>>,
    irrigation: HashMap<String, Entry<IrrigationContract>>,
}

impl RegistryInner {
    fn contains(&self, id: &str) -> bool {
        self.publication.contains_key(id)
            || self.consumption.contains_key(id)
            || self.irrigation.contains_key(id)
    }

    fn status_mut(&mut self, id: &str) -> Option<&mut ContractStatus> {
        if let Some(e) = self.publication.get_mut(id) {
            return Some(&mut e.status);
        }
        if let Some(e) = self.consumption.get_mut(id) {
            return Some(&mut e.status);
        }
        self.irrigation.get_mut(id).map(|e| &mut e.status)
    }

    fn active_irrigation(&self) -> impl Iterator<Item = &Arc<IrrigationContract>> {
        self.irrigation
            .values()
            .filter(|e| e.status == ContractStatus::Active)
            .map(|e| &e.contract)
    }
}

/// Owns every contract and its lifecycle status.
///
/// Contract ids are unique across all three kinds.
#[derive(Default)]
pub struct ContractRegistry {
    inner: RwLock<RegistryInner>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(
        &self,
        contract: Contract,
        status: ContractStatus,
    ) -> Result<(), ContractError> {
        let mut inner = self.inner.write().await;
        let id = contract.contract_id().to_string();
        if inner.contains(&id) {
            return Err(ContractError::Duplicate(id));
        }
        match contract {
            Contract::Publication(c) => {
                debug!("Registered publication contract {} for {}", id, c.publisher_vehicle());
                inner.publication.insert(id, Entry::new(c, status));
            }
            Contract::Consumption(c) => {
                debug!("Registered consumption contract {} for {}", id, c.consumer_id());
                inner.consumption.insert(id, Entry::new(c, status));
            }
            Contract::Irrigation(c) => {
                debug!(
                    "Registered irrigation contract {} ({} -> {}), irrigable: {}",
                    id,
                    c.source_path(),
                    c.target_consumer(),
                    c.is_irrigable()
                );
                inner.irrigation.insert(id, Entry::new(c, status));
            }
        }
        Ok(())
    }

    pub async fn register_publication(
        &self,
        contract: PublicationContract,
    ) -> Result<(), ContractError> {
        self.insert(Contract::Publication(contract), ContractStatus::Active).await
    }

    pub async fn register_consumption(
        &self,
        contract: ConsumptionContract,
    ) -> Result<(), ContractError> {
        self.insert(Contract::Consumption(contract), ContractStatus::Active).await
    }

    pub async fn register_irrigation(
        &self,
        contract: IrrigationContract,
    ) -> Result<(), ContractError> {
        self.insert(Contract::Irrigation(contract), ContractStatus::Active).await
    }

    /// Register without activating. Use `set_status` to activate later.
    pub async fn register_draft(&self, contract: Contract) -> Result<(), ContractError> {
        self.insert(contract, ContractStatus::Draft).await
    }

    pub async fn status(&self, contract_id: &str) -> Option<ContractStatus> {
        let inner = self.inner.read().await;
        inner
            .publication
            .get(contract_id)
            .map(|e| e.status)
            .or_else(|| inner.consumption.get(contract_id).map(|e| e.status))
            .or_else(|| inner.irrigation.get(contract_id).map(|e| e.status))
    }

    pub async fn set_status(
        &self,
        contract_id: &str,
        next: ContractStatus,
    ) -> Result<(), ContractError> {
        let mut inner = self.inner.write().await;
        let status = inner
            .status_mut(contract_id)
            .ok_or_else(|| ContractError::Unknown(contract_id.to_string()))?;
        if *status == next {
            return Ok(());
        }
        if !status.can_transition_to(next) {
            return Err(ContractError::InvalidTransition {
                id: contract_id.to_string(),
                from: status.to_string(),
                to: next.to_string(),
            });
        }
        info!("Contract {} moved {} -> {}", contract_id, status, next);
        *status = next;
        Ok(())
    }

    pub async fn get_publication(&self, contract_id: &str) -> Option<Arc<PublicationContract>> {
        self.inner.read().await.publication.get(contract_id).map(|e| e.contract.clone())
    }

    pub async fn get_consumption(&self, contract_id: &str) -> Option<Arc<ConsumptionContract>> {
        self.inner.read().await.consumption.get(contract_id).map(|e| e.contract.clone())
    }

    pub async fn get_irrigation(&self, contract_id: &str) -> Option<Arc<IrrigationContract>> {
        self.inner.read().await.irrigation.get(contract_id).map(|e| e.contract.clone())
    }

    /// Every contract naming `vehicle_id` as publisher, consumer or irrigation participant.
    pub async fn get_contracts_for_vehicle(&self, vehicle_id: &str) -> VehicleContracts {
        let inner = self.inner.read().await;
        let mut found = VehicleContracts {
            publication: inner
                .publication
                .values()
                .filter(|e| e.contract.publisher_vehicle() == vehicle_id)
                .map(|e| e.contract.clone())
                .collect(),
            consumption: inner
                .consumption
                .values()
                .filter(|e| e.contract.consumer_id() == vehicle_id)
                .map(|e| e.contract.clone())
                .collect(),
            irrigation: inner
                .irrigation
                .values()
                .filter(|e| {
                    e.contract.target_consumer() == vehicle_id
                        || e.contract.required_vehicles().contains(vehicle_id)
                })
                .map(|e| e.contract.clone())
                .collect(),
        };
        found.publication.sort_by(|a, b| a.contract_id().cmp(b.contract_id()));
        found.consumption.sort_by(|a, b| a.contract_id().cmp(b.contract_id()));
        found.irrigation.sort_by(|a, b| a.contract_id().cmp(b.contract_id()));
        found
    }

    /// The active publication contract for a vehicle; lowest id wins if several exist.
    pub async fn active_publication_for(
        &self,
        vehicle_id: &str,
    ) -> Option<Arc<PublicationContract>> {
        let inner = self.inner.read().await;
        inner
            .publication
            .values()
            .filter(|e| {
                e.status == ContractStatus::Active && e.contract.publisher_vehicle() == vehicle_id
            })
            .map(|e| e.contract.clone())
            .min_by(|a, b| a.contract_id().cmp(b.contract_id()))
    }

    pub async fn get_irrigable_contracts(&self) -> Vec<Arc<IrrigationContract>> {
        let inner = self.inner.read().await;
        let mut out: Vec<_> = inner
            .active_irrigation()
            .filter(|c| c.is_irrigable())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.contract_id().cmp(b.contract_id()));
        out
    }

    pub async fn get_blocked_contracts(&self) -> Vec<Arc<IrrigationContract>> {
        let inner = self.inner.read().await;
        let mut out: Vec<_> = inner
            .active_irrigation()
            .filter(|c| !c.is_irrigable())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.contract_id().cmp(b.contract_id()));
        out
    }

    /// Replace an irrigation contract with `update(current)` atomically.
    pub async fn update_irrigation<F>(
        &self,
        contract_id: &str,
        update: F,
    ) -> Result<Arc<IrrigationContract>, ContractError>
    where
        F: FnOnce(&IrrigationContract) -> IrrigationContract,
    {
        let mut inner = self.inner.write().await;
        let entry = inner
            .irrigation
            .get_mut(contract_id)
            .ok_or_else(|| ContractError::Unknown(contract_id.to_string()))?;
        let was_irrigable = entry.contract.is_irrigable();
        let next = update(&entry.contract);
        if next.contract_id() != contract_id {
            return Err(ContractError::Violation(vec![format!(
                "update changed contract id '{}' to '{}'",
                contract_id,
                next.contract_id()
            )]));
        }
        if !was_irrigable && next.is_irrigable() {
            info!("Irrigation contract {} is now irrigable", contract_id);
        }
        entry.contract = Arc::new(next);
        Ok(entry.contract.clone())
    }

    /// Reasons delivery of `signal` to `consumer_id` is held back, if any.
    ///
    /// Only active irrigation contracts targeting the consumer and governing
    /// the signal's type are considered.
    pub async fn irrigation_blocks(
        &self,
        consumer_id: &str,
        signal: &Signal,
    ) -> Option<Vec<String>> {
        let inner = self.inner.read().await;
        let mut reasons: Vec<String> = Vec::new();
        for contract in inner.active_irrigation() {
            if contract.target_consumer() == consumer_id && contract.governs(signal) {
                reasons.extend(
                    contract
                        .get_blocking_gaps()
                        .into_iter()
                        .map(|g| format!("{}: {}", contract.contract_id(), g)),
                );
            }
        }
        if reasons.is_empty() {
            None
        } else {
            reasons.sort();
            Some(reasons)
        }
    }

    pub async fn summary(&self) -> ContractSummary {
        let inner = self.inner.read().await;
        let mut summary = ContractSummary {
            publication: inner.publication.len(),
            consumption: inner.consumption.len(),
            irrigation: inner.irrigation.len(),
            ..Default::default()
        };
        let statuses = inner
            .publication
            .values()
            .map(|e| e.status)
            .chain(inner.consumption.values().map(|e| e.status))
            .chain(inner.irrigation.values().map(|e| e.status));
        for status in statuses {
            match status {
                ContractStatus::Draft => summary.draft += 1,
                ContractStatus::Active => summary.active += 1,
                ContractStatus::Suspended => summary.suspended += 1,
                ContractStatus::Terminated => summary.terminated += 1,
            }
        }
        for contract in inner.active_irrigation() {
            if contract.is_irrigable() {
                summary.irrigable += 1;
            } else {
                summary.blocked += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusCategory;
    use crate::signals::{
        OperationalKind, SignalBody, SignalConfidence, SignalContext, SignalSource,
    };
    use serde_json::json;

    fn dispatch_signal() -> Signal {
        Signal::new(
            SignalBody::operational(OperationalKind::IrrigationDispatch, json!({})),
            Some(SignalContext::new("document", "doc-1", "irrigation")),
            Some(SignalSource::new("evt-1", "signal_irrigator")),
            SignalConfidence::High,
            "dispatch",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected_across_kinds() {
        let registry = ContractRegistry::new();
        registry
            .register_publication(PublicationContract::new("c-1", "loader"))
            .await
            .unwrap();
        let err = registry
            .register_consumption(ConsumptionContract::new("c-1", "auditor"))
            .await
            .unwrap_err();
        assert_eq!(err, ContractError::Duplicate("c-1".to_string()));
    }

    #[tokio::test]
    async fn test_status_transitions_are_checked() {
        let registry = ContractRegistry::new();
        registry
            .register_publication(PublicationContract::new("pub-1", "loader"))
            .await
            .unwrap();
        assert!(registry.active_publication_for("loader").await.is_some());

        registry.set_status("pub-1", ContractStatus::Suspended).await.unwrap();
        assert!(registry.active_publication_for("loader").await.is_none());

        registry.set_status("pub-1", ContractStatus::Terminated).await.unwrap();
        assert!(matches!(
            registry.set_status("pub-1", ContractStatus::Active).await,
            Err(ContractError::InvalidTransition { .. })
        ));
        assert!(matches!(
            registry.set_status("nope", ContractStatus::Active).await,
            Err(ContractError::Unknown(_))
        ));
    }

    #[tokio::test]
    async fn test_contracts_for_vehicle() {
        let registry = ContractRegistry::new();
        registry
            .register_publication(
                PublicationContract::new("pub-q", "quality_metrics")
                    .with_buses([BusCategory::Consumption]),
            )
            .await
            .unwrap();
        registry
            .register_consumption(ConsumptionContract::new("con-q", "quality_metrics"))
            .await
            .unwrap();
        registry
            .register_irrigation(
                IrrigationContract::new("irr-1", "src", "irrigator")
                    .with_required_vehicles(["quality_metrics"]),
            )
            .await
            .unwrap();

        let found = registry.get_contracts_for_vehicle("quality_metrics").await;
        assert_eq!(found.publication.len(), 1);
        assert_eq!(found.consumption.len(), 1);
        assert_eq!(found.irrigation.len(), 1);
        assert!(registry.get_contracts_for_vehicle("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn test_irrigation_gate_opens_after_update() {
        let registry = ContractRegistry::new();
        registry
            .register_irrigation(
                IrrigationContract::new("irr-1", "plans", "irrigator").with_gap("glossary"),
            )
            .await
            .unwrap();
        let signal = dispatch_signal();

        assert_eq!(registry.get_blocked_contracts().await.len(), 1);
        let reasons = registry.irrigation_blocks("irrigator", &signal).await.unwrap();
        assert_eq!(reasons.len(), 2);
        assert!(registry.irrigation_blocks("someone_else", &signal).await.is_none());

        registry
            .update_irrigation("irr-1", |c| {
                c.with_upstream_complete().with_gap_resolved("glossary")
            })
            .await
            .unwrap();
        assert!(registry.irrigation_blocks("irrigator", &signal).await.is_none());
        assert_eq!(registry.get_irrigable_contracts().await.len(), 1);

        let summary = registry.summary().await;
        assert_eq!(summary.irrigation, 1);
        assert_eq!(summary.irrigable, 1);
        assert_eq!(summary.active, 1);
    }
}
