//! Substrate
//!
//! One run's worth of shared state: the event log, contract registry, bus
//! registry, audit log and vehicle registry. Built once, passed by handle,
//! torn down with `shutdown`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::bus::{BusRegistry, RegistryStats};
use crate::config::SubstrateConfig;
use crate::contracts::{ContractRegistry, ContractSummary};
use crate::error::{SisasError, VehicleError};
use crate::events::{EventLog, EventLogCounts};
use crate::signals::AuditLog;
use crate::vehicles::{Vehicle, VehicleRegistry, VehicleStats};

/// Cheap, cloneable access to the shared components. Every vehicle holds one.
#[derive(Clone)]
pub struct SubstrateHandles {
    pub event_log: Arc<EventLog>,
    pub buses: Arc<BusRegistry>,
    pub contracts: Arc<ContractRegistry>,
    pub audit: Arc<AuditLog>,
}

impl SubstrateHandles {
    /// Default configuration, nothing on disk.
    pub fn in_memory() -> Self {
        Self::with_config(&SubstrateConfig::default(), Arc::new(EventLog::in_memory()))
    }

    fn with_config(config: &SubstrateConfig, event_log: Arc<EventLog>) -> Self {
        let contracts = Arc::new(ContractRegistry::new());
        let audit = Arc::new(AuditLog::new());
        let buses = Arc::new(BusRegistry::from_config(
            config,
            Arc::clone(&contracts),
            Arc::clone(&audit),
        ));
        Self {
            event_log,
            buses,
            contracts,
            audit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub dispatching: bool,
    pub events: EventLogCounts,
    pub contracts: ContractSummary,
    pub buses: RegistryStats,
    pub vehicles: Vec<VehicleStats>,
    pub audit_entries: usize,
}

pub struct Substrate {
    config: SubstrateConfig,
    handles: SubstrateHandles,
    vehicles: VehicleRegistry,
}

impl Substrate {
    /// Opens the event log (replaying its journal, if configured) and builds
    /// one bus per category.
    pub async fn new(config: SubstrateConfig) -> Result<Self, SisasError> {
        config.validate()?;
        let event_log = Arc::new(EventLog::open(&config.event_log).await?);
        let handles = SubstrateHandles::with_config(&config, event_log);
        info!("Substrate ready ({} events replayed)", handles.event_log.count().await);
        Ok(Self {
            config,
            handles,
            vehicles: VehicleRegistry::new(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            config: SubstrateConfig::default(),
            handles: SubstrateHandles::in_memory(),
            vehicles: VehicleRegistry::new(),
        }
    }

    pub fn config(&self) -> &SubstrateConfig {
        &self.config
    }

    pub fn handles(&self) -> &SubstrateHandles {
        &self.handles
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.handles.event_log
    }

    pub fn buses(&self) -> &Arc<BusRegistry> {
        &self.handles.buses
    }

    pub fn contracts(&self) -> &Arc<ContractRegistry> {
        &self.handles.contracts
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.handles.audit
    }

    pub fn vehicles(&self) -> &VehicleRegistry {
        &self.vehicles
    }

    /// Register a vehicle, its publication contract and its subscriptions, then activate it.
    pub async fn register_vehicle(&self, vehicle: Arc<dyn Vehicle>) -> Result<(), VehicleError> {
        self.vehicles.register(Arc::clone(&vehicle)).await?;

        if let Some(contract) = vehicle.publication_contract() {
            self.handles.contracts.register_publication(contract).await?;
        }
        if let Some(contract) = vehicle.consumption_contract() {
            let buses = vehicle.core().subscribe(contract).await?;
            info!("{} subscribed to {} bus(es)", vehicle.vehicle_id(), buses.len());
        }
        vehicle.core().activate().await;
        Ok(())
    }

    /// Spawn a dispatcher on every bus.
    pub async fn start(&self) {
        self.handles.buses.start_all().await;
    }

    /// Deliver everything queued on every bus without background dispatchers.
    pub async fn dispatch(&self) -> usize {
        self.handles.buses.dispatch_all().await
    }

    pub async fn shutdown(&self) {
        self.handles.buses.shutdown_all().await;
        self.vehicles.deactivate_all().await;
        info!("Substrate shut down");
    }

    pub async fn health(&self) -> HealthReport {
        let mut dispatching = false;
        for bus in self.handles.buses.buses() {
            dispatching |= bus.is_running().await;
        }
        HealthReport {
            generated_at: Utc::now(),
            dispatching,
            events: self.handles.event_log.counts().await,
            contracts: self.handles.contracts.summary().await,
            buses: self.handles.buses.get_stats().await,
            vehicles: self.vehicles.stats().await,
            audit_entries: self.handles.audit.len().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicles::{DocumentLoader, QualityMetrics};
    use serde_json::json;

    #[tokio::test]
    async fn test_register_vehicle_wires_contracts() {
        let substrate = Substrate::in_memory();
        substrate
            .register_vehicle(Arc::new(QualityMetrics::new(substrate.handles().clone())))
            .await
            .unwrap();

        let contracts = substrate.contracts().get_contracts_for_vehicle(QualityMetrics::ID).await;
        assert_eq!(contracts.publication.len(), 1);
        assert_eq!(contracts.consumption.len(), 1);

        let err = substrate
            .register_vehicle(Arc::new(QualityMetrics::new(substrate.handles().clone())))
            .await
            .unwrap_err();
        assert!(matches!(err, VehicleError::DuplicateVehicle(_)));
    }

    #[tokio::test]
    async fn test_health_report_serializes() {
        let substrate = Substrate::in_memory();
        substrate
            .register_vehicle(Arc::new(DocumentLoader::new(substrate.handles().clone())))
            .await
            .unwrap();
        let report = substrate.health().await;
        assert!(!report.dispatching);
        assert_eq!(report.vehicles.len(), 1);
        assert!(report.vehicles[0].active);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["events"]["total"], json!(0));
    }
}
