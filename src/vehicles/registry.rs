use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{Vehicle, VehicleStats};
use crate::error::VehicleError;

/// Vehicles by id. Ids are unique.
#[derive(Default)]
pub struct VehicleRegistry {
    vehicles: RwLock<BTreeMap<String, Arc<dyn Vehicle>>>,
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, vehicle: Arc<dyn Vehicle>) -> Result<(), VehicleError> {
        let mut vehicles = self.vehicles.write().await;
        let id = vehicle.vehicle_id().to_string();
        if vehicles.contains_key(&id) {
            return Err(VehicleError::DuplicateVehicle(id));
        }
        info!("Registered vehicle {}", id);
        vehicles.insert(id, vehicle);
        Ok(())
    }

    pub async fn get(&self, vehicle_id: &str) -> Option<Arc<dyn Vehicle>> {
        self.vehicles.read().await.get(vehicle_id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.vehicles.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.vehicles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn deactivate_all(&self) {
        let vehicles: Vec<Arc<dyn Vehicle>> =
            self.vehicles.read().await.values().cloned().collect();
        for vehicle in vehicles {
            vehicle.core().deactivate().await;
        }
    }

    pub async fn stats(&self) -> Vec<VehicleStats> {
        let vehicles: Vec<Arc<dyn Vehicle>> =
            self.vehicles.read().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(vehicles.len());
        for vehicle in vehicles {
            stats.push(vehicle.core().get_stats().await);
        }
        stats
    }
}
