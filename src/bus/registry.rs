use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::signal_bus::SignalBus;
use super::stats::BusStatsSnapshot;
use super::{BusCategory, MessagePriority};
use crate::config::{BusConfig, SubstrateConfig};
use crate::contracts::{ConsumptionContract, ContractRegistry, PublicationContract};
use crate::error::PublishRejection;
use crate::signals::{AuditLog, Signal};

/// Statistics for every bus plus their sum.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub buses: BTreeMap<BusCategory, BusStatsSnapshot>,
    pub total: BusStatsSnapshot,
}

/// One bus per hosted signal category plus the universal bus.
///
/// Categories without a dedicated bus are carried by the universal bus, so
/// their publishers and consumers must list `universal` in their contracts.
pub struct BusRegistry {
    dedicated: Vec<Arc<SignalBus>>,
    universal: Arc<SignalBus>,
}

impl BusRegistry {
    /// Every bus with the same configuration and no delivery gate.
    pub fn new(config: BusConfig) -> Self {
        Self::with_categories(config, BusCategory::ALL)
    }

    /// Dedicated buses for `categories` only; the rest route to universal.
    pub fn with_categories(
        config: BusConfig,
        categories: impl IntoIterator<Item = BusCategory>,
    ) -> Self {
        Self::build(categories, |category| SignalBus::new(category, config.clone()))
    }

    /// Per-category configuration from `config`, gated by `contracts` and
    /// recording acknowledgements in `audit`.
    pub fn from_config(
        config: &SubstrateConfig,
        contracts: Arc<ContractRegistry>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let categories = config
            .dedicated_buses
            .clone()
            .unwrap_or_else(|| BusCategory::ALL.to_vec());
        Self::build(categories, |category| {
            SignalBus::new(category, config.bus_config(category).clone())
                .with_gate(Arc::clone(&contracts))
                .with_audit_log(Arc::clone(&audit))
        })
    }

    fn build(
        categories: impl IntoIterator<Item = BusCategory>,
        make: impl Fn(BusCategory) -> SignalBus,
    ) -> Self {
        let wanted: BTreeSet<BusCategory> = categories.into_iter().collect();
        let dedicated = BusCategory::ALL
            .into_iter()
            .filter(|c| *c != BusCategory::Universal && wanted.contains(c))
            .map(|c| Arc::new(make(c)))
            .collect::<Vec<_>>();
        let skipped: Vec<&str> = BusCategory::ALL
            .iter()
            .filter(|c| **c != BusCategory::Universal && !wanted.contains(c))
            .map(|c| c.as_str())
            .collect();
        if !skipped.is_empty() {
            info!("Categories routed to the universal bus: {}", skipped.join(", "));
        }
        Self {
            dedicated,
            universal: Arc::new(make(BusCategory::Universal)),
        }
    }

    /// The bus carrying `category`: its dedicated bus, else universal.
    pub fn get_bus(&self, category: BusCategory) -> &Arc<SignalBus> {
        self.dedicated_bus(category).unwrap_or(&self.universal)
    }

    /// True when `category` has its own bus.
    pub fn hosts(&self, category: BusCategory) -> bool {
        category == BusCategory::Universal || self.dedicated_bus(category).is_some()
    }

    fn dedicated_bus(&self, category: BusCategory) -> Option<&Arc<SignalBus>> {
        self.dedicated.iter().find(|bus| bus.category() == category)
    }

    pub fn buses(&self) -> impl Iterator<Item = &Arc<SignalBus>> {
        self.dedicated.iter().chain(std::iter::once(&self.universal))
    }

    /// The bus for the signal's category, falling back to universal.
    pub fn get_bus_for_signal(&self, signal: &Signal) -> &Arc<SignalBus> {
        self.get_bus(BusCategory::from(signal.category()))
    }

    pub async fn publish_to_appropriate_bus(
        &self,
        signal: Arc<Signal>,
        publisher_vehicle: &str,
        contract: &PublicationContract,
    ) -> Result<String, PublishRejection> {
        self.publish_to_appropriate_bus_with_priority(
            signal,
            publisher_vehicle,
            contract,
            MessagePriority::Normal,
        )
        .await
    }

    pub async fn publish_to_appropriate_bus_with_priority(
        &self,
        signal: Arc<Signal>,
        publisher_vehicle: &str,
        contract: &PublicationContract,
        priority: MessagePriority,
    ) -> Result<String, PublishRejection> {
        let bus = Arc::clone(self.get_bus_for_signal(&signal));
        bus.publish_with_priority(signal, publisher_vehicle, contract, priority).await
    }

    /// Subscribe to every bus the contract lists. Returns the buses newly joined.
    pub async fn subscribe(&self, contract: Arc<ConsumptionContract>) -> Vec<BusCategory> {
        let mut joined = Vec::new();
        for category in contract.subscribed_buses().iter().copied() {
            let Some(bus) = self.hosts(category).then(|| self.get_bus(category)) else {
                debug!(
                    "{} listed {} which has no dedicated bus",
                    contract.consumer_id(),
                    category
                );
                continue;
            };
            if bus.subscribe(Arc::clone(&contract)).await {
                joined.push(category);
            }
        }
        joined
    }

    /// Remove the consumer everywhere. Returns how many buses it left.
    pub async fn unsubscribe(&self, consumer_id: &str) -> usize {
        let mut left = 0;
        for bus in self.buses() {
            if bus.unsubscribe(consumer_id).await {
                left += 1;
            }
        }
        left
    }

    /// Drain every bus on the calling task until all queues are empty.
    ///
    /// Handlers may publish onto other buses while being called, so buses are
    /// swept repeatedly.
    pub async fn dispatch_all(&self) -> usize {
        let mut total = 0;
        loop {
            let mut swept = 0;
            for bus in self.buses() {
                swept += bus.dispatch_pending().await;
            }
            if swept == 0 {
                return total;
            }
            total += swept;
        }
    }

    pub async fn start_all(&self) {
        for bus in self.buses() {
            bus.start().await;
        }
        info!("All signal bus dispatchers started");
    }

    /// Stop every dispatcher. Buses drain their in-flight deliveries concurrently.
    pub async fn shutdown_all(&self) {
        let stopped = join_all(self.buses().map(|bus| bus.shutdown())).await;
        info!(
            "Signal bus dispatchers stopped ({} were running)",
            stopped.into_iter().filter(|s| *s).count()
        );
    }

    pub async fn get_stats(&self) -> RegistryStats {
        let mut buses = BTreeMap::new();
        let mut total = BusStatsSnapshot::default();
        for bus in self.buses() {
            let stats = bus.get_stats().await;
            total = total.merge(stats);
            buses.insert(bus.category(), stats);
        }
        RegistryStats { buses, total }
    }
}
