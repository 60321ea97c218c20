use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters owned by one bus.
#[derive(Debug, Default)]
pub(crate) struct BusStats {
    pub published: AtomicU64,
    pub delivered: AtomicU64,
    pub rejected: AtomicU64,
    pub errors: AtomicU64,
    pub retries: AtomicU64,
    pub expired: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub backpressure_activations: AtomicU64,
    pub circuit_skips: AtomicU64,
    pub irrigation_blocked: AtomicU64,
    pub duplicates: AtomicU64,
}

impl BusStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        queue_size: usize,
        subscriber_count: usize,
        backpressure_active: bool,
    ) -> BusStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        BusStatsSnapshot {
            published: load(&self.published),
            delivered: load(&self.delivered),
            rejected: load(&self.rejected),
            errors: load(&self.errors),
            retries: load(&self.retries),
            expired: load(&self.expired),
            dead_lettered: load(&self.dead_lettered),
            backpressure_activations: load(&self.backpressure_activations),
            circuit_skips: load(&self.circuit_skips),
            irrigation_blocked: load(&self.irrigation_blocked),
            duplicates: load(&self.duplicates),
            queue_size,
            subscriber_count,
            backpressure_active,
        }
    }
}

/// Point-in-time statistics for one bus.
///
/// `delivered` counts consumer acknowledgements, so one message delivered to
/// three consumers adds three. `rejected` counts every refused publish,
/// duplicates included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub errors: u64,
    pub retries: u64,
    pub expired: u64,
    pub dead_lettered: u64,
    pub backpressure_activations: u64,
    pub circuit_skips: u64,
    pub irrigation_blocked: u64,
    pub duplicates: u64,
    pub queue_size: usize,
    pub subscriber_count: usize,
    pub backpressure_active: bool,
}

impl BusStatsSnapshot {
    /// Field-wise sum. `backpressure_active` is true if either side is.
    pub fn merge(self, other: BusStatsSnapshot) -> BusStatsSnapshot {
        BusStatsSnapshot {
            published: self.published + other.published,
            delivered: self.delivered + other.delivered,
            rejected: self.rejected + other.rejected,
            errors: self.errors + other.errors,
            retries: self.retries + other.retries,
            expired: self.expired + other.expired,
            dead_lettered: self.dead_lettered + other.dead_lettered,
            backpressure_activations: self.backpressure_activations
                + other.backpressure_activations,
            circuit_skips: self.circuit_skips + other.circuit_skips,
            irrigation_blocked: self.irrigation_blocked + other.irrigation_blocked,
            duplicates: self.duplicates + other.duplicates,
            queue_size: self.queue_size + other.queue_size,
            subscriber_count: self.subscriber_count + other.subscriber_count,
            backpressure_active: self.backpressure_active || other.backpressure_active,
        }
    }
}
