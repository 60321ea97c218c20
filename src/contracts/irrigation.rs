use serde::Serialize;
use std::collections::BTreeSet;

use crate::signals::Signal;

/// Readiness of one source path to feed a consumer.
///
/// A path is irrigable when every required vehicle is available, the
/// vocabularies are aligned, upstream work is complete and no gap is open.
/// Progress produces a new value; the registry swaps it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrrigationContract {
    contract_id: String,
    source_path: String,
    target_consumer: String,
    required_vehicles: BTreeSet<String>,
    available_vehicles: BTreeSet<String>,
    vocabulary_aligned: bool,
    upstream_complete: bool,
    gaps: BTreeSet<String>,
    signal_types: BTreeSet<String>,
}

impl IrrigationContract {
    pub fn new(
        contract_id: impl Into<String>,
        source_path: impl Into<String>,
        target_consumer: impl Into<String>,
    ) -> Self {
        Self {
            contract_id: contract_id.into(),
            source_path: source_path.into(),
            target_consumer: target_consumer.into(),
            required_vehicles: BTreeSet::new(),
            available_vehicles: BTreeSet::new(),
            vocabulary_aligned: true,
            upstream_complete: false,
            gaps: BTreeSet::new(),
            signal_types: BTreeSet::new(),
        }
    }

    pub fn with_required_vehicles<I, S>(mut self, vehicles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_vehicles.extend(vehicles.into_iter().map(Into::into));
        self
    }

    pub fn with_vehicle_available(&self, vehicle_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.available_vehicles.insert(vehicle_id.into());
        next
    }

    pub fn with_vocabulary_aligned(&self, aligned: bool) -> Self {
        let mut next = self.clone();
        next.vocabulary_aligned = aligned;
        next
    }

    pub fn with_upstream_complete(&self) -> Self {
        let mut next = self.clone();
        next.upstream_complete = true;
        next
    }

    pub fn with_gap(&self, gap: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.gaps.insert(gap.into());
        next
    }

    pub fn with_gap_resolved(&self, gap: &str) -> Self {
        let mut next = self.clone();
        next.gaps.remove(gap);
        next
    }

    /// Restrict the contract to these signal types. Empty governs every type.
    pub fn with_signal_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signal_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn target_consumer(&self) -> &str {
        &self.target_consumer
    }

    pub fn required_vehicles(&self) -> &BTreeSet<String> {
        &self.required_vehicles
    }

    pub fn governs(&self, signal: &Signal) -> bool {
        self.signal_types.is_empty() || self.signal_types.contains(signal.signal_type())
    }

    pub fn is_irrigable(&self) -> bool {
        self.get_blocking_gaps().is_empty()
    }

    /// Every reason the path is not irrigable yet, in a stable order.
    pub fn get_blocking_gaps(&self) -> Vec<String> {
        let mut blocking: Vec<String> = self
            .required_vehicles
            .difference(&self.available_vehicles)
            .map(|v| format!("vehicle unavailable: {v}"))
            .collect();
        if !self.vocabulary_aligned {
            blocking.push("vocabulary not aligned".to_string());
        }
        if !self.upstream_complete {
            blocking.push("upstream incomplete".to_string());
        }
        blocking.extend(self.gaps.iter().map(|g| format!("open gap: {g}")));
        blocking
    }
}
