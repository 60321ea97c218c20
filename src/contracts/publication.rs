use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::bus::BusCategory;
use crate::signals::{Signal, SignalConfidence};

/// Custom check run after the built-in rules. `Err` carries the reason.
pub type SignalValidator = Arc<dyn Fn(&Signal) -> Result<(), String> + Send + Sync>;

/// What one vehicle is allowed to publish, and on which buses.
#[derive(Clone)]
pub struct PublicationContract {
    contract_id: String,
    publisher_vehicle: String,
    allowed_signal_types: BTreeSet<String>,
    allowed_buses: BTreeSet<BusCategory>,
    require_context: bool,
    require_source: bool,
    min_confidence: Option<SignalConfidence>,
    validators: Vec<(String, SignalValidator)>,
}

impl PublicationContract {
    /// Empty contract: nothing allowed until types and buses are added.
    pub fn new(contract_id: impl Into<String>, publisher_vehicle: impl Into<String>) -> Self {
        Self {
            contract_id: contract_id.into(),
            publisher_vehicle: publisher_vehicle.into(),
            allowed_signal_types: BTreeSet::new(),
            allowed_buses: BTreeSet::new(),
            require_context: true,
            require_source: true,
            min_confidence: None,
            validators: Vec::new(),
        }
    }

    pub fn with_signal_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_signal_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn with_buses(mut self, buses: impl IntoIterator<Item = BusCategory>) -> Self {
        self.allowed_buses.extend(buses);
        self
    }

    pub fn with_required_context(mut self, required: bool) -> Self {
        self.require_context = required;
        self
    }

    pub fn with_required_source(mut self, required: bool) -> Self {
        self.require_source = required;
        self
    }

    pub fn with_min_confidence(mut self, confidence: SignalConfidence) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    pub fn with_validator<F>(mut self, name: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Signal) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push((name.into(), Arc::new(validator)));
        self
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    pub fn publisher_vehicle(&self) -> &str {
        &self.publisher_vehicle
    }

    pub fn allowed_signal_types(&self) -> &BTreeSet<String> {
        &self.allowed_signal_types
    }

    pub fn allowed_buses(&self) -> &BTreeSet<BusCategory> {
        &self.allowed_buses
    }

    pub fn allows_signal_type(&self, signal_type: &str) -> bool {
        self.allowed_signal_types.contains(signal_type)
    }

    pub fn allows_bus(&self, bus: BusCategory) -> bool {
        self.allowed_buses.contains(&bus)
    }

    /// Check `signal` for publication on `bus`. Every failed rule is reported.
    pub fn validate_signal(&self, signal: &Signal, bus: BusCategory) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.allows_signal_type(signal.signal_type()) {
            errors.push(format!(
                "signal type '{}' not allowed by contract '{}'",
                signal.signal_type(),
                self.contract_id
            ));
        }
        if !self.allows_bus(bus) {
            errors.push(format!("bus '{}' not allowed by contract '{}'", bus, self.contract_id));
        }
        if self.require_context {
            errors.extend(signal.context().problems().into_iter().map(|p| format!("context: {p}")));
        }
        if self.require_source {
            errors.extend(signal.source().problems().into_iter().map(|p| format!("source: {p}")));
        }
        if let Some(min) = self.min_confidence {
            if signal.confidence() < min {
                errors.push(format!(
                    "confidence {} below required {}",
                    signal.confidence(),
                    min
                ));
            }
        }
        for (name, validator) in &self.validators {
            if let Err(reason) = validator(signal) {
                errors.push(format!("validator '{name}': {reason}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl fmt::Debug for PublicationContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicationContract")
            .field("contract_id", &self.contract_id)
            .field("publisher_vehicle", &self.publisher_vehicle)
            .field("allowed_signal_types", &self.allowed_signal_types)
            .field("allowed_buses", &self.allowed_buses)
            .field("require_context", &self.require_context)
            .field("require_source", &self.require_source)
            .field("min_confidence", &self.min_confidence)
            .field(
                "validators",
                &self.validators.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
