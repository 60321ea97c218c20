//! Error taxonomy for the substrate.
//!
//! Resource-local failures (queue full, contract mismatch) travel as values.
//! Nothing in here is meant to cross the publish/subscribe boundary as a panic.

use thiserror::Error;

use crate::bus::BusCategory;

/// A signal could not be built because a mandatory field was absent or empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("signal context is required")]
    MissingContext,
    #[error("signal source is required")]
    MissingSource,
    #[error("invalid signal context: {0}")]
    InvalidContext(String),
    #[error("invalid signal source: {0}")]
    InvalidSource(String),
    #[error("signal payload must be a JSON object or null")]
    InvalidPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("contract '{0}' is already registered")]
    Duplicate(String),
    #[error("unknown contract '{0}'")]
    Unknown(String),
    #[error("contract '{id}' cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },
    #[error("contract violation: {}", .0.join("; "))]
    Violation(Vec<String>),
}

/// Why a bus refused a signal. Returned to the publisher, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishRejection {
    #[error("publication contract violated: {}", .errors.join("; "))]
    ContractViolation { errors: Vec<String> },
    #[error("queue full on {bus} bus (capacity {capacity})")]
    QueueFull { bus: BusCategory, capacity: usize },
    #[error("back-pressure active on {bus} bus (depth {depth}, drains below {low_water})")]
    Backpressure { bus: BusCategory, depth: usize, low_water: usize },
    #[error("duplicate signal content {content_hash} on {bus} bus")]
    Duplicate { bus: BusCategory, content_hash: String },
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("event '{0}' is archived and read-only")]
    Archived(String),
    #[error("event log I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("event log serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failure reported by a consumer callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("vehicle '{0}' is not active")]
    Inactive(String),
    #[error("vehicle '{vehicle}' lacks capability '{capability}'")]
    MissingCapability { vehicle: String, capability: String },
    #[error("vehicle '{vehicle}' did not declare signal type '{signal_type}'")]
    UndeclaredSignalType { vehicle: String, signal_type: String },
    #[error("vehicle '{0}' has no active publication contract")]
    NoPublicationContract(String),
    #[error("vehicle id '{0}' is already registered")]
    DuplicateVehicle(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Rejected(#[from] PublishRejection),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Crate-level error used by the substrate lifecycle.
#[derive(Debug, Error)]
pub enum SisasError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Publish(#[from] PublishRejection),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error(transparent)]
    Vehicle(#[from] VehicleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = SisasError> = std::result::Result<T, E>;
