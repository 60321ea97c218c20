//! Contracts
//!
//! Declarative agreements between vehicles and buses:
//! - `PublicationContract`: what a vehicle may publish, and where.
//! - `ConsumptionContract`: what a consumer wants and how it is called back.
//! - `IrrigationContract`: whether a source path may feed a consumer yet.
//!
//! Contract values never change once registered. Lifecycle status lives in
//! the `ContractRegistry` next to the value.

mod consumption;
mod irrigation;
mod publication;
mod registry;

pub use consumption::{ConsumptionContract, FnHandler, SignalHandler, SignalPredicate};
pub use irrigation::IrrigationContract;
pub use publication::{PublicationContract, SignalValidator};
pub use registry::{Contract, ContractRegistry, ContractSummary, VehicleContracts};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    Active,
    Suspended,
    Terminated,
}

impl ContractStatus {
    /// One-way lifecycle, except that Active and Suspended may alternate.
    pub fn can_transition_to(self, next: ContractStatus) -> bool {
        use ContractStatus::*;
        matches!(
            (self, next),
            (Draft, Active)
                | (Draft, Terminated)
                | (Active, Suspended)
                | (Active, Terminated)
                | (Suspended, Active)
                | (Suspended, Terminated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Draft => "draft",
            ContractStatus::Active => "active",
            ContractStatus::Suspended => "suspended",
            ContractStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
