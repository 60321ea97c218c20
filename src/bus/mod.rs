//! Signal Buses
//!
//! One bounded, prioritised bus per signal category plus a universal bus.
//! Publishers go through their publication contract; consumers receive
//! through their consumption contract's handler.

mod circuit;
mod dead_letter;
mod history;
mod message;
mod registry;
mod signal_bus;
mod stats;

pub use circuit::{CircuitBreaker, CircuitState};
pub use dead_letter::DeadLetter;
pub use history::MessageRecord;
pub use message::{BusMessage, MessagePriority, MessageStatus};
pub use registry::{BusRegistry, RegistryStats};
pub use signal_bus::SignalBus;
pub use stats::BusStatsSnapshot;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::signals::SignalCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusCategory {
    Structural,
    Integrity,
    Epistemic,
    Contrast,
    Operational,
    Consumption,
    Universal,
}

impl BusCategory {
    pub const ALL: [BusCategory; 7] = [
        BusCategory::Structural,
        BusCategory::Integrity,
        BusCategory::Epistemic,
        BusCategory::Contrast,
        BusCategory::Operational,
        BusCategory::Consumption,
        BusCategory::Universal,
    ];

    /// Position in [`BusCategory::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BusCategory::Structural => "structural",
            BusCategory::Integrity => "integrity",
            BusCategory::Epistemic => "epistemic",
            BusCategory::Contrast => "contrast",
            BusCategory::Operational => "operational",
            BusCategory::Consumption => "consumption",
            BusCategory::Universal => "universal",
        }
    }
}

impl fmt::Display for BusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BusCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown bus '{s}'"))
    }
}

impl From<SignalCategory> for BusCategory {
    fn from(category: SignalCategory) -> Self {
        match category {
            SignalCategory::Structural => BusCategory::Structural,
            SignalCategory::Integrity => BusCategory::Integrity,
            SignalCategory::Epistemic => BusCategory::Epistemic,
            SignalCategory::Contrast => BusCategory::Contrast,
            SignalCategory::Operational => BusCategory::Operational,
            SignalCategory::Consumption => BusCategory::Consumption,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_all_order() {
        for (i, c) in BusCategory::ALL.into_iter().enumerate() {
            assert_eq!(c.index(), i);
        }
    }

    #[test]
    fn test_parse_and_route() {
        assert_eq!("Epistemic".parse::<BusCategory>().unwrap(), BusCategory::Epistemic);
        assert!("bogus".parse::<BusCategory>().is_err());
        assert_eq!(BusCategory::from(SignalCategory::Structural), BusCategory::Structural);
    }
}
