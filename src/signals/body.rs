//! Closed set of signal bodies, one variant per category.
//!
//! Each category carries its own `kind` enum, so adding a signal type means
//! touching an exhaustive match rather than subclassing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::SignalCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructuralKind {
    StructuralAlignment,
    SchemaConflict,
    CanonicalMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntegrityKind {
    EventPresence,
    EventCompleteness,
    DataIntegrity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpistemicKind {
    AnswerDeterminacy,
    AnswerSpecificity,
    EmpiricalSupport,
    MethodApplication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContrastKind {
    DecisionDivergence,
    ConfidenceDrop,
    TemporalContrast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationalKind {
    ExecutionAttempt,
    FailureMode,
    IrrigationDispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsumptionKind {
    FrequencySignal,
    TemporalCoupling,
    ConsumerHealth,
}

/// Category-tagged signal content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum SignalBody {
    Structural { kind: StructuralKind, payload: Value },
    Integrity { kind: IntegrityKind, payload: Value },
    Epistemic { kind: EpistemicKind, payload: Value },
    Contrast { kind: ContrastKind, payload: Value },
    Operational { kind: OperationalKind, payload: Value },
    Consumption { kind: ConsumptionKind, payload: Value },
}

impl SignalBody {
    pub fn structural(kind: StructuralKind, payload: Value) -> Self {
        SignalBody::Structural { kind, payload }
    }

    pub fn integrity(kind: IntegrityKind, payload: Value) -> Self {
        SignalBody::Integrity { kind, payload }
    }

    pub fn epistemic(kind: EpistemicKind, payload: Value) -> Self {
        SignalBody::Epistemic { kind, payload }
    }

    pub fn contrast(kind: ContrastKind, payload: Value) -> Self {
        SignalBody::Contrast { kind, payload }
    }

    pub fn operational(kind: OperationalKind, payload: Value) -> Self {
        SignalBody::Operational { kind, payload }
    }

    pub fn consumption(kind: ConsumptionKind, payload: Value) -> Self {
        SignalBody::Consumption { kind, payload }
    }

    pub fn category(&self) -> SignalCategory {
        match self {
            SignalBody::Structural { .. } => SignalCategory::Structural,
            SignalBody::Integrity { .. } => SignalCategory::Integrity,
            SignalBody::Epistemic { .. } => SignalCategory::Epistemic,
            SignalBody::Contrast { .. } => SignalCategory::Contrast,
            SignalBody::Operational { .. } => SignalCategory::Operational,
            SignalBody::Consumption { .. } => SignalCategory::Consumption,
        }
    }

    /// Concrete type name used by contracts, e.g. `"EmpiricalSupportSignal"`.
    pub fn signal_type(&self) -> &'static str {
        match self {
            SignalBody::Structural { kind, .. } => match kind {
                StructuralKind::StructuralAlignment => "StructuralAlignmentSignal",
                StructuralKind::SchemaConflict => "SchemaConflictSignal",
                StructuralKind::CanonicalMapping => "CanonicalMappingSignal",
            },
            SignalBody::Integrity { kind, .. } => match kind {
                IntegrityKind::EventPresence => "EventPresenceSignal",
                IntegrityKind::EventCompleteness => "EventCompletenessSignal",
                IntegrityKind::DataIntegrity => "DataIntegritySignal",
            },
            SignalBody::Epistemic { kind, .. } => match kind {
                EpistemicKind::AnswerDeterminacy => "AnswerDeterminacySignal",
                EpistemicKind::AnswerSpecificity => "AnswerSpecificitySignal",
                EpistemicKind::EmpiricalSupport => "EmpiricalSupportSignal",
                EpistemicKind::MethodApplication => "MethodApplicationSignal",
            },
            SignalBody::Contrast { kind, .. } => match kind {
                ContrastKind::DecisionDivergence => "DecisionDivergenceSignal",
                ContrastKind::ConfidenceDrop => "ConfidenceDropSignal",
                ContrastKind::TemporalContrast => "TemporalContrastSignal",
            },
            SignalBody::Operational { kind, .. } => match kind {
                OperationalKind::ExecutionAttempt => "ExecutionAttemptSignal",
                OperationalKind::FailureMode => "FailureModeSignal",
                OperationalKind::IrrigationDispatch => "IrrigationDispatchSignal",
            },
            SignalBody::Consumption { kind, .. } => match kind {
                ConsumptionKind::FrequencySignal => "FrequencySignal",
                ConsumptionKind::TemporalCoupling => "TemporalCouplingSignal",
                ConsumptionKind::ConsumerHealth => "ConsumerHealthSignal",
            },
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            SignalBody::Structural { payload, .. }
            | SignalBody::Integrity { payload, .. }
            | SignalBody::Epistemic { payload, .. }
            | SignalBody::Contrast { payload, .. }
            | SignalBody::Operational { payload, .. }
            | SignalBody::Consumption { payload, .. } => payload,
        }
    }
}
