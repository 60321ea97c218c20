//! Shared value types carried by every signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// The six signal families. Each family has a dedicated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Structural,
    Integrity,
    Epistemic,
    Contrast,
    Operational,
    Consumption,
}

impl SignalCategory {
    pub const ALL: [SignalCategory; 6] = [
        SignalCategory::Structural,
        SignalCategory::Integrity,
        SignalCategory::Epistemic,
        SignalCategory::Contrast,
        SignalCategory::Operational,
        SignalCategory::Consumption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Structural => "structural",
            SignalCategory::Integrity => "integrity",
            SignalCategory::Epistemic => "epistemic",
            SignalCategory::Contrast => "contrast",
            SignalCategory::Operational => "operational",
            SignalCategory::Consumption => "consumption",
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignalCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown signal category '{}'", s))
    }
}

/// Confidence attached to a signal.
///
/// Ordering comes from the explicit backing values, not declaration order:
/// `High > Medium > Low > Indeterminate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum SignalConfidence {
    High = 3,
    Medium = 2,
    Low = 1,
    Indeterminate = 0,
}

impl SignalConfidence {
    pub const ALL: [SignalConfidence; 4] = [
        SignalConfidence::High,
        SignalConfidence::Medium,
        SignalConfidence::Low,
        SignalConfidence::Indeterminate,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            3 => Some(SignalConfidence::High),
            2 => Some(SignalConfidence::Medium),
            1 => Some(SignalConfidence::Low),
            0 => Some(SignalConfidence::Indeterminate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalConfidence::High => "HIGH",
            SignalConfidence::Medium => "MEDIUM",
            SignalConfidence::Low => "LOW",
            SignalConfidence::Indeterminate => "INDETERMINATE",
        }
    }
}

impl Ord for SignalConfidence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value().cmp(&other.value())
    }
}

impl PartialOrd for SignalConfidence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SignalConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the analysed material a signal applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalContext {
    /// Kind of node the signal describes, e.g. "document", "policy_area", "question".
    pub node_type: String,
    pub node_id: String,
    /// Pipeline phase that produced the signal.
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
}

impl SignalContext {
    pub fn new(
        node_type: impl Into<String>,
        node_id: impl Into<String>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            node_id: node_id.into(),
            phase: phase.into(),
            policy_area: None,
            dimension: None,
            question_id: None,
        }
    }

    pub fn with_policy_area(mut self, policy_area: impl Into<String>) -> Self {
        self.policy_area = Some(policy_area.into());
        self
    }

    pub fn with_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimension = Some(dimension.into());
        self
    }

    pub fn with_question(mut self, question_id: impl Into<String>) -> Self {
        self.question_id = Some(question_id.into());
        self
    }

    /// Empty list means the context is structurally complete.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.node_type.trim().is_empty() {
            problems.push("context.node_type is empty".to_string());
        }
        if self.node_id.trim().is_empty() {
            problems.push("context.node_id is empty".to_string());
        }
        if self.phase.trim().is_empty() {
            problems.push("context.phase is empty".to_string());
        }
        problems
    }
}

/// Provenance of a signal: the event it was derived from and who derived it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalSource {
    pub event_id: String,
    pub generator_vehicle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl SignalSource {
    pub fn new(event_id: impl Into<String>, generator_vehicle: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            generator_vehicle: generator_vehicle.into(),
            source_file: None,
            generated_at: Utc::now(),
        }
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.event_id.trim().is_empty() {
            problems.push("source.event_id is empty".to_string());
        }
        if self.generator_vehicle.trim().is_empty() {
            problems.push("source.generator_vehicle is empty".to_string());
        }
        problems
    }
}

/// One provenance step in a signal's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_total_order() {
        assert!(SignalConfidence::High > SignalConfidence::Medium);
        assert!(SignalConfidence::Medium > SignalConfidence::Low);
        assert!(SignalConfidence::Low > SignalConfidence::Indeterminate);

        let mut all = SignalConfidence::ALL.to_vec();
        all.sort();
        assert_eq!(
            all,
            vec![
                SignalConfidence::Indeterminate,
                SignalConfidence::Low,
                SignalConfidence::Medium,
                SignalConfidence::High,
            ]
        );
        for c in SignalConfidence::ALL {
            assert_eq!(SignalConfidence::from_value(c.value()), Some(c));
        }
        assert_eq!(SignalConfidence::from_value(9), None);
    }

    #[test]
    fn test_category_round_trip_names() {
        for c in SignalCategory::ALL {
            assert_eq!(c.as_str().parse::<SignalCategory>().unwrap(), c);
        }
        assert!("universal".parse::<SignalCategory>().is_err());
    }

    #[test]
    fn test_context_problems() {
        let ctx = SignalContext::new("document", "", "ingestion");
        assert_eq!(ctx.problems(), vec!["context.node_id is empty".to_string()]);
        assert!(SignalContext::new("document", "doc-1", "ingestion").problems().is_empty());
    }
}
