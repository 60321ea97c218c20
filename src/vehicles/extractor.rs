use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    confidence_from_ratio, required_str, Capability, Vehicle, VehicleCapabilities, VehicleCore,
};
use crate::bus::BusCategory;
use crate::contracts::PublicationContract;
use crate::error::VehicleError;
use crate::events::EventType;
use crate::signals::{EpistemicKind, Signal, SignalBody, SignalConfidence, SignalContext};
use crate::substrate::SubstrateHandles;

const HEDGES: [&str; 6] = ["may", "might", "could", "possibly", "perhaps", "approximately"];
const COMMITMENTS: [&str; 4] = ["will", "must", "shall", "commits"];
const MAX_SAMPLES: usize = 5;

/// Pulls quantitative evidence and commitment language out of text.
///
/// Input: `{"source_file": str, "content": str}`.
pub struct EvidenceExtractor {
    core: VehicleCore,
}

#[derive(Debug, Default, PartialEq)]
struct Findings {
    numbers: Vec<String>,
    percentages: usize,
    years: usize,
    hedges: usize,
    commitments: usize,
}

fn scan(content: &str) -> Findings {
    let mut findings = Findings::default();
    for raw in content.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '%' && c != '.');
        let token = token.trim_end_matches('.');
        let lower = token.to_lowercase();
        if HEDGES.contains(&lower.as_str()) {
            findings.hedges += 1;
        }
        if COMMITMENTS.contains(&lower.as_str()) {
            findings.commitments += 1;
        }
        let digits = token.trim_end_matches('%');
        let numeric = digits.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',');
        if !digits.is_empty() && numeric && digits.chars().any(|c| c.is_ascii_digit()) {
            if token.ends_with('%') {
                findings.percentages += 1;
            } else if digits.len() == 4 && (digits.starts_with("19") || digits.starts_with("20")) {
                findings.years += 1;
            }
            findings.numbers.push(token.to_string());
        }
    }
    findings
}

impl EvidenceExtractor {
    pub const ID: &'static str = "evidence_extractor";

    pub fn new(substrate: SubstrateHandles) -> Self {
        let capabilities = VehicleCapabilities::new()
            .with(Capability::Extract)
            .with(Capability::Analyze)
            .with(Capability::Publish)
            .producing([
                "EmpiricalSupportSignal",
                "AnswerDeterminacySignal",
                "AnswerSpecificitySignal",
            ]);
        Self {
            core: VehicleCore::new(Self::ID, capabilities, substrate),
        }
    }
}

#[async_trait]
impl Vehicle for EvidenceExtractor {
    fn core(&self) -> &VehicleCore {
        &self.core
    }

    fn publication_contract(&self) -> Option<PublicationContract> {
        Some(self.core.publication_contract([BusCategory::Epistemic]))
    }

    async fn process(
        &self,
        input: &Value,
        context: &SignalContext,
    ) -> Result<Vec<Signal>, VehicleError> {
        self.core.require(Capability::Extract)?;
        let source_file = required_str(input, "source_file")?;
        let content = required_str(input, "content")?;
        let findings = scan(content);

        let extracted = self
            .core
            .create_event(
                EventType::EvidenceExtracted,
                json!({
                    "numbers": findings.numbers.len(),
                    "percentages": findings.percentages,
                    "years": findings.years,
                }),
                Some(source_file),
            )
            .await;
        let matched = self
            .core
            .create_event(
                EventType::PatternMatched,
                json!({"hedges": findings.hedges, "commitments": findings.commitments}),
                Some(source_file),
            )
            .await;

        let evidence = findings.numbers.len();
        let support = match evidence {
            0 => SignalConfidence::Indeterminate,
            1 => SignalConfidence::Low,
            2..=4 => SignalConfidence::Medium,
            _ => SignalConfidence::High,
        };
        let samples: Vec<&String> = findings.numbers.iter().take(MAX_SAMPLES).collect();

        let stances = findings.hedges + findings.commitments;
        let determinacy = if stances == 0 {
            0.0
        } else {
            findings.commitments as f64 / stances as f64
        };

        let specific = findings.percentages + findings.years;
        let specificity = if evidence == 0 { 0.0 } else { specific as f64 / evidence as f64 };

        Ok(vec![
            Signal::new(
                SignalBody::epistemic(
                    EpistemicKind::EmpiricalSupport,
                    json!({"evidence_count": evidence, "samples": samples}),
                ),
                Some(context.clone()),
                Some(self.core.create_signal_source(&extracted)),
                support,
                format!("{evidence} quantitative statements found"),
            )?,
            Signal::new(
                SignalBody::epistemic(
                    EpistemicKind::AnswerDeterminacy,
                    json!({
                        "hedges": findings.hedges,
                        "commitments": findings.commitments,
                        "determinacy": determinacy,
                    }),
                ),
                Some(context.clone()),
                Some(self.core.create_signal_source(&matched)),
                confidence_from_ratio(determinacy),
                format!("{} commitments against {} hedges", findings.commitments, findings.hedges),
            )?,
            Signal::new(
                SignalBody::epistemic(
                    EpistemicKind::AnswerSpecificity,
                    json!({
                        "percentages": findings.percentages,
                        "years": findings.years,
                        "specificity": specificity,
                    }),
                ),
                Some(context.clone()),
                Some(self.core.create_signal_source(&extracted)),
                confidence_from_ratio(specificity),
                format!("{specific} of {evidence} figures are dated or proportional"),
            )?,
        ])
    }
}
