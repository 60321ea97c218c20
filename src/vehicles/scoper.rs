use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{
    confidence_from_ratio, required_str, Capability, Vehicle, VehicleCapabilities, VehicleCore,
};
use crate::bus::BusCategory;
use crate::contracts::PublicationContract;
use crate::error::VehicleError;
use crate::events::EventType;
use crate::signals::{Signal, SignalBody, SignalConfidence, SignalContext, StructuralKind};
use crate::substrate::SubstrateHandles;

/// Splits a document into chunks and checks its section structure.
///
/// Input: `{"source_file": str, "content": str, "expected_sections": [str]}`.
/// Headings are lines starting with `#`.
pub struct ContextScoper {
    core: VehicleCore,
}

struct Chunk<'a> {
    heading: Option<String>,
    text: &'a str,
}

fn chunk(content: &str) -> Vec<Chunk<'_>> {
    content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|text| Chunk {
            heading: text
                .lines()
                .next()
                .filter(|l| l.starts_with('#'))
                .map(|l| l.trim_start_matches('#').trim().to_lowercase()),
            text,
        })
        .collect()
}

impl ContextScoper {
    pub const ID: &'static str = "context_scoper";

    pub fn new(substrate: SubstrateHandles) -> Self {
        let capabilities = VehicleCapabilities::new()
            .with(Capability::Scope)
            .with(Capability::Publish)
            .producing([
                "StructuralAlignmentSignal",
                "CanonicalMappingSignal",
                "SchemaConflictSignal",
            ]);
        Self {
            core: VehicleCore::new(Self::ID, capabilities, substrate),
        }
    }
}

#[async_trait]
impl Vehicle for ContextScoper {
    fn core(&self) -> &VehicleCore {
        &self.core
    }

    fn publication_contract(&self) -> Option<PublicationContract> {
        Some(self.core.publication_contract([BusCategory::Structural]))
    }

    async fn process(
        &self,
        input: &Value,
        context: &SignalContext,
    ) -> Result<Vec<Signal>, VehicleError> {
        self.core.require(Capability::Scope)?;
        let source_file = required_str(input, "source_file")?;
        let content = required_str(input, "content")?;
        let expected: Vec<String> = input
            .get("expected_sections")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(|s| s.to_lowercase()).collect())
            .unwrap_or_default();

        let chunks = chunk(content);
        for (index, c) in chunks.iter().enumerate() {
            self.core
                .create_event(
                    EventType::ChunkCreated,
                    json!({"index": index, "heading": c.heading, "chars": c.text.len()}),
                    Some(source_file),
                )
                .await;
        }
        let scoped = self
            .core
            .create_event(
                EventType::ContextScoped,
                json!({"chunks": chunks.len()}),
                Some(source_file),
            )
            .await;
        let source = self.core.create_signal_source(&scoped);

        let mut occurrences: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (index, c) in chunks.iter().enumerate() {
            if let Some(h) = &c.heading {
                occurrences.entry(h.as_str()).or_default().push(index);
            }
        }

        let (found, missing): (Vec<&str>, Vec<&str>) = expected
            .iter()
            .map(String::as_str)
            .partition(|e| occurrences.contains_key(e));
        let alignment = if expected.is_empty() {
            1.0
        } else {
            found.len() as f64 / expected.len() as f64
        };

        let mut signals = vec![
            Signal::new(
                SignalBody::structural(
                    StructuralKind::StructuralAlignment,
                    json!({
                        "expected": expected,
                        "found": found,
                        "missing": missing,
                        "alignment": alignment,
                    }),
                ),
                Some(context.clone()),
                Some(source.clone()),
                confidence_from_ratio(alignment),
                format!("{} of {} expected sections present", found.len(), expected.len()),
            )?,
            Signal::new(
                SignalBody::structural(
                    StructuralKind::CanonicalMapping,
                    json!({"chunks": chunks.len(), "sections": occurrences}),
                ),
                Some(context.clone()),
                Some(source.clone()),
                if chunks.is_empty() {
                    SignalConfidence::Indeterminate
                } else {
                    SignalConfidence::High
                },
                format!("{} chunks mapped", chunks.len()),
            )?,
        ];

        let duplicates: Vec<&str> = occurrences
            .iter()
            .filter(|(_, at)| at.len() > 1)
            .map(|(h, _)| *h)
            .collect();
        if !duplicates.is_empty() {
            signals.push(Signal::new(
                SignalBody::structural(
                    StructuralKind::SchemaConflict,
                    json!({"duplicate_sections": duplicates}),
                ),
                Some(context.clone()),
                Some(source),
                SignalConfidence::Medium,
                format!("{} section heading(s) repeated", duplicates.len()),
            )?);
        }

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking_and_headings() {
        let chunks = chunk("# Goals\nbe good\n\n\n# Budget\n100\n\nplain");
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading.as_deref(), Some("goals"));
        assert_eq!(chunks[2].heading, None);
    }

    #[tokio::test]
    async fn test_alignment_and_conflicts() {
        let substrate = SubstrateHandles::in_memory();
        let scoper = ContextScoper::new(substrate.clone());
        let input = json!({
            "source_file": "plan.md",
            "content": "# Goals\na\n\n# Budget\nb\n\n# Goals\nc",
            "expected_sections": ["Goals", "Budget", "Risks"]
        });
        let signals = scoper
            .process(&input, &SignalContext::new("document", "plan.md", "scoping"))
            .await
            .unwrap();

        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].payload()["missing"], json!(["risks"]));
        assert_eq!(signals[0].confidence(), SignalConfidence::Medium);
        assert_eq!(signals[2].signal_type(), "SchemaConflictSignal");
        assert_eq!(substrate.event_log.get_by_type(EventType::ChunkCreated).await.len(), 3);
    }
}
