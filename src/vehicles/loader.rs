use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    confidence_from_ratio, required_str, Capability, Vehicle, VehicleCapabilities, VehicleCore,
};
use crate::bus::BusCategory;
use crate::contracts::PublicationContract;
use crate::error::VehicleError;
use crate::events::EventType;
use crate::signals::{
    ContentHash, IntegrityKind, Signal, SignalBody, SignalConfidence, SignalContext,
};
use crate::substrate::SubstrateHandles;

/// Metadata keys a document is expected to carry.
const EXPECTED_METADATA: [&str; 4] = ["title", "author", "date", "jurisdiction"];

/// Ingests raw documents and reports on their integrity.
///
/// Input: `{"source_file": str, "content": str, "metadata": {..}}`.
pub struct DocumentLoader {
    core: VehicleCore,
}

impl DocumentLoader {
    pub const ID: &'static str = "document_loader";

    pub fn new(substrate: SubstrateHandles) -> Self {
        let capabilities = VehicleCapabilities::new()
            .with(Capability::Load)
            .with(Capability::Transform)
            .with(Capability::Publish)
            .producing(["EventPresenceSignal", "EventCompletenessSignal", "DataIntegritySignal"]);
        Self {
            core: VehicleCore::new(Self::ID, capabilities, substrate),
        }
    }
}

#[async_trait]
impl Vehicle for DocumentLoader {
    fn core(&self) -> &VehicleCore {
        &self.core
    }

    fn publication_contract(&self) -> Option<PublicationContract> {
        Some(self.core.publication_contract([BusCategory::Integrity]))
    }

    async fn process(
        &self,
        input: &Value,
        context: &SignalContext,
    ) -> Result<Vec<Signal>, VehicleError> {
        self.core.require(Capability::Load)?;
        let source_file = required_str(input, "source_file")?;
        let content = required_str(input, "content")?;
        let metadata = input.get("metadata").cloned().unwrap_or_else(|| json!({}));

        let lines = content.lines().count();
        let blank_lines = content.lines().filter(|l| l.trim().is_empty()).count();
        let digest = ContentHash::of_bytes(content.as_bytes());

        let loaded = self
            .core
            .create_event(
                EventType::DocumentLoaded,
                json!({"bytes": content.len(), "lines": lines, "sha256": digest.to_hex()}),
                Some(source_file),
            )
            .await;

        let present: Vec<&str> = EXPECTED_METADATA
            .iter()
            .copied()
            .filter(|k| metadata.get(*k).map_or(false, |v| !v.is_null() && v != ""))
            .collect();
        let missing: Vec<&str> = EXPECTED_METADATA
            .iter()
            .copied()
            .filter(|k| !present.contains(k))
            .collect();
        let completeness = present.len() as f64 / EXPECTED_METADATA.len() as f64;

        let validated = self
            .core
            .create_event(
                EventType::DocumentValidated,
                json!({"metadata_present": present, "metadata_missing": missing}),
                Some(source_file),
            )
            .await;

        let mut signals = Vec::with_capacity(3);

        signals.push(Signal::new(
            SignalBody::integrity(
                IntegrityKind::EventPresence,
                json!({
                    "event_type": "DOCUMENT_LOADED",
                    "event_id": loaded.event_id(),
                    "present": true,
                }),
            ),
            Some(context.clone()),
            Some(self.core.create_signal_source(&loaded)),
            SignalConfidence::High,
            format!("{source_file} was loaded"),
        )?);

        signals.push(Signal::new(
            SignalBody::integrity(
                IntegrityKind::EventCompleteness,
                json!({
                    "expected": EXPECTED_METADATA,
                    "missing": missing,
                    "completeness": completeness,
                }),
            ),
            Some(context.clone()),
            Some(self.core.create_signal_source(&validated)),
            confidence_from_ratio(completeness),
            format!("{} of {} metadata fields present", present.len(), EXPECTED_METADATA.len()),
        )?);

        let empty = content.trim().is_empty();
        let blank_ratio = if lines == 0 { 1.0 } else { blank_lines as f64 / lines as f64 };
        signals.push(Signal::new(
            SignalBody::integrity(
                IntegrityKind::DataIntegrity,
                json!({
                    "sha256": digest.to_hex(),
                    "bytes": content.len(),
                    "empty": empty,
                    "blank_line_ratio": blank_ratio,
                }),
            ),
            Some(context.clone()),
            Some(self.core.create_signal_source(&loaded)),
            if empty { SignalConfidence::Low } else { SignalConfidence::High },
            if empty {
                "document has no content".to_string()
            } else {
                "document content readable".to_string()
            },
        )?);

        Ok(signals)
    }
}
