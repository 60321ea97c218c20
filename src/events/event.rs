use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Pipeline stage an event type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Ingestion,
    Scoping,
    Extraction,
    Enrichment,
    Analysis,
    Irrigation,
    Orchestration,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Ingestion => "ingestion",
            PipelineStage::Scoping => "scoping",
            PipelineStage::Extraction => "extraction",
            PipelineStage::Enrichment => "enrichment",
            PipelineStage::Analysis => "analysis",
            PipelineStage::Irrigation => "irrigation",
            PipelineStage::Orchestration => "orchestration",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened. Grouped by the stage that emits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Ingestion
    DocumentLoaded,
    DocumentValidated,
    DocumentTransformed,
    // Scoping
    ContextScoped,
    ChunkCreated,
    // Extraction
    EvidenceExtracted,
    PatternMatched,
    // Enrichment
    EnrichmentApplied,
    SignalEnriched,
    // Analysis
    QualityAssessed,
    QuestionAnswered,
    ContractExecuted,
    ContractFailed,
    // Irrigation
    IrrigationRequested,
    IrrigationCompleted,
    IrrigationBlocked,
    // Orchestration
    PipelineStarted,
    StageCompleted,
    StageFailed,
    PipelineCompleted,
}

impl EventType {
    pub fn stage(&self) -> PipelineStage {
        use EventType::*;
        match self {
            DocumentLoaded | DocumentValidated | DocumentTransformed => PipelineStage::Ingestion,
            ContextScoped | ChunkCreated => PipelineStage::Scoping,
            EvidenceExtracted | PatternMatched => PipelineStage::Extraction,
            EnrichmentApplied | SignalEnriched => PipelineStage::Enrichment,
            QualityAssessed | QuestionAnswered | ContractExecuted | ContractFailed => {
                PipelineStage::Analysis
            }
            IrrigationRequested | IrrigationCompleted | IrrigationBlocked => {
                PipelineStage::Irrigation
            }
            PipelineStarted | StageCompleted | StageFailed | PipelineCompleted => {
                PipelineStage::Orchestration
            }
        }
    }
}

/// A raw occurrence. Only the event log may flip `processed` or add errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    event_id: String,
    event_type: EventType,
    payload: Value,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_file: Option<String>,
    source_component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default)]
    processed: bool,
    #[serde(default)]
    errors: Vec<String>,
}

impl Event {
    pub fn new(event_type: EventType, source_component: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: format!("evt-{}", Uuid::new_v4()),
            event_type,
            payload,
            timestamp: Utc::now(),
            source_file: None,
            source_component: source_component.into(),
            correlation_id: None,
            processed: false,
            errors: Vec::new(),
        }
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Override the creation time; used when replaying externally produced events.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn stage(&self) -> PipelineStage {
        self.event_type.stage()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    pub fn source_component(&self) -> &str {
        &self.source_component
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_well_formed(&self) -> bool {
        !self.event_id.trim().is_empty() && !self.source_component.trim().is_empty()
    }

    /// Returns true on the unprocessed → processed transition only.
    pub(crate) fn mark_processed(&mut self) -> bool {
        let changed = !self.processed;
        self.processed = true;
        changed
    }

    pub(crate) fn push_error(&mut self, message: String) {
        self.errors.push(message);
    }
}
