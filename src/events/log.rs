//! Append-only event log.
//!
//! Storage tiers:
//! 1. HOT: active events in RAM, indexed by id, type, source file and stage.
//! 2. COLD: archived (processed) events, in RAM or in a JSONL archive file.
//!
//! `count()` covers both tiers and never decreases. `active_count()` is the
//! hot tier only. Every mutation is mirrored to an optional JSONL journal
//! which `EventLog::open` replays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::event::{Event, EventType, PipelineStage};
use crate::config::EventLogConfig;
use crate::error::EventLogError;
use crate::utils::jsonl::JsonlFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// One JSON object per line.
    Jsonl,
    /// A single JSON array.
    JsonArray,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Append { event: Event },
    Processed { event_id: String },
    Error { event_id: String, message: String },
    Archived { event_ids: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventLogCounts {
    pub total: usize,
    pub active: usize,
    pub archived: usize,
    pub unprocessed: usize,
    pub journal_failures: u64,
}

enum ColdStore {
    Memory(HashMap<String, Event>),
    File(JsonlFile),
}

struct LogInner {
    hot: HashMap<String, Event>,
    archived_ids: HashSet<String>,
    cold: ColdStore,
    order: Vec<String>,
    by_type: HashMap<EventType, Vec<String>>,
    by_source_file: HashMap<String, Vec<String>>,
    by_stage: HashMap<PipelineStage, Vec<String>>,
}

impl LogInner {
    fn new(cold: ColdStore) -> Self {
        Self {
            hot: HashMap::new(),
            archived_ids: HashSet::new(),
            cold,
            order: Vec::new(),
            by_type: HashMap::new(),
            by_source_file: HashMap::new(),
            by_stage: HashMap::new(),
        }
    }

    fn contains(&self, event_id: &str) -> bool {
        self.hot.contains_key(event_id) || self.archived_ids.contains(event_id)
    }

    fn insert(&mut self, event: Event) {
        let id = event.event_id().to_string();
        self.order.push(id.clone());
        self.by_type.entry(event.event_type()).or_default().push(id.clone());
        self.by_stage.entry(event.stage()).or_default().push(id.clone());
        if let Some(file) = event.source_file() {
            self.by_source_file.entry(file.to_string()).or_default().push(id.clone());
        }
        self.hot.insert(id, event);
    }

    fn hot_events(&self, ids: Option<&Vec<String>>) -> Vec<Event> {
        ids.map(|ids| ids.iter().filter_map(|id| self.hot.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Append { event } => {
                if !self.contains(event.event_id()) {
                    self.insert(event);
                }
            }
            JournalRecord::Processed { event_id } => {
                if let Some(e) = self.hot.get_mut(&event_id) {
                    e.mark_processed();
                }
            }
            JournalRecord::Error { event_id, message } => {
                if let Some(e) = self.hot.get_mut(&event_id) {
                    e.push_error(message);
                }
            }
            JournalRecord::Archived { event_ids } => {
                for id in event_ids {
                    if let Some(event) = self.hot.remove(&id) {
                        if let ColdStore::Memory(map) = &mut self.cold {
                            map.insert(id.clone(), event);
                        }
                        self.archived_ids.insert(id);
                    }
                }
            }
        }
    }
}

pub struct EventLog {
    inner: RwLock<LogInner>,
    journal: Option<JsonlFile>,
    journal_failures: AtomicU64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl EventLog {
    /// Volatile log: no journal, archive kept in memory.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(LogInner::new(ColdStore::Memory(HashMap::new()))),
            journal: None,
            journal_failures: AtomicU64::new(0),
        }
    }

    /// Open a log per `config`, replaying the journal if one exists.
    pub async fn open(config: &EventLogConfig) -> Result<Self, EventLogError> {
        let cold = match &config.archive_path {
            Some(path) => ColdStore::File(JsonlFile::new(path)),
            None => ColdStore::Memory(HashMap::new()),
        };
        let mut inner = LogInner::new(cold);

        let journal = config.journal_path.as_ref().map(JsonlFile::new);
        if let Some(journal) = &journal {
            let records: Vec<JournalRecord> = journal.read_all().await?;
            let replayed = records.len();
            for record in records {
                inner.apply(record);
            }
            if replayed > 0 {
                info!(
                    "Event log replayed {} journal records ({} events) from {:?}",
                    replayed,
                    inner.order.len(),
                    journal.path()
                );
            }
        }

        Ok(Self {
            inner: RwLock::new(inner),
            journal,
            journal_failures: AtomicU64::new(0),
        })
    }

    async fn journal(&self, record: JournalRecord) {
        let Some(journal) = &self.journal else { return };
        if let Err(e) = journal.append(&[record]).await {
            self.journal_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Event journal write to {:?} failed: {}", journal.path(), e);
        }
    }

    /// Store an event and return its id.
    ///
    /// Never fails. Re-appending an id that is already stored is a no-op.
    pub async fn append(&self, event: Event) -> String {
        let id = event.event_id().to_string();
        let mut inner = self.inner.write().await;
        if inner.contains(&id) {
            debug!("Event {} already in log, ignoring duplicate append", id);
            return id;
        }
        if !event.is_well_formed() {
            warn!("Appending event {} with incomplete identity fields", id);
        }
        debug!("Event appended: {} {:?}", id, event.event_type());
        inner.insert(event.clone());
        self.journal(JournalRecord::Append { event }).await;
        id
    }

    /// Active event by id. Archived events are read through [`EventLog::get_archived`].
    pub async fn get_by_id(&self, event_id: &str) -> Option<Event> {
        self.inner.read().await.hot.get(event_id).cloned()
    }

    pub async fn get_archived(&self, event_id: &str) -> Result<Option<Event>, EventLogError> {
        let inner = self.inner.read().await;
        if !inner.archived_ids.contains(event_id) {
            return Ok(None);
        }
        match &inner.cold {
            ColdStore::Memory(map) => Ok(map.get(event_id).cloned()),
            ColdStore::File(file) => {
                let events: Vec<Event> = file.read_all().await?;
                Ok(events.into_iter().find(|e| e.event_id() == event_id))
            }
        }
    }

    /// All archived events, in archive order.
    pub async fn archived(&self) -> Result<Vec<Event>, EventLogError> {
        let inner = self.inner.read().await;
        match &inner.cold {
            ColdStore::Memory(map) => Ok(inner
                .order
                .iter()
                .filter_map(|id| map.get(id).cloned())
                .collect()),
            ColdStore::File(file) => {
                let events: Vec<Event> = file.read_all().await?;
                Ok(events
                    .into_iter()
                    .filter(|e| inner.archived_ids.contains(e.event_id()))
                    .collect())
            }
        }
    }

    /// Active events not yet processed, in append order.
    pub async fn get_unprocessed(&self) -> Vec<Event> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.hot.get(id))
            .filter(|e| !e.is_processed())
            .cloned()
            .collect()
    }

    pub async fn get_by_type(&self, event_type: EventType) -> Vec<Event> {
        let inner = self.inner.read().await;
        inner.hot_events(inner.by_type.get(&event_type))
    }

    pub async fn get_by_source_file(&self, source_file: &str) -> Vec<Event> {
        let inner = self.inner.read().await;
        inner.hot_events(inner.by_source_file.get(source_file))
    }

    pub async fn get_by_stage(&self, stage: PipelineStage) -> Vec<Event> {
        let inner = self.inner.read().await;
        inner.hot_events(inner.by_stage.get(&stage))
    }

    /// Returns `Ok(true)` if the event moved from unprocessed to processed.
    pub async fn mark_processed(&self, event_id: &str) -> Result<bool, EventLogError> {
        let mut inner = self.inner.write().await;
        if inner.archived_ids.contains(event_id) {
            // Only processed events are archived.
            return Ok(false);
        }
        let event = inner
            .hot
            .get_mut(event_id)
            .ok_or_else(|| EventLogError::UnknownEvent(event_id.to_string()))?;
        let changed = event.mark_processed();
        if changed {
            self.journal(JournalRecord::Processed {
                event_id: event_id.to_string(),
            })
            .await;
        }
        Ok(changed)
    }

    pub async fn add_error(
        &self,
        event_id: &str,
        message: impl Into<String>,
    ) -> Result<(), EventLogError> {
        let message = message.into();
        let mut inner = self.inner.write().await;
        if inner.archived_ids.contains(event_id) {
            return Err(EventLogError::Archived(event_id.to_string()));
        }
        let event = inner
            .hot
            .get_mut(event_id)
            .ok_or_else(|| EventLogError::UnknownEvent(event_id.to_string()))?;
        event.push_error(message.clone());
        self.journal(JournalRecord::Error {
            event_id: event_id.to_string(),
            message,
        })
        .await;
        Ok(())
    }

    /// Move processed events older than `cutoff` to cold storage.
    ///
    /// Unprocessed events always stay hot. Returns how many were archived.
    pub async fn archive_processed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, EventLogError> {
        let mut inner = self.inner.write().await;
        let to_archive: Vec<Event> = inner
            .order
            .iter()
            .filter_map(|id| inner.hot.get(id))
            .filter(|e| e.is_processed() && e.timestamp() < cutoff)
            .cloned()
            .collect();
        if to_archive.is_empty() {
            return Ok(0);
        }

        // Write the cold copy before dropping the hot one.
        if let ColdStore::File(file) = &inner.cold {
            file.append(&to_archive).await?;
        }

        let event_ids: Vec<String> = to_archive.iter().map(|e| e.event_id().to_string()).collect();
        inner.apply(JournalRecord::Archived {
            event_ids: event_ids.clone(),
        });
        let moved = event_ids.len();
        self.journal(JournalRecord::Archived { event_ids }).await;

        info!(
            "Event log archived {} processed events ({} active, {} total)",
            moved,
            inner.hot.len(),
            inner.order.len()
        );
        Ok(moved)
    }

    /// Every event ever appended, archived ones included. Never decreases.
    pub async fn count(&self) -> usize {
        self.inner.read().await.order.len()
    }

    /// Events still in the hot tier.
    pub async fn active_count(&self) -> usize {
        self.inner.read().await.hot.len()
    }

    pub async fn counts(&self) -> EventLogCounts {
        let inner = self.inner.read().await;
        EventLogCounts {
            total: inner.order.len(),
            active: inner.hot.len(),
            archived: inner.archived_ids.len(),
            unprocessed: inner.hot.values().filter(|e| !e.is_processed()).count(),
            journal_failures: self.journal_failures.load(Ordering::Relaxed),
        }
    }

    /// All events (hot and cold) in append order.
    pub async fn snapshot(&self) -> Result<Vec<Event>, EventLogError> {
        let archived: HashMap<String, Event> = self
            .archived()
            .await?
            .into_iter()
            .map(|e| (e.event_id().to_string(), e))
            .collect();
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.hot.get(id).or_else(|| archived.get(id)).cloned())
            .collect())
    }

    pub async fn export(&self, format: ExportFormat) -> Result<String, EventLogError> {
        let events = self.snapshot().await?;
        match format {
            ExportFormat::Jsonl => {
                let mut out = String::new();
                for event in &events {
                    out.push_str(&serde_json::to_string(event)?);
                    out.push('\n');
                }
                Ok(out)
            }
            ExportFormat::JsonArray => Ok(serde_json::to_string_pretty(&events)?),
        }
    }

    pub async fn export_to(
        &self,
        path: &Path,
        format: ExportFormat,
    ) -> Result<usize, EventLogError> {
        let body = self.export(format).await?;
        let lines = body.lines().count();
        tokio::fs::write(path, body).await?;
        info!("Event log exported to {:?}", path);
        Ok(lines)
    }

    /// Append every event from a JSONL export, skipping ids already present.
    pub async fn import_jsonl(&self, path: &Path) -> Result<usize, EventLogError> {
        let events: Vec<Event> = JsonlFile::new(path).read_all().await?;
        let before = self.count().await;
        for event in events {
            self.append(event).await;
        }
        Ok(self.count().await - before)
    }
}
