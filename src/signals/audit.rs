//! Append-only provenance log keyed by `signal_id`.
//!
//! Lets components annotate a signal after the fact without touching the
//! signal value itself. Entries are never removed or rewritten.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::types::AuditEntry;

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub sequence: u64,
    pub signal_id: String,
    pub entry: AuditEntry,
}

#[derive(Debug, Default)]
pub struct AuditLog {
    inner: RwLock<AuditInner>,
}

#[derive(Debug, Default)]
struct AuditInner {
    records: Vec<AuditRecord>,
    by_signal: HashMap<String, Vec<usize>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry for `signal_id`; returns its global sequence number.
    pub async fn append(&self, signal_id: &str, entry: AuditEntry) -> u64 {
        let mut inner = self.inner.write().await;
        let sequence = inner.records.len() as u64;
        inner.records.push(AuditRecord {
            sequence,
            signal_id: signal_id.to_string(),
            entry,
        });
        let idx = inner.records.len() - 1;
        inner.by_signal.entry(signal_id.to_string()).or_default().push(idx);
        sequence
    }

    /// Entries for one signal, in append order.
    pub async fn trail(&self, signal_id: &str) -> Vec<AuditEntry> {
        let inner = self.inner.read().await;
        inner
            .by_signal
            .get(signal_id)
            .map(|idxs| idxs.iter().map(|&i| inner.records[i].entry.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.inner.read().await.records.clone()
    }
}
