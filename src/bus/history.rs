//! Bounded delivery history.
//!
//! A message is recorded when it is published and its entry is updated in
//! place when delivery finishes. The newest `max_history_size` records stay
//! in memory. Older records are moved to an archive (memory, or a JSONL file
//! when an archive directory is configured) instead of being dropped. Records
//! a failed file write could not persist are held in memory and written with
//! the next overflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use tracing::debug;

use super::message::{BusMessage, MessagePriority, MessageStatus};
use super::BusCategory;
use crate::utils::jsonl::JsonlFile;

/// State of one message, as kept in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub bus: BusCategory,
    pub publisher_vehicle: String,
    pub signal_id: String,
    pub signal_type: String,
    pub content_hash: String,
    pub priority: MessagePriority,
    pub status: MessageStatus,
    pub acknowledged_by: Vec<String>,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Set once the message reaches a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&BusMessage> for MessageRecord {
    fn from(message: &BusMessage) -> Self {
        let signal = message.signal();
        Self {
            message_id: message.message_id().to_string(),
            bus: message.bus(),
            publisher_vehicle: message.publisher_vehicle().to_string(),
            signal_id: signal.signal_id().to_string(),
            signal_type: signal.signal_type().to_string(),
            content_hash: signal.content_hash().to_hex(),
            priority: message.priority(),
            status: message.status(),
            acknowledged_by: message.acknowledged_by().iter().cloned().collect(),
            attempts: message.attempts(),
            enqueued_at: message.enqueued_at(),
            completed_at: message.status().is_terminal().then(Utc::now),
            last_error: message.last_error().map(str::to_string),
        }
    }
}

enum Archive {
    Memory(Vec<MessageRecord>),
    File {
        file: JsonlFile,
        unwritten: Vec<MessageRecord>,
    },
}

pub(crate) struct MessageHistory {
    hot: VecDeque<MessageRecord>,
    max: usize,
    archive: Archive,
    archived: usize,
}

impl MessageHistory {
    pub fn new(bus: BusCategory, max: usize, archive_dir: Option<&Path>) -> Self {
        let archive = match archive_dir {
            Some(dir) => Archive::File {
                file: JsonlFile::new(dir.join(format!("{}-history.jsonl", bus))),
                unwritten: Vec::new(),
            },
            None => Archive::Memory(Vec::new()),
        };
        Self {
            hot: VecDeque::new(),
            max,
            archive,
            archived: 0,
        }
    }

    /// Record a newly published message. A no-op if delivery already
    /// finished and recorded its outcome.
    pub async fn record_queued(&mut self, record: MessageRecord) -> io::Result<()> {
        if self.position(&record.message_id).is_some() {
            return Ok(());
        }
        self.push(record).await
    }

    /// Replace the message's entry with its final state, or append it if the
    /// entry has already moved to the archive.
    pub async fn complete(&mut self, record: MessageRecord) -> io::Result<()> {
        match self.position(&record.message_id) {
            Some(i) => {
                self.hot[i] = record;
                Ok(())
            }
            None => self.push(record).await,
        }
    }

    fn position(&self, message_id: &str) -> Option<usize> {
        self.hot.iter().rposition(|r| r.message_id == message_id)
    }

    /// Add a record, moving overflow to the archive. On a write error the
    /// overflow is still counted and readable; it stays in memory until a
    /// later write succeeds.
    async fn push(&mut self, record: MessageRecord) -> io::Result<()> {
        self.hot.push_back(record);
        let overflow = self.hot.len().saturating_sub(self.max);
        if overflow == 0 {
            return Ok(());
        }
        let spilled: Vec<MessageRecord> = self.hot.drain(..overflow).collect();
        self.archived += spilled.len();
        match &mut self.archive {
            Archive::Memory(records) => records.extend(spilled),
            Archive::File { file, unwritten } => {
                unwritten.extend(spilled);
                debug!("Archiving {} history records to {:?}", unwritten.len(), file.path());
                file.append(unwritten.as_slice()).await?;
                unwritten.clear();
            }
        }
        Ok(())
    }

    pub fn recent(&self) -> Vec<MessageRecord> {
        self.hot.iter().cloned().collect()
    }

    pub fn archived_count(&self) -> usize {
        self.archived
    }

    pub async fn archived(&self) -> io::Result<Vec<MessageRecord>> {
        match &self.archive {
            Archive::Memory(records) => Ok(records.clone()),
            Archive::File { file, unwritten } => {
                let mut records: Vec<MessageRecord> = file.read_all().await?;
                records.extend(unwritten.iter().cloned());
                Ok(records)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{
        IntegrityKind, Signal, SignalBody, SignalConfidence, SignalContext, SignalSource,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn record(n: u32) -> MessageRecord {
        let signal = Signal::new(
            SignalBody::integrity(IntegrityKind::EventPresence, json!({"n": n})),
            Some(SignalContext::new("document", "doc-1", "ingestion")),
            Some(SignalSource::new("evt-1", "document_loader")),
            SignalConfidence::High,
            "present",
        )
        .unwrap();
        let message = BusMessage::new(
            Arc::new(signal),
            "document_loader",
            BusCategory::Integrity,
            MessagePriority::Normal,
            Duration::from_secs(60),
        );
        MessageRecord::from(&message)
    }

    #[tokio::test]
    async fn test_overflow_is_archived_in_memory() -> io::Result<()> {
        let mut history = MessageHistory::new(BusCategory::Integrity, 2, None);
        for n in 0..5 {
            history.push(record(n)).await?;
        }
        assert_eq!(history.recent().len(), 2);
        assert_eq!(history.archived_count(), 3);
        assert_eq!(history.archived().await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_overflow_is_archived_to_file() -> io::Result<()> {
        let dir = tempdir()?;
        let mut history = MessageHistory::new(BusCategory::Integrity, 1, Some(dir.path()));
        let first = record(0);
        history.push(first.clone()).await?;
        history.push(record(1)).await?;

        let archived = history.archived().await?;
        assert_eq!(archived, vec![first]);
        assert!(dir.path().join("integrity-history.jsonl").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_completion_updates_entry_in_place() -> io::Result<()> {
        let mut history = MessageHistory::new(BusCategory::Integrity, 4, None);
        let queued = record(0);
        assert_eq!(queued.status, MessageStatus::Queued);
        assert!(queued.completed_at.is_none());
        history.record_queued(queued.clone()).await?;
        history.record_queued(record(1)).await?;

        let done = MessageRecord {
            status: MessageStatus::Delivered,
            attempts: 1,
            completed_at: Some(Utc::now()),
            ..queued.clone()
        };
        history.complete(done.clone()).await?;
        // A late enqueue record must not overwrite the outcome.
        history.record_queued(queued).await?;

        let recent = history.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], done);
        assert_eq!(recent[1].status, MessageStatus::Queued);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_archive_write_keeps_records() -> io::Result<()> {
        let dir = tempdir()?;
        // A regular file where the archive directory should be.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"")?;
        let mut history = MessageHistory::new(BusCategory::Integrity, 1, Some(blocker.as_path()));

        let records: Vec<MessageRecord> = (0..3).map(record).collect();
        assert!(history.push(records[0].clone()).await.is_ok());
        assert!(history.push(records[1].clone()).await.is_err());
        assert!(history.push(records[2].clone()).await.is_err());

        assert_eq!(history.recent(), vec![records[2].clone()]);
        assert_eq!(history.archived_count(), 2);
        assert_eq!(history.archived().await?, records[..2].to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn test_unwritten_records_flush_with_next_overflow() -> io::Result<()> {
        let dir = tempdir()?;
        let archive_dir = dir.path().join("history");
        std::fs::write(&archive_dir, b"")?;
        let mut history =
            MessageHistory::new(BusCategory::Integrity, 1, Some(archive_dir.as_path()));

        let records: Vec<MessageRecord> = (0..3).map(record).collect();
        history.push(records[0].clone()).await?;
        assert!(history.push(records[1].clone()).await.is_err());

        std::fs::remove_file(&archive_dir)?;
        history.push(records[2].clone()).await?;

        assert_eq!(history.archived_count(), 2);
        assert_eq!(history.archived().await?, records[..2].to_vec());
        assert!(archive_dir.join("integrity-history.jsonl").exists());
        Ok(())
    }
}
