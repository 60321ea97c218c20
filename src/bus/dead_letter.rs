use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::history::MessageRecord;
use crate::signals::Signal;

/// A message whose retries were exhausted for at least one consumer.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub record: MessageRecord,
    #[serde(skip)]
    pub signal: Arc<Signal>,
    /// Consumers that never acknowledged.
    pub failed_consumers: Vec<String>,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        record: MessageRecord,
        signal: Arc<Signal>,
        failed_consumers: Vec<String>,
        last_error: String,
    ) -> Self {
        Self {
            record,
            signal,
            failed_consumers,
            last_error,
            dead_lettered_at: Utc::now(),
        }
    }
}
