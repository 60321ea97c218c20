use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use super::BusCategory;
use crate::signals::Signal;

/// Delivery priority. Higher values are delivered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MessagePriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Delivering,
    Delivered,
    Retrying,
    Expired,
    DeadLettered,
}

impl MessageStatus {
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Queued, Delivering)
                | (Delivering, Delivered)
                | (Delivering, Retrying)
                | (Delivering, Expired)
                | (Delivering, DeadLettered)
                | (Retrying, Delivering)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Delivered | MessageStatus::Expired | MessageStatus::DeadLettered
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Delivering => "delivering",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Retrying => "retrying",
            MessageStatus::Expired => "expired",
            MessageStatus::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One signal in flight on one bus.
///
/// The message is owned by whichever task is delivering it, so its
/// mutable bookkeeping needs no lock.
#[derive(Debug, Clone)]
pub struct BusMessage {
    message_id: String,
    signal: Arc<Signal>,
    publisher_vehicle: String,
    bus: BusCategory,
    priority: MessagePriority,
    status: MessageStatus,
    acknowledged_by: BTreeSet<String>,
    enqueued_at: DateTime<Utc>,
    enqueued_instant: Instant,
    ttl: Duration,
    attempts: u32,
    last_error: Option<String>,
}

impl BusMessage {
    pub fn new(
        signal: Arc<Signal>,
        publisher_vehicle: impl Into<String>,
        bus: BusCategory,
        priority: MessagePriority,
        ttl: Duration,
    ) -> Self {
        Self {
            message_id: format!("msg-{}", Uuid::new_v4()),
            signal,
            publisher_vehicle: publisher_vehicle.into(),
            bus,
            priority,
            status: MessageStatus::Queued,
            acknowledged_by: BTreeSet::new(),
            enqueued_at: Utc::now(),
            enqueued_instant: Instant::now(),
            ttl,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    pub fn publisher_vehicle(&self) -> &str {
        &self.publisher_vehicle
    }

    pub fn bus(&self) -> BusCategory {
        self.bus
    }

    pub fn priority(&self) -> MessagePriority {
        self.priority
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn acknowledged_by(&self) -> &BTreeSet<String> {
        &self.acknowledged_by
    }

    pub fn is_acknowledged_by(&self, consumer_id: &str) -> bool {
        self.acknowledged_by.contains(consumer_id)
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn age(&self) -> Duration {
        self.enqueued_instant.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.age() >= self.ttl
    }

    /// Record a consumer acknowledgement. Returns false if it was already recorded.
    pub fn acknowledge(&mut self, consumer_id: &str) -> bool {
        self.acknowledged_by.insert(consumer_id.to_string())
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(&mut self, next: MessageStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            warn!(
                "Message {} refused transition {} -> {}",
                self.message_id, self.status, next
            );
            false
        }
    }

    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn set_last_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}
