//! A single signal bus.
//!
//! Publish path: contract check, capacity check, back-pressure, optional
//! dedup, then a priority enqueue. All of it happens under the queue lock and
//! returns immediately; nothing here waits for room. The queued message is
//! then entered in history.
//!
//! Delivery path: a message is owned by one task from dequeue to its terminal
//! state. Consumer callbacks, retry backoff and history writes all happen
//! with the queue lock released.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::circuit::{CircuitBreaker, CircuitState};
use super::dead_letter::DeadLetter;
use super::history::{MessageHistory, MessageRecord};
use super::message::{BusMessage, MessagePriority, MessageStatus};
use super::stats::{BusStats, BusStatsSnapshot};
use super::BusCategory;
use crate::config::BusConfig;
use crate::contracts::{ConsumptionContract, ContractRegistry, ContractStatus, PublicationContract};
use crate::error::{HandlerError, PublishRejection};
use crate::signals::{AuditEntry, AuditLog, ContentHash, Signal};

struct Queued {
    priority: MessagePriority,
    sequence: u64,
    message: BusMessage,
}

// Max-heap: higher priority first, then lower sequence (earlier arrival).
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for Queued {}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Queued>,
    backpressure: bool,
    recent_hashes: HashSet<ContentHash>,
    hash_order: VecDeque<ContentHash>,
}

impl QueueState {
    /// Returns false if `hash` is already within the dedup window.
    fn remember(&mut self, hash: ContentHash, window: usize) -> bool {
        if !self.recent_hashes.insert(hash) {
            return false;
        }
        self.hash_order.push_back(hash);
        while self.hash_order.len() > window.max(1) {
            if let Some(old) = self.hash_order.pop_front() {
                self.recent_hashes.remove(&old);
            }
        }
        true
    }
}

struct Dispatcher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SignalBus {
    category: BusCategory,
    config: BusConfig,
    high_water: usize,
    low_water: usize,
    queue: Mutex<QueueState>,
    wakeup: Notify,
    subscribers: RwLock<BTreeMap<String, Arc<ConsumptionContract>>>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    history: Mutex<MessageHistory>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    stats: BusStats,
    sequence: AtomicU64,
    gate: Option<Arc<ContractRegistry>>,
    audit: Option<Arc<AuditLog>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl SignalBus {
    pub fn new(category: BusCategory, config: BusConfig) -> Self {
        let history = MessageHistory::new(
            category,
            config.max_history_size,
            config.history_archive_dir.as_deref(),
        );
        Self {
            category,
            high_water: config.high_water_mark(),
            low_water: config.low_water_mark(),
            config,
            queue: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            subscribers: RwLock::new(BTreeMap::new()),
            breakers: Mutex::new(HashMap::new()),
            history: Mutex::new(history),
            dead_letters: Mutex::new(Vec::new()),
            stats: BusStats::default(),
            sequence: AtomicU64::new(0),
            gate: None,
            audit: None,
            dispatcher: Mutex::new(None),
        }
    }

    /// Hold deliveries back while the registry reports blocking irrigation gaps
    /// or a suspended consumption contract.
    pub fn with_gate(mut self, registry: Arc<ContractRegistry>) -> Self {
        self.gate = Some(registry);
        self
    }

    /// Record every acknowledgement in `audit`.
    pub fn with_audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn category(&self) -> BusCategory {
        self.category
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub async fn publish(
        &self,
        signal: Arc<Signal>,
        publisher_vehicle: &str,
        contract: &PublicationContract,
    ) -> Result<String, PublishRejection> {
        self.publish_with_priority(signal, publisher_vehicle, contract, MessagePriority::Normal)
            .await
    }

    pub async fn publish_with_priority(
        &self,
        signal: Arc<Signal>,
        publisher_vehicle: &str,
        contract: &PublicationContract,
        priority: MessagePriority,
    ) -> Result<String, PublishRejection> {
        let mut errors = Vec::new();
        if contract.publisher_vehicle() != publisher_vehicle {
            errors.push(format!(
                "contract '{}' belongs to '{}', not '{}'",
                contract.contract_id(),
                contract.publisher_vehicle(),
                publisher_vehicle
            ));
        }
        if let Err(mut contract_errors) = contract.validate_signal(&signal, self.category) {
            errors.append(&mut contract_errors);
        }
        if !errors.is_empty() {
            return Err(self.reject(PublishRejection::ContractViolation { errors }));
        }

        let hash = signal.content_hash();
        let message = BusMessage::new(
            signal,
            publisher_vehicle,
            self.category,
            priority,
            self.config.message_ttl,
        );
        let message_id = message.message_id().to_string();
        let record = MessageRecord::from(&message);

        {
            let mut queue = self.queue.lock().await;
            let depth = queue.heap.len();
            if depth >= self.config.max_queue_size {
                return Err(self.reject(PublishRejection::QueueFull {
                    bus: self.category,
                    capacity: self.config.max_queue_size,
                }));
            }
            if queue.backpressure {
                if depth < self.low_water {
                    queue.backpressure = false;
                    info!("{} bus back-pressure released at depth {}", self.category, depth);
                } else {
                    return Err(self.reject(PublishRejection::Backpressure {
                        bus: self.category,
                        depth,
                        low_water: self.low_water,
                    }));
                }
            }
            if self.config.deduplicate && !queue.remember(hash, self.config.max_history_size) {
                BusStats::incr(&self.stats.duplicates);
                return Err(self.reject(PublishRejection::Duplicate {
                    bus: self.category,
                    content_hash: hash.to_hex(),
                }));
            }

            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            queue.heap.push(Queued {
                priority,
                sequence,
                message,
            });
            if !queue.backpressure && queue.heap.len() >= self.high_water {
                queue.backpressure = true;
                BusStats::incr(&self.stats.backpressure_activations);
                warn!(
                    "{} bus back-pressure engaged at depth {} (high water {})",
                    self.category,
                    queue.heap.len(),
                    self.high_water
                );
            }
        }

        BusStats::incr(&self.stats.published);
        self.wakeup.notify_one();
        if let Err(e) = self.history.lock().await.record_queued(record).await {
            warn!("{} bus could not archive history: {}", self.category, e);
        }
        debug!(
            "{} bus queued {} from {} ({:?})",
            self.category, message_id, publisher_vehicle, priority
        );
        Ok(message_id)
    }

    fn reject(&self, rejection: PublishRejection) -> PublishRejection {
        BusStats::incr(&self.stats.rejected);
        warn!("{} bus rejected publish: {}", self.category, rejection);
        rejection
    }

    /// Add a subscriber. Returns false if the consumer is already subscribed
    /// or its contract does not list this bus.
    pub async fn subscribe(&self, contract: Arc<ConsumptionContract>) -> bool {
        if !contract.subscribed_buses().contains(&self.category) {
            warn!(
                "Consumer {} tried to subscribe to {} without listing it",
                contract.consumer_id(),
                self.category
            );
            return false;
        }
        let mut subscribers = self.subscribers.write().await;
        if subscribers.contains_key(contract.consumer_id()) {
            return false;
        }
        info!("{} bus: {} subscribed", self.category, contract.consumer_id());
        subscribers.insert(contract.consumer_id().to_string(), contract);
        true
    }

    /// Returns false for an unknown consumer.
    pub async fn unsubscribe(&self, consumer_id: &str) -> bool {
        let removed = self.subscribers.write().await.remove(consumer_id).is_some();
        if removed {
            self.breakers.lock().await.remove(consumer_id);
            info!("{} bus: {} unsubscribed", self.category, consumer_id);
        }
        removed
    }

    pub async fn subscriber_ids(&self) -> Vec<String> {
        self.subscribers.read().await.keys().cloned().collect()
    }

    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.heap.len()
    }

    pub async fn is_backpressure_active(&self) -> bool {
        self.queue.lock().await.backpressure
    }

    pub async fn circuit_state(&self, consumer_id: &str) -> Option<CircuitState> {
        self.breakers.lock().await.get(consumer_id).map(|b| b.state())
    }

    async fn pop(&self) -> Option<BusMessage> {
        let mut queue = self.queue.lock().await;
        let next = queue.heap.pop()?.message;
        if queue.backpressure && queue.heap.len() < self.low_water {
            queue.backpressure = false;
            info!("{} bus back-pressure released at depth {}", self.category, queue.heap.len());
        }
        Some(next)
    }

    /// Deliver every queued message in priority order on the calling task.
    pub async fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        while let Some(message) = self.pop().await {
            self.deliver(message).await;
            delivered += 1;
        }
        delivered
    }

    /// Spawn the dispatcher. Each dequeued message gets its own delivery task,
    /// bounded by `max_concurrent_deliveries`. Returns false if already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut slot = self.dispatcher.lock().await;
        if slot.is_some() {
            return false;
        }
        let (shutdown, rx) = watch::channel(false);
        let bus = Arc::clone(self);
        let handle = tokio::spawn(bus.run_dispatcher(rx));
        *slot = Some(Dispatcher { shutdown, handle });
        info!("{} bus dispatcher started", self.category);
        true
    }

    pub async fn is_running(&self) -> bool {
        self.dispatcher.lock().await.is_some()
    }

    /// Stop the dispatcher and wait for in-flight deliveries.
    /// Messages still queued stay queued.
    pub async fn shutdown(&self) -> bool {
        let Some(dispatcher) = self.dispatcher.lock().await.take() else {
            return false;
        };
        let _ = dispatcher.shutdown.send(true);
        if let Err(e) = dispatcher.handle.await {
            error!("{} bus dispatcher task failed: {}", self.category, e);
        }
        info!("{} bus dispatcher stopped", self.category);
        true
    }

    async fn run_dispatcher(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_deliveries));
        let mut in_flight = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }
            while in_flight.try_join_next().is_some() {}

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            match self.pop().await {
                Some(message) => {
                    let bus = Arc::clone(&self);
                    in_flight.spawn(async move {
                        bus.deliver(message).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        debug!("{} bus dispatcher drained", self.category);
    }

    async fn deliver(&self, mut message: BusMessage) {
        let signal = Arc::clone(message.signal());
        let mut pending: Vec<Arc<ConsumptionContract>> = self
            .subscribers
            .read()
            .await
            .values()
            .filter(|c| c.matches_signal(&signal))
            .cloned()
            .collect();

        message.transition(MessageStatus::Delivering);
        loop {
            if message.is_expired() {
                message.transition(MessageStatus::Expired);
                BusStats::incr(&self.stats.expired);
                warn!(
                    "{} bus dropped expired message {} after {:?}",
                    self.category,
                    message.message_id(),
                    message.age()
                );
                break;
            }

            let attempt = message.begin_attempt();
            // Consumers skipped on a retry still owe an acknowledgement.
            let retrying = attempt > 1;
            let mut failed = Vec::new();
            for consumer in pending {
                let consumer_id = consumer.consumer_id();
                if message.is_acknowledged_by(consumer_id) {
                    continue;
                }
                if self.delivery_held(&consumer, &signal).await {
                    if retrying {
                        message.set_last_error(format!("{consumer_id}: delivery held"));
                        failed.push(consumer);
                    }
                    continue;
                }
                if !self.breaker_allows(consumer_id).await {
                    BusStats::incr(&self.stats.circuit_skips);
                    debug!("{} bus skipped {}: circuit open", self.category, consumer_id);
                    if retrying {
                        message.set_last_error(format!("{consumer_id}: circuit open"));
                        failed.push(consumer);
                    }
                    continue;
                }

                match self.invoke(&consumer, &signal).await {
                    Ok(()) => {
                        self.record_outcome(consumer_id, true).await;
                        if message.acknowledge(consumer_id) {
                            BusStats::incr(&self.stats.delivered);
                            if let Some(audit) = &self.audit {
                                let entry =
                                    AuditEntry::new(format!("{}_bus", self.category), "delivered")
                                        .with_detail(consumer_id);
                                audit.append(signal.signal_id(), entry).await;
                            }
                        }
                        if let Some(handler) = consumer.handler() {
                            handler.on_complete(&signal).await;
                        }
                    }
                    Err(e) => {
                        self.record_outcome(consumer_id, false).await;
                        BusStats::incr(&self.stats.errors);
                        warn!(
                            "{} bus delivery of {} to {} failed (attempt {}): {}",
                            self.category,
                            message.message_id(),
                            consumer_id,
                            attempt,
                            e
                        );
                        if let Some(handler) = consumer.handler() {
                            handler.on_error(&signal, &e).await;
                        }
                        message.set_last_error(format!("{consumer_id}: {e}"));
                        failed.push(consumer);
                    }
                }
            }

            if failed.is_empty() {
                message.transition(MessageStatus::Delivered);
                break;
            }
            if attempt > self.config.retry_max_attempts {
                message.transition(MessageStatus::DeadLettered);
                BusStats::incr(&self.stats.dead_lettered);
                let failed_consumers: Vec<String> =
                    failed.iter().map(|c| c.consumer_id().to_string()).collect();
                error!(
                    "{} bus dead-lettered {} after {} attempts (consumers: {})",
                    self.category,
                    message.message_id(),
                    attempt,
                    failed_consumers.join(", ")
                );
                let last_error = message.last_error().unwrap_or_default().to_string();
                self.dead_letters.lock().await.push(DeadLetter::new(
                    MessageRecord::from(&message),
                    Arc::clone(&signal),
                    failed_consumers,
                    last_error,
                ));
                break;
            }

            message.transition(MessageStatus::Retrying);
            BusStats::incr(&self.stats.retries);
            let backoff = self.config.backoff_for(attempt);
            debug!(
                "{} bus retrying {} in {:?} for {} consumer(s)",
                self.category,
                message.message_id(),
                backoff,
                failed.len()
            );
            sleep(backoff).await;
            message.transition(MessageStatus::Delivering);
            pending = failed;
        }

        let record = MessageRecord::from(&message);
        if let Err(e) = self.history.lock().await.complete(record).await {
            warn!("{} bus could not archive history: {}", self.category, e);
        }
    }

    /// True when the contract registry says this consumer must not receive `signal` yet.
    async fn delivery_held(&self, consumer: &ConsumptionContract, signal: &Signal) -> bool {
        let Some(registry) = &self.gate else {
            return false;
        };
        if let Some(status) = registry.status(consumer.contract_id()).await {
            if status != ContractStatus::Active {
                debug!(
                    "{} bus skipped {}: consumption contract is {}",
                    self.category,
                    consumer.consumer_id(),
                    status
                );
                return true;
            }
        }
        match registry.irrigation_blocks(consumer.consumer_id(), signal).await {
            Some(reasons) => {
                BusStats::incr(&self.stats.irrigation_blocked);
                debug!(
                    "{} bus held {} for {}: {}",
                    self.category,
                    signal.signal_id(),
                    consumer.consumer_id(),
                    reasons.join("; ")
                );
                true
            }
            None => false,
        }
    }

    async fn invoke(
        &self,
        consumer: &ConsumptionContract,
        signal: &Arc<Signal>,
    ) -> Result<(), HandlerError> {
        let Some(handler) = consumer.handler() else {
            return Ok(());
        };
        match timeout(self.config.callback_timeout, handler.on_receive(Arc::clone(signal))).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::new(format!(
                "callback timed out after {:?}",
                self.config.callback_timeout
            ))),
        }
    }

    async fn breaker_allows(&self, consumer_id: &str) -> bool {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(consumer_id.to_string())
            .or_insert_with(|| {
                CircuitBreaker::new(
                    self.config.circuit_breaker_error_threshold,
                    self.config.circuit_breaker_window,
                    self.config.circuit_breaker_cooldown,
                )
            })
            .allow_request()
    }

    async fn record_outcome(&self, consumer_id: &str, success: bool) {
        let mut breakers = self.breakers.lock().await;
        if let Some(breaker) = breakers.get_mut(consumer_id) {
            let before = breaker.state();
            if success {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
            let after = breaker.state();
            if before != after {
                info!(
                    "{} bus circuit for {}: {:?} -> {:?}",
                    self.category, consumer_id, before, after
                );
            }
        }
    }

    pub async fn get_stats(&self) -> BusStatsSnapshot {
        let (queue_size, backpressure) = {
            let queue = self.queue.lock().await;
            (queue.heap.len(), queue.backpressure)
        };
        let subscriber_count = self.subscribers.read().await.len();
        self.stats.snapshot(queue_size, subscriber_count, backpressure)
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    pub async fn take_dead_letters(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.dead_letters.lock().await)
    }

    /// Most recent outcomes, oldest first.
    pub async fn history(&self) -> Vec<MessageRecord> {
        self.history.lock().await.recent()
    }

    pub async fn archived_history(&self) -> io::Result<Vec<MessageRecord>> {
        self.history.lock().await.archived().await
    }

    pub async fn archived_history_count(&self) -> usize {
        self.history.lock().await.archived_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::SignalHandler;
    use async_trait::async_trait;
    use crate::signals::{ContrastKind, SignalBody, SignalConfidence, SignalContext, SignalSource};
    use serde_json::json;

    fn signal(n: i64) -> Arc<Signal> {
        Arc::new(
            Signal::new(
                SignalBody::contrast(ContrastKind::DecisionDivergence, json!({"delta": n})),
                Some(SignalContext::new("question", "Q001", "analysis")),
                Some(SignalSource::new("evt-1", "quality_metrics")),
                SignalConfidence::Medium,
                "divergence",
            )
            .unwrap(),
        )
    }

    fn contract() -> PublicationContract {
        PublicationContract::new("pub-q", "quality_metrics")
            .with_signal_types(["DecisionDivergenceSignal"])
            .with_buses([BusCategory::Contrast])
    }

    fn bus(max_queue_size: usize) -> SignalBus {
        SignalBus::new(
            BusCategory::Contrast,
            BusConfig {
                max_queue_size,
                ..BusConfig::default()
            },
        )
    }

    #[derive(Default)]
    struct ArrivalLog {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SignalHandler for ArrivalLog {
        async fn on_receive(&self, signal: Arc<Signal>) -> Result<(), HandlerError> {
            self.seen.lock().await.push(signal.signal_id().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_priority_then_arrival_order() {
        let bus = bus(100);
        let c = contract();
        let log = Arc::new(ArrivalLog::default());
        assert!(
            bus.subscribe(Arc::new(
                ConsumptionContract::new("con-log", "arrival_log")
                    .with_buses([BusCategory::Contrast])
                    .with_handler(log.clone()),
            ))
            .await
        );
        let low = bus
            .publish_with_priority(signal(1), "quality_metrics", &c, MessagePriority::Low)
            .await
            .unwrap();
        let first_normal = bus.publish(signal(2), "quality_metrics", &c).await.unwrap();
        let critical = bus
            .publish_with_priority(signal(3), "quality_metrics", &c, MessagePriority::Critical)
            .await
            .unwrap();
        let second_normal = bus.publish(signal(4), "quality_metrics", &c).await.unwrap();

        let queued: Vec<(String, MessageStatus)> =
            bus.history().await.into_iter().map(|r| (r.message_id, r.status)).collect();
        assert_eq!(
            queued,
            vec![
                (low.clone(), MessageStatus::Queued),
                (first_normal.clone(), MessageStatus::Queued),
                (critical.clone(), MessageStatus::Queued),
                (second_normal.clone(), MessageStatus::Queued),
            ]
        );

        assert_eq!(bus.dispatch_pending().await, 4);
        let finished = bus.history().await;
        assert!(finished.iter().all(|r| r.status == MessageStatus::Delivered));
        let signal_of = |id: &str| {
            finished
                .iter()
                .find(|r| r.message_id == id)
                .map(|r| r.signal_id.clone())
                .unwrap()
        };
        let expected: Vec<String> = [critical, first_normal, second_normal, low]
            .iter()
            .map(|id| signal_of(id.as_str()))
            .collect();
        assert_eq!(*log.seen.lock().await, expected);
    }

    #[tokio::test]
    async fn test_backpressure_engages_once_and_releases() {
        // max 10 -> high water 9, low water 5
        let bus = bus(10);
        let c = contract();
        let mut rejected = 0;
        for n in 0..12 {
            if bus.publish(signal(n), "quality_metrics", &c).await.is_err() {
                rejected += 1;
            }
        }
        let stats = bus.get_stats().await;
        assert_eq!(stats.queue_size, 9);
        assert_eq!(rejected, 3);
        assert_eq!(stats.rejected, 3);
        assert_eq!(stats.backpressure_activations, 1);
        assert!(stats.backpressure_active);

        bus.dispatch_pending().await;
        assert!(!bus.is_backpressure_active().await);
        assert!(bus.publish(signal(99), "quality_metrics", &c).await.is_ok());
    }

    #[tokio::test]
    async fn test_publisher_must_hold_contract() {
        let bus = bus(10);
        let err = bus.publish(signal(1), "impostor", &contract()).await.unwrap_err();
        assert!(matches!(err, PublishRejection::ContractViolation { .. }));
        assert_eq!(bus.get_stats().await.rejected, 1);
    }

    #[tokio::test]
    async fn test_dedup_rejects_same_content() {
        let bus = SignalBus::new(
            BusCategory::Contrast,
            BusConfig {
                deduplicate: true,
                ..BusConfig::default()
            },
        );
        let c = contract();
        bus.publish(signal(1), "quality_metrics", &c).await.unwrap();
        let err = bus.publish(signal(1), "quality_metrics", &c).await.unwrap_err();
        assert!(matches!(err, PublishRejection::Duplicate { .. }));
        let stats = bus.get_stats().await;
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.published, 1);
    }
}
