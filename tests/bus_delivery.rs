use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use sisas::bus::{BusMessage, BusRegistry, CircuitState, MessagePriority, MessageStatus, SignalBus};
use sisas::config::{BusConfig, SubstrateConfig};
use sisas::contracts::{
    ConsumptionContract, ContractRegistry, ContractStatus, IrrigationContract, PublicationContract,
    SignalHandler,
};
use sisas::error::HandlerError;
use sisas::signals::{
    AuditLog, EpistemicKind, Signal, SignalBody, SignalConfidence, SignalContext, SignalSource,
};
use sisas::BusCategory;

const PUBLISHER: &str = "evidence_extractor";

struct Recorder {
    calls: AtomicUsize,
    failing: AtomicBool,
    /// Fail only this many leading calls, when `failing` is false.
    fail_first: usize,
}

impl Recorder {
    fn healthy() -> Arc<Self> {
        Self::with(false, 0)
    }

    fn broken() -> Arc<Self> {
        Self::with(true, 0)
    }

    fn flaky(fail_first: usize) -> Arc<Self> {
        Self::with(false, fail_first)
    }

    fn with(failing: bool, fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(failing),
            fail_first,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalHandler for Recorder {
    async fn on_receive(&self, _signal: Arc<Signal>) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) || call < self.fail_first {
            return Err(HandlerError::new("consumer unavailable"));
        }
        Ok(())
    }
}

fn signal(n: i64) -> Arc<Signal> {
    Arc::new(
        Signal::new(
            SignalBody::epistemic(EpistemicKind::EmpiricalSupport, json!({"evidence_count": n})),
            Some(SignalContext::new("document", "plan.md", "extraction")),
            Some(SignalSource::new("evt-1", PUBLISHER)),
            SignalConfidence::High,
            "evidence found",
        )
        .unwrap(),
    )
}

fn publication() -> PublicationContract {
    PublicationContract::new("pub-evidence_extractor", PUBLISHER)
        .with_signal_types(["EmpiricalSupportSignal"])
        .with_buses([BusCategory::Epistemic])
}

fn consumer(id: &str, handler: Arc<Recorder>) -> Arc<ConsumptionContract> {
    Arc::new(
        ConsumptionContract::new(format!("con-{id}"), id)
            .with_buses([BusCategory::Epistemic])
            .with_handler(handler),
    )
}

fn epistemic_bus(config: BusConfig) -> SignalBus {
    SignalBus::new(BusCategory::Epistemic, config)
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_isolates_failing_consumer() {
    let bus = epistemic_bus(BusConfig {
        circuit_breaker_error_threshold: 2,
        circuit_breaker_cooldown: Duration::from_secs(30),
        retry_max_attempts: 0,
        ..BusConfig::default()
    });
    let healthy = Recorder::healthy();
    let broken = Recorder::broken();
    assert!(bus.subscribe(consumer("healthy", healthy.clone())).await);
    assert!(bus.subscribe(consumer("broken", broken.clone())).await);

    let contract = publication();
    for n in 0..4 {
        bus.publish(signal(n), PUBLISHER, &contract).await.unwrap();
    }
    assert_eq!(bus.dispatch_pending().await, 4);

    assert_eq!(healthy.calls(), 4);
    assert_eq!(broken.calls(), 2);
    assert_eq!(bus.circuit_state("broken").await, Some(CircuitState::Open));
    assert_eq!(bus.circuit_state("healthy").await, Some(CircuitState::Closed));

    let stats = bus.get_stats().await;
    assert_eq!(stats.delivered, 4);
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.dead_lettered, 2);
    assert_eq!(stats.circuit_skips, 2);

    // After the cooldown one trial delivery goes through and closes the circuit.
    tokio::time::advance(Duration::from_secs(31)).await;
    broken.failing.store(false, Ordering::SeqCst);
    bus.publish(signal(10), PUBLISHER, &contract).await.unwrap();
    bus.dispatch_pending().await;

    assert_eq!(broken.calls(), 3);
    assert_eq!(healthy.calls(), 5);
    assert_eq!(bus.circuit_state("broken").await, Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_retries_then_dead_letters() {
    let bus = epistemic_bus(BusConfig {
        retry_max_attempts: 2,
        retry_backoff_base: Duration::from_millis(100),
        circuit_breaker_error_threshold: 10,
        ..BusConfig::default()
    });
    let broken = Recorder::broken();
    bus.subscribe(consumer("broken", broken.clone())).await;
    assert_ok!(bus.publish(signal(1), PUBLISHER, &publication()).await);

    let started = tokio::time::Instant::now();
    bus.dispatch_pending().await;
    // 100ms + 200ms of backoff between the three attempts
    assert!(started.elapsed() >= Duration::from_millis(300));

    assert_eq!(broken.calls(), 3);
    let stats = bus.get_stats().await;
    assert_eq!(stats.errors, 3);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.delivered, 0);

    let dead = bus.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].failed_consumers, vec!["broken".to_string()]);
    assert_eq!(dead[0].record.attempts, 3);
    assert_eq!(dead[0].record.status, MessageStatus::DeadLettered);
    assert!(dead[0].last_error.contains("consumer unavailable"));

    assert_eq!(bus.take_dead_letters().await.len(), 1);
    assert!(bus.dead_letters().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opening_mid_retry_still_dead_letters() {
    let bus = epistemic_bus(BusConfig {
        circuit_breaker_error_threshold: 2,
        retry_max_attempts: 3,
        retry_backoff_base: Duration::from_millis(100),
        ..BusConfig::default()
    });
    let broken = Recorder::broken();
    bus.subscribe(consumer("broken", broken.clone())).await;
    let message_id = bus.publish(signal(1), PUBLISHER, &publication()).await.unwrap();
    bus.dispatch_pending().await;

    // Two real failures open the circuit; the remaining attempts are skips.
    assert_eq!(broken.calls(), 2);
    assert_eq!(bus.circuit_state("broken").await, Some(CircuitState::Open));

    let stats = bus.get_stats().await;
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.circuit_skips, 2);
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.dead_lettered, 1);

    let dead = bus.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].record.message_id, message_id);
    assert_eq!(dead[0].record.attempts, 4);
    assert_eq!(dead[0].failed_consumers, vec!["broken".to_string()]);
    assert!(dead[0].last_error.contains("circuit open"));

    let history = bus.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, MessageStatus::DeadLettered);
    assert!(history[0].acknowledged_by.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_only_reaches_consumers_that_failed() {
    let bus = epistemic_bus(BusConfig {
        retry_max_attempts: 3,
        ..BusConfig::default()
    });
    let healthy = Recorder::healthy();
    let flaky = Recorder::flaky(1);
    bus.subscribe(consumer("healthy", healthy.clone())).await;
    bus.subscribe(consumer("flaky", flaky.clone())).await;
    bus.publish(signal(1), PUBLISHER, &publication()).await.unwrap();
    bus.dispatch_pending().await;

    assert_eq!(healthy.calls(), 1);
    assert_eq!(flaky.calls(), 2);
    let stats = bus.get_stats().await;
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.dead_lettered, 0);

    let history = bus.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, MessageStatus::Delivered);
    assert_eq!(history[0].attempts, 2);
    assert_eq!(history[0].acknowledged_by, vec!["flaky".to_string(), "healthy".to_string()]);
}

struct Stalled {
    calls: AtomicUsize,
}

#[async_trait]
impl SignalHandler for Stalled {
    async fn on_receive(&self, _signal: Arc<Signal>) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_callback_timeout_counts_against_circuit() {
    let bus = epistemic_bus(BusConfig {
        callback_timeout: Duration::from_secs(1),
        circuit_breaker_error_threshold: 2,
        retry_max_attempts: 0,
        ..BusConfig::default()
    });
    let healthy = Recorder::healthy();
    let stalled = Arc::new(Stalled {
        calls: AtomicUsize::new(0),
    });
    bus.subscribe(consumer("healthy", healthy.clone())).await;
    bus.subscribe(Arc::new(
        ConsumptionContract::new("con-stalled", "stalled")
            .with_buses([BusCategory::Epistemic])
            .with_handler(stalled.clone()),
    ))
    .await;

    let contract = publication();
    for n in 0..3 {
        assert_ok!(bus.publish(signal(n), PUBLISHER, &contract).await);
    }
    let started = tokio::time::Instant::now();
    assert_eq!(bus.dispatch_pending().await, 3);

    // Each stalled call is abandoned at the timeout, not after 60s.
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(stalled.calls.load(Ordering::SeqCst), 2);
    assert_eq!(healthy.calls(), 3);
    assert_eq!(bus.circuit_state("stalled").await, Some(CircuitState::Open));

    let stats = bus.get_stats().await;
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.dead_lettered, 2);
    assert_eq!(stats.circuit_skips, 1);

    let dead = bus.dead_letters().await;
    assert!(dead.iter().all(|d| d.last_error.contains("timed out")));
    assert!(dead.iter().all(|d| d.failed_consumers == vec!["stalled".to_string()]));
}

#[tokio::test]
async fn test_history_survives_unwritable_archive() {
    let dir = tempfile::tempdir().unwrap();
    let not_a_dir = dir.path().join("archive");
    std::fs::write(&not_a_dir, b"").unwrap();
    let bus = epistemic_bus(BusConfig {
        max_history_size: 1,
        history_archive_dir: Some(not_a_dir),
        ..BusConfig::default()
    });

    let contract = publication();
    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(bus.publish(signal(n), PUBLISHER, &contract).await.unwrap());
    }
    bus.dispatch_pending().await;

    let recent = bus.history().await;
    let archived = assert_ok!(bus.archived_history().await);
    assert_eq!(recent.len(), 1);
    assert_eq!(archived.len(), bus.archived_history_count().await);

    for id in &ids {
        let outcome = recent
            .iter()
            .chain(archived.iter())
            .find(|r| &r.message_id == id && r.status == MessageStatus::Delivered);
        assert!(outcome.is_some(), "no delivered record for {id}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_expired_messages_are_dropped_and_counted() {
    let bus = epistemic_bus(BusConfig {
        message_ttl: Duration::from_secs(1),
        ..BusConfig::default()
    });
    let healthy = Recorder::healthy();
    bus.subscribe(consumer("healthy", healthy.clone())).await;
    assert_ok!(bus.publish(signal(1), PUBLISHER, &publication()).await);

    tokio::time::advance(Duration::from_secs(2)).await;
    bus.dispatch_pending().await;

    assert_eq!(healthy.calls(), 0);
    let stats = bus.get_stats().await;
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(bus.history().await[0].status, MessageStatus::Expired);
}

#[tokio::test]
async fn test_subscription_is_idempotent() {
    let bus = epistemic_bus(BusConfig::default());
    let healthy = Recorder::healthy();
    assert!(bus.subscribe(consumer("healthy", healthy.clone())).await);
    assert!(!bus.subscribe(consumer("healthy", healthy)).await);
    assert_eq!(bus.subscriber_ids().await, vec!["healthy".to_string()]);

    assert!(!bus.unsubscribe("nobody").await);
    assert!(bus.unsubscribe("healthy").await);
    assert!(!bus.unsubscribe("healthy").await);
}

#[tokio::test]
async fn test_subscribe_requires_bus_in_contract() {
    let bus = SignalBus::new(BusCategory::Structural, BusConfig::default());
    assert!(!bus.subscribe(consumer("healthy", Recorder::healthy())).await);
    // The epistemic-only publication contract cannot target this bus either.
    assert_err!(bus.publish(signal(1), PUBLISHER, &publication()).await);
}

#[test]
fn test_repeated_acknowledgement_leaves_one_entry() {
    let mut message = BusMessage::new(
        signal(1),
        PUBLISHER,
        BusCategory::Epistemic,
        MessagePriority::Normal,
        Duration::from_secs(60),
    );
    assert!(message.acknowledge("quality_metrics"));
    assert!(!message.acknowledge("quality_metrics"));
    assert_eq!(message.acknowledged_by().len(), 1);
}

#[tokio::test]
async fn test_blocked_irrigation_holds_delivery() {
    let contracts = Arc::new(ContractRegistry::new());
    let registry = BusRegistry::from_config(
        &SubstrateConfig::default(),
        contracts.clone(),
        Arc::new(AuditLog::new()),
    );
    contracts
        .register_irrigation(
            IrrigationContract::new("irr-1", "plan.md", "irrigated")
                .with_required_vehicles([PUBLISHER]),
        )
        .await
        .unwrap();

    let irrigated = Recorder::healthy();
    registry.subscribe(consumer("irrigated", irrigated.clone())).await;
    let bus = registry.get_bus(BusCategory::Epistemic);

    registry
        .publish_to_appropriate_bus(signal(1), PUBLISHER, &publication())
        .await
        .unwrap();
    registry.dispatch_all().await;
    assert_eq!(irrigated.calls(), 0);
    assert_eq!(bus.get_stats().await.irrigation_blocked, 1);

    contracts
        .update_irrigation("irr-1", |c| {
            c.with_vehicle_available(PUBLISHER).with_upstream_complete()
        })
        .await
        .unwrap();
    registry
        .publish_to_appropriate_bus(signal(2), PUBLISHER, &publication())
        .await
        .unwrap();
    registry.dispatch_all().await;
    assert_eq!(irrigated.calls(), 1);
    assert_eq!(bus.get_stats().await.delivered, 1);
}

#[tokio::test]
async fn test_suspended_consumer_is_skipped() {
    let contracts = Arc::new(ContractRegistry::new());
    let registry = BusRegistry::from_config(
        &SubstrateConfig::default(),
        contracts.clone(),
        Arc::new(AuditLog::new()),
    );
    let handler = Recorder::healthy();
    let contract = ConsumptionContract::new("con-watcher", "watcher")
        .with_buses([BusCategory::Epistemic])
        .with_handler(handler.clone());
    contracts.register_consumption(contract).await.unwrap();
    let registered = contracts.get_consumption("con-watcher").await.unwrap();
    registry.subscribe(registered).await;

    contracts.set_status("con-watcher", ContractStatus::Suspended).await.unwrap();
    registry
        .publish_to_appropriate_bus(signal(1), PUBLISHER, &publication())
        .await
        .unwrap();
    registry.dispatch_all().await;
    assert_eq!(handler.calls(), 0);

    contracts.set_status("con-watcher", ContractStatus::Active).await.unwrap();
    registry
        .publish_to_appropriate_bus(signal(2), PUBLISHER, &publication())
        .await
        .unwrap();
    registry.dispatch_all().await;
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_dispatcher_start_and_shutdown() {
    let bus = Arc::new(epistemic_bus(BusConfig::default()));
    let healthy = Recorder::healthy();
    bus.subscribe(consumer("healthy", healthy.clone())).await;

    assert!(bus.start().await);
    assert!(!bus.start().await);
    assert!(bus.is_running().await);

    let contract = publication();
    for n in 0..5 {
        bus.publish(signal(n), PUBLISHER, &contract).await.unwrap();
    }
    for _ in 0..200 {
        if healthy.calls() == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(healthy.calls(), 5);

    assert!(bus.shutdown().await);
    assert!(!bus.shutdown().await);
    assert!(!bus.is_running().await);
    assert_eq!(bus.get_stats().await.delivered, 5);
}
