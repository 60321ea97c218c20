use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;

use sisas::bus::SignalBus;
use sisas::config::BusConfig;
use sisas::contracts::PublicationContract;
use sisas::error::{ConstructionError, PublishRejection};
use sisas::events::{Event, EventLog, EventType};
use sisas::signals::{
    Signal, SignalBody, SignalConfidence, SignalContext, SignalSource, StructuralKind,
};
use sisas::BusCategory;

fn alignment(n: u64) -> Signal {
    Signal::new(
        SignalBody::structural(StructuralKind::StructuralAlignment, json!({"alignment": n})),
        Some(SignalContext::new("document", "plan.md", "scoping")),
        Some(SignalSource::new("evt-1", "context_scoper")),
        SignalConfidence::Medium,
        "sections checked",
    )
    .unwrap()
}

#[tokio::test]
async fn test_event_count_never_decreases() {
    let log = EventLog::in_memory();
    let mut last = 0;
    let mut ids = Vec::new();

    for round in 0..5 {
        for n in 0..20 {
            let event = Event::new(
                EventType::ChunkCreated,
                "context_scoper",
                json!({"round": round, "n": n}),
            );
            ids.push(log.append(event).await);
            assert!(log.count().await >= last);
            last = log.count().await;
        }
        for id in ids.iter().step_by(3) {
            // Archived ids report false rather than failing.
            log.mark_processed(id).await.unwrap();
        }
        log.add_error(&ids[ids.len() - 1], "late chunk").await.unwrap();
        log.archive_processed_before(Utc::now() + ChronoDuration::seconds(1))
            .await
            .unwrap();

        let count = log.count().await;
        assert!(count >= last);
        last = count;
        assert!(log.active_count().await <= count);
    }

    assert_eq!(log.count().await, 100);
    let counts = log.counts().await;
    assert_eq!(counts.total, counts.active + counts.archived);
    assert_eq!(counts.unprocessed, counts.active);
}

#[test]
fn test_missing_context_or_source_always_fails() {
    let body = || SignalBody::structural(StructuralKind::SchemaConflict, json!({}));
    let ctx = || Some(SignalContext::new("document", "plan.md", "scoping"));
    let src = || Some(SignalSource::new("evt-1", "context_scoper"));

    for confidence in SignalConfidence::ALL {
        assert!(matches!(
            Signal::new(body(), None, src(), confidence, "r"),
            Err(ConstructionError::MissingContext)
        ));
        assert!(matches!(
            Signal::new(body(), ctx(), None, confidence, "r"),
            Err(ConstructionError::MissingSource)
        ));
        assert!(Signal::new(body(), None, None, confidence, "r").is_err());
    }
}

#[test]
fn test_hash_is_stable_across_clones() {
    let signal = alignment(7);
    let expected = signal.content_hash();
    for _ in 0..1000 {
        assert_eq!(signal.clone().compute_hash(), expected);
    }
    let serialized = serde_json::to_value(&signal).unwrap();
    assert_eq!(serialized["content_hash"], json!(expected.to_hex()));
    assert_eq!(alignment(7).content_hash(), expected);
}

#[tokio::test]
async fn test_rejections_counted_exactly_and_never_block() {
    let bus = SignalBus::new(
        BusCategory::Structural,
        BusConfig {
            max_queue_size: 5,
            high_water_ratio: 1.0,
            low_water_ratio: 0.2,
            ..BusConfig::default()
        },
    );
    let contract = PublicationContract::new("pub-context_scoper", "context_scoper")
        .with_signal_types(["StructuralAlignmentSignal"])
        .with_buses([BusCategory::Structural]);

    let mut rejected = 0;
    for n in 0..20 {
        match bus.publish(Arc::new(alignment(n)), "context_scoper", &contract).await {
            Ok(_) => {}
            Err(PublishRejection::QueueFull { capacity, .. }) => {
                assert_eq!(capacity, 5);
                rejected += 1;
            }
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    }
    // A signal type the contract does not allow.
    let conflict = Signal::new(
        SignalBody::structural(StructuralKind::SchemaConflict, json!({})),
        Some(SignalContext::new("document", "plan.md", "scoping")),
        Some(SignalSource::new("evt-1", "context_scoper")),
        SignalConfidence::Low,
        "conflict",
    )
    .unwrap();
    assert!(matches!(
        bus.publish(Arc::new(conflict), "context_scoper", &contract).await,
        Err(PublishRejection::ContractViolation { .. })
    ));
    rejected += 1;

    let stats = bus.get_stats().await;
    assert_eq!(rejected, 16);
    assert_eq!(stats.rejected, rejected);
    assert_eq!(stats.published, 5);
    assert_eq!(stats.queue_size, 5);
}
