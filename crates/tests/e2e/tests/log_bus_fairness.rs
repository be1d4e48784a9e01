//! Log Bus fairness tests (§8 scenario 5): a slow subscriber must never
//! block a fast one, sequence numbers must stay strictly increasing per
//! subscriber, and an overflowing queue drops the oldest record rather than
//! the newest.

use std::sync::Arc;
use std::time::Duration;

use buildforge_core::ids::TaskId;
use buildforge_core::log_bus::{LogBus, LogEvent};
use buildforge_core::model::log_record::{LogLevel, LogRecord};

#[tokio::test]
async fn fast_subscriber_is_not_blocked_by_a_slow_one() {
    let bus = Arc::new(LogBus::new(64, 64, 30, 5));
    let task_id = TaskId(1);

    let fast = bus.subscribe(task_id).await;
    let slow = bus.subscribe(task_id).await;

    for i in 0..20 {
        bus.publish(task_id, LogRecord::new(0, LogLevel::Info, format!("line-{i}"))).await;
    }

    // Drain the fast subscriber immediately; it must see every record with
    // strictly increasing sequence numbers regardless of whether `slow`
    // ever reads anything.
    let mut last_seq = None;
    for i in 0..20 {
        match fast.recv().await {
            LogEvent::Record(r) => {
                assert_eq!(r.text, format!("line-{i}"));
                if let Some(prev) = last_seq {
                    assert!(r.seq > prev, "sequence numbers must strictly increase");
                }
                last_seq = Some(r.seq);
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    // `slow` can still catch up afterwards from its own buffered queue.
    match tokio::time::timeout(Duration::from_secs(1), slow.recv()).await {
        Ok(LogEvent::Record(r)) => assert_eq!(r.text, "line-0"),
        other => panic!("slow subscriber should still have its backlog: {other:?}"),
    }
}

#[tokio::test]
async fn overflowing_subscriber_queue_drops_oldest_not_newest() {
    let bus = Arc::new(LogBus::new(64, 3, 30, 5));
    let task_id = TaskId(1);
    let sub = bus.subscribe(task_id).await;

    for i in 0..10 {
        bus.publish(task_id, LogRecord::new(0, LogLevel::Info, format!("record-{i}"))).await;
    }

    // Capacity 3, 10 records published with no reader draining in between:
    // only the last 3 survive.
    for expected in ["record-7", "record-8", "record-9"] {
        match sub.recv().await {
            LogEvent::Record(r) => assert_eq!(r.text, expected),
            other => panic!("expected record, got {other:?}"),
        }
    }

    // The dense run of survivors is followed by a signal that 7 records
    // (0 through 6) were dropped for this subscriber.
    match sub.recv().await {
        LogEvent::LimitReached(dropped) => assert_eq!(dropped, 7),
        other => panic!("expected limit_reached, got {other:?}"),
    }
}

#[tokio::test]
async fn closing_a_stream_delivers_closed_after_all_subscribers_drain() {
    let bus = Arc::new(LogBus::new(16, 16, 30, 0));
    let task_id = TaskId(1);

    let a = bus.subscribe(task_id).await;
    let b = bus.subscribe(task_id).await;

    bus.publish(task_id, LogRecord::new(0, LogLevel::Info, "only line")).await;
    bus.close(task_id).await;

    for sub in [&a, &b] {
        match sub.recv().await {
            LogEvent::Record(r) => assert_eq!(r.text, "only line"),
            other => panic!("expected record, got {other:?}"),
        }
        assert!(matches!(sub.recv().await, LogEvent::Closed));
    }
}
