//! Log Bus (C3): per-task publish/subscribe log streaming (§4.3).
//!
//! A bounded ring buffer retains recent history so a subscriber that joins
//! mid-task can backfill; each subscriber additionally gets its own bounded
//! queue so one slow reader can't block the publisher or other readers.
//! When a subscriber's queue is full its *oldest* buffered record is
//! dropped, never the newest — a plain `mpsc` channel can only refuse the
//! newest from the sender side, so subscriber queues are hand-rolled here.

use crate::ids::TaskId;
use crate::model::log_record::LogRecord;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum LogEvent {
    Record(LogRecord),
    /// Emitted when no record has been delivered within the heartbeat
    /// interval, so long-poll clients can detect a still-alive connection.
    Heartbeat,
    /// This subscriber's queue overflowed and the oldest buffered record(s)
    /// were dropped to make room. Carries the cumulative drop count for
    /// this subscriber so far. Delivered only after every record queued
    /// before the gap has been drained, so the stream stays dense up to
    /// the point of loss.
    LimitReached(u64),
    /// The task's stream is closed and fully drained; no further events
    /// will arrive.
    Closed,
}

struct Subscriber {
    queue: Mutex<VecDeque<LogRecord>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    reported_dropped: AtomicU64,
}

impl Subscriber {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
            reported_dropped: AtomicU64::new(0),
        }
    }

    async fn push(&self, record: LogRecord) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
        queue.push_back(record);
        drop(queue);
        self.notify.notify_one();
    }
}

struct TaskStream {
    ring: Mutex<VecDeque<LogRecord>>,
    ring_size: usize,
    next_seq: AtomicU64,
    subscribers: Mutex<HashMap<u64, Arc<Subscriber>>>,
    next_subscriber_id: AtomicU64,
    closed: Mutex<bool>,
}

impl TaskStream {
    fn new(ring_size: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(ring_size.min(256))),
            ring_size,
            next_seq: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
            closed: Mutex::new(false),
        }
    }
}

pub struct LogBus {
    streams: Mutex<HashMap<TaskId, Arc<TaskStream>>>,
    ring_size: usize,
    subscriber_capacity: usize,
    heartbeat: Duration,
    teardown_grace: Duration,
}

impl LogBus {
    pub fn new(ring_size: usize, subscriber_capacity: usize, heartbeat_secs: u64, teardown_grace_secs: u64) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            ring_size,
            subscriber_capacity,
            heartbeat: Duration::from_secs(heartbeat_secs),
            teardown_grace: Duration::from_secs(teardown_grace_secs),
        }
    }

    async fn stream_for(&self, task_id: TaskId) -> Arc<TaskStream> {
        let mut streams = self.streams.lock().await;
        Arc::clone(
            streams
                .entry(task_id)
                .or_insert_with(|| Arc::new(TaskStream::new(self.ring_size))),
        )
    }

    /// Appends `text` as a new record to `task_id`'s stream, assigning the
    /// next sequence number, and fans it out to every live subscriber.
    pub async fn publish(&self, task_id: TaskId, mut record: LogRecord) {
        let stream = self.stream_for(task_id).await;
        record.seq = stream.next_seq.fetch_add(1, Ordering::SeqCst);

        {
            let mut ring = stream.ring.lock().await;
            if ring.len() >= stream.ring_size {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }

        let subscribers: Vec<_> = stream.subscribers.lock().await.values().cloned().collect();
        for sub in subscribers {
            sub.push(record.clone()).await;
        }
    }

    /// Registers a new subscriber, backfilling it with the current ring
    /// buffer contents (§4.3 Subscribe).
    pub async fn subscribe(self: &Arc<Self>, task_id: TaskId) -> Subscription {
        let stream = self.stream_for(task_id).await;
        let id = stream.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let subscriber = Arc::new(Subscriber::new(self.subscriber_capacity));

        {
            let ring = stream.ring.lock().await;
            let mut queue = subscriber.queue.lock().await;
            for record in ring.iter() {
                queue.push_back(record.clone());
            }
        }

        stream.subscribers.lock().await.insert(id, Arc::clone(&subscriber));

        Subscription {
            bus: Arc::clone(self),
            task_id,
            id,
            stream,
            subscriber,
            heartbeat: self.heartbeat,
        }
    }

    /// Marks `task_id`'s stream closed: subscribers drain their remaining
    /// queue then observe [`LogEvent::Closed`]. The stream and its
    /// subscriber table are torn down after `teardown_grace` so stragglers
    /// still get a chance to read the tail (§4.3 Close).
    pub async fn close(self: &Arc<Self>, task_id: TaskId) {
        let stream = self.stream_for(task_id).await;
        *stream.closed.lock().await = true;
        for sub in stream.subscribers.lock().await.values() {
            sub.notify.notify_waiters();
        }

        let bus = Arc::clone(self);
        let grace = self.teardown_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            bus.streams.lock().await.remove(&task_id);
            debug!(%task_id, "log bus stream torn down");
        });
    }

    async fn unsubscribe(&self, task_id: TaskId, id: u64) {
        if let Some(stream) = self.streams.lock().await.get(&task_id).cloned() {
            stream.subscribers.lock().await.remove(&id);
        }
    }
}

pub struct Subscription {
    bus: Arc<LogBus>,
    task_id: TaskId,
    id: u64,
    stream: Arc<TaskStream>,
    subscriber: Arc<Subscriber>,
    heartbeat: Duration,
}

impl Subscription {
    /// Waits for the next event: a record, a heartbeat if none arrived
    /// within the configured interval, or `Closed` once the stream is
    /// closed and this subscriber's queue is empty.
    pub async fn recv(&self) -> LogEvent {
        loop {
            if let Some(record) = self.subscriber.queue.lock().await.pop_front() {
                return LogEvent::Record(record);
            }
            let dropped = self.subscriber.dropped.load(Ordering::SeqCst);
            let reported = self.subscriber.reported_dropped.swap(dropped, Ordering::SeqCst);
            if dropped > reported {
                return LogEvent::LimitReached(dropped);
            }
            if *self.stream.closed.lock().await {
                return LogEvent::Closed;
            }
            match tokio::time::timeout(self.heartbeat, self.subscriber.notify.notified()).await {
                Ok(()) => continue,
                Err(_) => return LogEvent::Heartbeat,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let bus = Arc::clone(&self.bus);
        let task_id = self.task_id;
        let id = self.id;
        tokio::spawn(async move {
            bus.unsubscribe(task_id, id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::log_record::LogLevel;

    #[tokio::test]
    async fn subscriber_backfills_ring_buffer() {
        let bus = Arc::new(LogBus::new(10, 10, 30, 5));
        let task_id = TaskId(1);
        bus.publish(task_id, LogRecord::new(0, LogLevel::Info, "first")).await;
        bus.publish(task_id, LogRecord::new(0, LogLevel::Info, "second")).await;

        let sub = bus.subscribe(task_id).await;
        match sub.recv().await {
            LogEvent::Record(r) => assert_eq!(r.text, "first"),
            other => panic!("expected record, got {other:?}"),
        }
        match sub.recv().await {
            LogEvent::Record(r) => assert_eq!(r.text, "second"),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_subscriber_queue_drops_oldest() {
        let bus = Arc::new(LogBus::new(10, 2, 30, 5));
        let task_id = TaskId(1);
        let sub = bus.subscribe(task_id).await;

        for i in 0..3 {
            bus.publish(task_id, LogRecord::new(0, LogLevel::Info, format!("record-{i}"))).await;
        }

        match sub.recv().await {
            LogEvent::Record(r) => assert_eq!(r.text, "record-1"),
            other => panic!("expected record, got {other:?}"),
        }
        match sub.recv().await {
            LogEvent::Record(r) => assert_eq!(r.text, "record-2"),
            other => panic!("expected record, got {other:?}"),
        }
        match sub.recv().await {
            LogEvent::LimitReached(n) => assert_eq!(n, 1),
            other => panic!("expected limit_reached, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_delivers_closed_after_drain() {
        let bus = Arc::new(LogBus::new(10, 10, 30, 0));
        let task_id = TaskId(1);
        let sub = bus.subscribe(task_id).await;
        bus.publish(task_id, LogRecord::new(0, LogLevel::Success, "done")).await;
        bus.close(task_id).await;

        match sub.recv().await {
            LogEvent::Record(r) => assert_eq!(r.text, "done"),
            other => panic!("expected record, got {other:?}"),
        }
        assert!(matches!(sub.recv().await, LogEvent::Closed));
    }
}
