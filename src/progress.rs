//! Per-job progress channel with keepalive and cooperative cancellation.
//!
//! Each job id owns one FIFO queue. Publishing never blocks (unbounded
//! send); a subscriber drains the queue as a stream of frames, receiving
//! heartbeat frames when no event arrives within the keepalive interval
//! instead of the stream closing. Cancellation is cooperative: `cancel`
//! only marks the job, and the orchestrator checks `is_cancelled` between
//! steps while the stream reports a terminal `done` event on its next
//! read.
//!
//! State is in-memory only. A process restart loses in-flight jobs; they
//! are not durable workflows. Topics are garbage-collected when the
//! terminal event is consumed or a TTL elapses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Name of the terminal event. Nothing follows it on a topic.
pub const DONE_EVENT: &str = "done";

/// An immutable record published to a job's queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl ProgressEvent {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Terminal event for a cancelled job.
    pub fn done_cancelled() -> Self {
        Self::new(DONE_EVENT, serde_json::json!({ "status": "cancelled" }))
    }

    pub fn is_done(&self) -> bool {
        self.event == DONE_EVENT
    }
}

/// One item yielded by a subscription stream.
#[derive(Debug, Clone)]
pub enum Frame {
    Event(ProgressEvent),
    /// No event arrived within the keepalive interval; the consumer
    /// should emit a no-op heartbeat instead of closing the connection.
    Keepalive,
}

struct Topic {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    /// Taken by the first subscriber; replaced on re-subscription.
    rx: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
    cancelled: bool,
    touched: Instant,
}

impl Topic {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            cancelled: false,
            touched: Instant::now(),
        }
    }
}

#[derive(Default)]
struct BrokerInner {
    topics: HashMap<String, Topic>,
}

impl BrokerInner {
    fn topic_mut(&mut self, job_id: &str) -> &mut Topic {
        self.topics
            .entry(job_id.to_string())
            .or_insert_with(Topic::new)
    }
}

/// Publish/subscribe broker keyed by job id.
///
/// Cheap to clone; all clones share one topic map. Topics for distinct
/// jobs never contend beyond the map lock, which is held only for
/// constant-time bookkeeping.
#[derive(Clone, Default)]
pub struct ProgressBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl ProgressBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event for a job. Never blocks the publisher; events to
    /// a topic nobody ever subscribes to are dropped by the TTL purge.
    pub fn publish(&self, job_id: &str, event: &str, data: serde_json::Value) {
        let mut inner = self.inner.lock().expect("progress broker lock poisoned");
        let topic = inner.topic_mut(job_id);
        topic.touched = Instant::now();
        // Send fails only when the receiver was dropped mid-stream; the
        // job keeps running either way.
        let _ = topic.tx.send(ProgressEvent::new(event, data));
    }

    /// Subscribe to a job's events.
    ///
    /// Events are delivered at most once per live subscriber: a second
    /// subscription to the same job replaces the queue, and the previous
    /// subscriber's stream ends.
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        let mut inner = self.inner.lock().expect("progress broker lock poisoned");
        let topic = inner.topic_mut(job_id);
        topic.touched = Instant::now();
        let rx = match topic.rx.take() {
            Some(rx) => rx,
            None => {
                // Already subscribed once; start a fresh queue.
                let (tx, rx) = mpsc::unbounded_channel();
                topic.tx = tx;
                rx
            }
        };
        Subscription {
            job_id: job_id.to_string(),
            broker: self.clone(),
            rx,
            finished: false,
        }
    }

    /// Mark a job cancelled. Observed cooperatively: the orchestrator at
    /// its next step boundary, the stream at its next read.
    pub fn cancel(&self, job_id: &str) {
        let mut inner = self.inner.lock().expect("progress broker lock poisoned");
        inner.topic_mut(job_id).cancelled = true;
    }

    /// Non-blocking cooperative cancellation check.
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        let inner = self.inner.lock().expect("progress broker lock poisoned");
        inner
            .topics
            .get(job_id)
            .map(|t| t.cancelled)
            .unwrap_or(false)
    }

    /// Drop a job's topic. Called once its terminal event is consumed.
    pub fn remove(&self, job_id: &str) {
        let mut inner = self.inner.lock().expect("progress broker lock poisoned");
        inner.topics.remove(job_id);
    }

    /// Drop topics idle for longer than `ttl`. The server runs this
    /// periodically so abandoned jobs do not accumulate.
    pub fn purge_stale(&self, ttl: Duration) -> usize {
        let mut inner = self.inner.lock().expect("progress broker lock poisoned");
        let before = inner.topics.len();
        inner.topics.retain(|_, t| t.touched.elapsed() < ttl);
        before - inner.topics.len()
    }

    #[cfg(test)]
    fn topic_count(&self) -> usize {
        self.inner.lock().unwrap().topics.len()
    }
}

/// A live subscription to one job's events.
pub struct Subscription {
    job_id: String,
    broker: ProgressBroker,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    finished: bool,
}

impl Subscription {
    /// Wait for the next frame.
    ///
    /// Returns `None` once the terminal `done` event has been yielded (or
    /// the topic was replaced by a newer subscriber). Cancellation is
    /// observed before waiting, so a cancelled job yields its terminal
    /// frame no later than one keepalive interval after `cancel`.
    pub async fn next_frame(&mut self, keepalive: Duration) -> Option<Frame> {
        if self.finished {
            return None;
        }
        if self.broker.is_cancelled(&self.job_id) {
            self.finish();
            return Some(Frame::Event(ProgressEvent::done_cancelled()));
        }
        match tokio::time::timeout(keepalive, self.rx.recv()).await {
            Ok(Some(event)) => {
                if event.is_done() {
                    self.finish();
                }
                Some(Frame::Event(event))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(_) => Some(Frame::Keepalive),
        }
    }

    /// Convert into a stream of frames, ending after the terminal event.
    pub fn into_stream(self, keepalive: Duration) -> impl Stream<Item = Frame> + Send {
        futures::stream::unfold(self, move |mut sub| async move {
            sub.next_frame(keepalive).await.map(|frame| (frame, sub))
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.broker.remove(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const FAST: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_publish_then_subscribe_preserves_fifo() {
        let broker = ProgressBroker::new();
        broker.publish("j1", "fork-start", serde_json::json!({"n": 1}));
        broker.publish("j1", "fork-ok", serde_json::json!({"n": 2}));

        let mut sub = broker.subscribe("j1");
        match sub.next_frame(FAST).await {
            Some(Frame::Event(e)) => assert_eq!(e.event, "fork-start"),
            other => panic!("unexpected frame: {:?}", other),
        }
        match sub.next_frame(FAST).await {
            Some(Frame::Event(e)) => assert_eq!(e.event, "fork-ok"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keepalive_frame_when_idle() {
        let broker = ProgressBroker::new();
        let mut sub = broker.subscribe("j1");
        match sub.next_frame(FAST).await {
            Some(Frame::Keepalive) => {}
            other => panic!("expected keepalive, got {:?}", other),
        }
        // The stream stays open and later events still arrive.
        broker.publish("j1", "create-start", serde_json::json!({}));
        match sub.next_frame(FAST).await {
            Some(Frame::Event(e)) => assert_eq!(e.event, "create-start"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_done_event_terminates_stream_and_removes_topic() {
        let broker = ProgressBroker::new();
        broker.publish("j1", DONE_EVENT, serde_json::json!({"status": "success"}));

        let mut sub = broker.subscribe("j1");
        match sub.next_frame(FAST).await {
            Some(Frame::Event(e)) => assert!(e.is_done()),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(sub.next_frame(FAST).await.is_none());
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_yields_terminal_cancelled_event() {
        let broker = ProgressBroker::new();
        let mut sub = broker.subscribe("j1");
        broker.cancel("j1");
        assert!(broker.is_cancelled("j1"));

        match sub.next_frame(FAST).await {
            Some(Frame::Event(e)) => {
                assert!(e.is_done());
                assert_eq!(e.data["status"], "cancelled");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(sub.next_frame(FAST).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_subscribe_is_observed() {
        let broker = ProgressBroker::new();
        broker.cancel("j1");
        let mut sub = broker.subscribe("j1");
        match sub.next_frame(FAST).await {
            Some(Frame::Event(e)) => assert_eq!(e.data["status"], "cancelled"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous_queue() {
        let broker = ProgressBroker::new();
        let mut first = broker.subscribe("j1");
        let mut second = broker.subscribe("j1");

        broker.publish("j1", "copy-progress", serde_json::json!({"copied": 5}));

        // Only the live (second) subscriber receives events; the first
        // stream ends because its sender was replaced.
        match second.next_frame(FAST).await {
            Some(Frame::Event(e)) => assert_eq!(e.event, "copy-progress"),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(first.next_frame(FAST).await.is_none());
    }

    #[tokio::test]
    async fn test_stream_adapter_ends_after_done() {
        let broker = ProgressBroker::new();
        broker.publish("j1", "agent-start", serde_json::json!({}));
        broker.publish("j1", DONE_EVENT, serde_json::json!({"status": "success"}));

        let frames: Vec<Frame> = broker.subscribe("j1").into_stream(FAST).collect().await;
        assert_eq!(frames.len(), 2);
        match &frames[1] {
            Frame::Event(e) => assert!(e.is_done()),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_purge_stale_drops_idle_topics() {
        let broker = ProgressBroker::new();
        broker.publish("old", "fork-start", serde_json::json!({}));
        assert_eq!(broker.topic_count(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let purged = broker.purge_stale(Duration::from_millis(10));
        assert_eq!(purged, 1);
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_publishing_to_independent_jobs_does_not_interfere() {
        let broker = ProgressBroker::new();
        broker.publish("a", "fork-start", serde_json::json!({}));
        broker.publish("b", "create-start", serde_json::json!({}));

        let mut sub_b = broker.subscribe("b");
        match sub_b.next_frame(FAST).await {
            Some(Frame::Event(e)) => assert_eq!(e.event, "create-start"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
