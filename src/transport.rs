//! Message transport between the source and sink sides
//!
//! The pipeline only needs `publish(topic, key, bytes)` and
//! `subscribe(topic) -> stream of bytes`. [`InMemoryBroker`] provides both
//! in-process: every topic keeps its full log, and a new subscriber first
//! replays the log and then follows live publishes, in publish order.

use crate::event::{to_json_bytes, EventError, StreamsEvent};
use crate::source::{RouterResult, StreamsEventRouter};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Broker is closed")]
    Closed,

    #[error("Invalid topic name: {0:?}")]
    InvalidTopic(String),

    #[error("Encoding error: {0}")]
    Event(#[from] EventError),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// One retained message
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: String,
    pub payload: Bytes,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> TransportResult<()>;
}

pub trait EventSubscriber: Send + Sync {
    /// Every message of `topic`, past and future. The stream ends when the
    /// transport closes.
    fn subscribe(&self, topic: &str) -> TransportResult<BoxStream<'static, Bytes>>;
}

#[derive(Default)]
struct Topic {
    log: Vec<Record>,
    subscribers: Vec<mpsc::UnboundedSender<Bytes>>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Topic>,
    closed: bool,
}

/// In-process broker with per-topic retained logs
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retained messages of `topic`, oldest first
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.log.clone())
            .unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Stop accepting publishes and end every subscriber stream once it has
    /// drained what was already delivered
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        for topic in state.topics.values_mut() {
            topic.subscribers.clear();
        }
        info!("In-memory broker closed");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_topic(topic: &str) -> TransportResult<()> {
    if topic.trim().is_empty() {
        Err(TransportError::InvalidTopic(topic.to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> TransportResult<()> {
        check_topic(topic)?;
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }

        let entry = state.topics.entry(topic.to_string()).or_default();
        entry.log.push(Record {
            key: key.to_string(),
            payload: payload.clone(),
        });
        entry.subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        debug!(topic, key, offset = entry.log.len() - 1, "Published message");
        Ok(())
    }
}

impl EventSubscriber for InMemoryBroker {
    fn subscribe(&self, topic: &str) -> TransportResult<BoxStream<'static, Bytes>> {
        check_topic(topic)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let closed = state.closed;

        let entry = state.topics.entry(topic.to_string()).or_default();
        for record in &entry.log {
            // receiver is alive, send cannot fail
            let _ = tx.send(record.payload.clone());
        }
        if !closed {
            entry.subscribers.push(tx);
        }
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Publishes every transaction event to one topic, keyed `"{txId}-{txEventId}"`
pub struct PublishingEventRouter {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    running: AtomicBool,
}

impl PublishingEventRouter {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            running: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamsEventRouter for PublishingEventRouter {
    async fn start(&self) {
        info!(topic = %self.topic, "Starting publishing router");
        self.running.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        info!(topic = %self.topic, "Stopping publishing router");
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_events(&self, events: Vec<StreamsEvent>) -> RouterResult<()> {
        for event in events.iter().filter_map(StreamsEvent::as_transaction) {
            let key = format!("{}-{}", event.meta.tx_id, event.meta.tx_event_id);
            let payload = Bytes::from(to_json_bytes(event)?);
            self.publisher.publish(&self.topic, &key, payload).await?;
        }
        Ok(())
    }
}
