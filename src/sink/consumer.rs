//! Topic consumer driving an [`EventApplier`]

use super::applier::{ApplyReport, ApplyResult, EventApplier};
use crate::event::{from_json_slice, StreamsTransactionEvent};
use crate::graph::GraphStore;
use crate::transport::{EventSubscriber, TransportResult};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default upper bound on messages applied per batch
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Replays one topic onto a shared store
pub struct SinkConsumer {
    topic: String,
    applier: EventApplier,
    store: Arc<RwLock<GraphStore>>,
    batch_size: usize,
}

/// Running consumer task
pub struct SinkHandle {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<ApplyResult<ApplyReport>>,
}

impl SinkHandle {
    /// Ask the consumer to stop after its current batch and wait for its report
    pub async fn stop(self) -> ApplyResult<ApplyReport> {
        self.cancel.send_replace(true);
        self.join().await
    }

    /// Wait for the consumer to finish on its own (end of stream)
    pub async fn join(self) -> ApplyResult<ApplyReport> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!("Sink consumer task was cancelled: {}", e);
                Ok(ApplyReport::default())
            }
        }
    }
}

impl SinkConsumer {
    pub fn new(topic: impl Into<String>, applier: EventApplier, store: Arc<RwLock<GraphStore>>) -> Self {
        Self {
            topic: topic.into(),
            applier,
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Subscribe and consume on a background task
    pub fn spawn(self, subscriber: &dyn EventSubscriber) -> TransportResult<SinkHandle> {
        let stream = subscriber.subscribe(&self.topic)?;
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move { self.run(stream, cancelled).await });
        Ok(SinkHandle { cancel, handle })
    }

    /// Consume `stream` until it ends or `cancelled` flips. Messages already
    /// available are drained together and applied as one batch.
    pub async fn run(
        &self,
        stream: BoxStream<'static, Bytes>,
        mut cancelled: watch::Receiver<bool>,
    ) -> ApplyResult<ApplyReport> {
        info!(topic = %self.topic, strategy = self.applier.strategy().name(), "Sink consumer started");
        let mut batches = stream.ready_chunks(self.batch_size);
        let mut report = ApplyReport::default();

        loop {
            let chunk = tokio::select! {
                chunk = batches.next() => chunk,
                _ = cancelled.changed() => None,
            };
            let Some(chunk) = chunk else {
                break;
            };

            let mut events: Vec<StreamsTransactionEvent> = Vec::with_capacity(chunk.len());
            for message in &chunk {
                match from_json_slice::<StreamsTransactionEvent>(message) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        warn!(topic = %self.topic, "Skipping undecodable message: {}", e);
                        report.skipped += 1;
                    }
                }
            }

            let mut store = self.store.write().await;
            let batch = self.applier.apply_batch(&mut store, events)?;
            debug!(topic = %self.topic, applied = batch.applied, skipped = batch.skipped, "Applied batch");
            report.merge(batch);
        }

        info!(
            topic = %self.topic,
            applied = report.applied,
            skipped = report.skipped,
            "Sink consumer stopped"
        );
        Ok(report)
    }
}
