//! Action-event persistence router
//!
//! Binds a batch of causally related transaction events to one addressable
//! audit record. When a batch creates an `Action` node, the rest of the batch
//! is serialized and stored as the `json` property of that action's node,
//! keyed by its `actionId`.

use crate::event::{to_json_string, Payload, StreamsEvent, StreamsTransactionEvent, OperationType};
use crate::graph::{property_map, Label, PropertyValue};
use crate::host::{GraphDatabase, WriteStatement};
use crate::source::{RouterResult, StreamsEventRouter};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Label marking the event that opens an action batch
pub const ACTION_LABEL: &str = "Action";
/// Property carrying the correlation id of an action
pub const ACTION_ID_PROPERTY: &str = "actionId";
/// Property the serialized batch is stored under
pub const JSON_PROPERTY: &str = "json";

/// Persists action batches onto their action node
pub struct PersistentActionEventRouter {
    db: Arc<dyn GraphDatabase>,
    ignored_labels: HashSet<String>,
    running: AtomicBool,
}

impl PersistentActionEventRouter {
    pub fn new(db: Arc<dyn GraphDatabase>) -> Self {
        Self {
            db,
            ignored_labels: HashSet::from([ACTION_LABEL.to_string()]),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn touches_ignored_label(&self, event: &StreamsTransactionEvent) -> bool {
        let ignored = |labels: &[String]| labels.iter().any(|l| self.ignored_labels.contains(l));
        match &event.payload {
            Payload::Node(node) => {
                node.before.as_ref().map_or(false, |c| ignored(&c.labels))
                    || node.after.as_ref().map_or(false, |c| ignored(&c.labels))
            }
            Payload::Relationship(rel) => ignored(&rel.start.labels) || ignored(&rel.end.labels),
        }
    }
}

/// First `created` node event whose `after` state carries the `Action` label
fn find_action_event<'a>(events: &[&'a StreamsTransactionEvent]) -> Option<&'a StreamsTransactionEvent> {
    events.iter().copied().find(|e| {
        e.operation() == OperationType::Created
            && e.payload
                .as_node()
                .and_then(|node| node.after.as_ref())
                .map_or(false, |after| after.has_label(ACTION_LABEL))
    })
}

#[async_trait]
impl StreamsEventRouter for PersistentActionEventRouter {
    async fn start(&self) {
        info!(database = self.db.name(), "Starting action event router");
        self.running.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        info!(database = self.db.name(), "Stopping action event router");
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_events(&self, events: Vec<StreamsEvent>) -> RouterResult<()> {
        let transactions: Vec<&StreamsTransactionEvent> =
            events.iter().filter_map(StreamsEvent::as_transaction).collect();

        let Some(action) = find_action_event(&transactions) else {
            return Ok(());
        };
        let Some(after) = action.payload.as_node().and_then(|node| node.after.as_ref()) else {
            return Ok(());
        };

        let action_id = match after.properties.get(ACTION_ID_PROPERTY) {
            Some(PropertyValue::String(id)) => id.clone(),
            Some(other) => {
                warn!(tx_id = action.meta.tx_id, "Ignoring action with non-string actionId: {}", other);
                return Ok(());
            }
            None => {
                warn!(tx_id = action.meta.tx_id, "Ignoring action without actionId");
                return Ok(());
            }
        };

        let batch: Vec<&StreamsTransactionEvent> = transactions
            .into_iter()
            .filter(|e| !self.touches_ignored_label(e))
            .collect();
        let json = to_json_string(&batch)?;

        debug!(action_id = %action_id, events = batch.len(), "Persisting action batch");
        let statement = WriteStatement::MergeNode {
            labels: after.labels.iter().map(Label::new).collect(),
            key: property_map([(ACTION_ID_PROPERTY, action_id)]),
            set: property_map([(JSON_PROPERTY, json)]),
        };
        self.db.execute_write(statement).await?;
        Ok(())
    }
}
