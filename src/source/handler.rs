//! Transaction listener that captures commits as CDC events

use super::{RouterResult, StreamsEventRouter};
use crate::constraints::ConstraintsService;
use crate::event::{
    schema_properties, Constraint, Meta, NodeChange, NodePayload, OperationType, Payload,
    RelationshipChange, RelationshipNodeChange, RelationshipPayload, Schema, StreamsEvent,
    StreamsTransactionEvent,
};
use crate::graph::{Label, PropertyMap};
use crate::host::{
    EntityChange, HostError, HostResult, NodeSnapshot, NodeStateChange, RelationshipStateChange,
    TransactionData, TransactionListener,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Builds schema-enriched events for each committed transaction and passes
/// them to a router
pub struct StreamsTransactionEventHandler {
    router: Arc<dyn StreamsEventRouter>,
    constraints: Arc<ConstraintsService>,
    source: IndexMap<String, String>,
}

impl StreamsTransactionEventHandler {
    pub fn new(router: Arc<dyn StreamsEventRouter>, constraints: Arc<ConstraintsService>) -> Self {
        Self {
            router,
            constraints,
            source: IndexMap::new(),
        }
    }

    /// Attach origin metadata (e.g. `hostname`) to every event's `meta.source`
    pub fn with_source(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source.insert(key.into(), value.into());
        self
    }

    pub fn router(&self) -> &Arc<dyn StreamsEventRouter> {
        &self.router
    }

    /// Events for one transaction, numbered `0..n` in change order.
    /// Changes with neither side present carry nothing and are dropped.
    pub fn build_events(&self, data: &TransactionData) -> Vec<StreamsTransactionEvent> {
        let payloads: Vec<(OperationType, Payload, Schema)> = data
            .changes
            .iter()
            .filter_map(|change| match change {
                EntityChange::Node(node) => self.node_payload(node),
                EntityChange::Relationship(rel) => self.relationship_payload(rel),
            })
            .collect();

        let count = payloads.len() as i64;
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, (operation, payload, schema))| StreamsTransactionEvent {
                meta: Meta {
                    timestamp: data.timestamp,
                    username: data.username.clone(),
                    tx_id: data.tx_id,
                    tx_event_id: i as i64,
                    tx_events_count: count,
                    operation,
                    source: self.source.clone(),
                },
                payload,
                schema,
            })
            .collect()
    }

    /// Build the batch for `data` and route it
    pub async fn handle(&self, data: &TransactionData) -> RouterResult<()> {
        let events = self.build_events(data);
        if events.is_empty() {
            return Ok(());
        }
        debug!(tx_id = data.tx_id, events = events.len(), "Routing transaction events");
        self.router
            .send_events(events.into_iter().map(StreamsEvent::from).collect())
            .await
    }

    fn node_payload(&self, change: &NodeStateChange) -> Option<(OperationType, Payload, Schema)> {
        let operation = operation_for(change.before.is_some(), change.after.is_some())?;
        let visible = change.after.as_ref().or(change.before.as_ref())?;

        let constraints = self.label_constraints(&visible.labels);
        let schema = Schema {
            properties: schema_properties(&visible.properties),
            constraints: constraints.into_iter().collect(),
        };
        let payload = NodePayload {
            id: visible.id.as_u64().to_string(),
            before: change.before.as_ref().map(node_change),
            after: change.after.as_ref().map(node_change),
        };
        Some((operation, payload.into(), schema))
    }

    fn relationship_payload(
        &self,
        change: &RelationshipStateChange,
    ) -> Option<(OperationType, Payload, Schema)> {
        let operation = operation_for(change.before.is_some(), change.after.is_some())?;
        let visible = change.after.as_ref().or(change.before.as_ref())?;

        let start_constraints = self.label_constraints(&change.start.labels);
        let end_constraints = self.label_constraints(&change.end.labels);
        let mut constraints = self.constraints.for_relationship_type(change.edge_type.as_str());
        constraints.extend(start_constraints.iter().cloned());
        constraints.extend(end_constraints.iter().cloned());

        let schema = Schema {
            properties: schema_properties(visible),
            constraints: constraints.into_iter().collect(),
        };
        let payload = RelationshipPayload {
            id: change.id.as_u64().to_string(),
            label: change.edge_type.as_str().to_string(),
            start: endpoint(&change.start, &start_constraints),
            end: endpoint(&change.end, &end_constraints),
            before: change.before.clone().map(|properties| RelationshipChange { properties }),
            after: change.after.clone().map(|properties| RelationshipChange { properties }),
        };
        Some((operation, payload.into(), schema))
    }

    fn label_constraints(&self, labels: &[Label]) -> BTreeSet<Constraint> {
        let by_label = self.constraints.all_for_labels();
        labels
            .iter()
            .filter_map(|label| by_label.get(label.as_str()))
            .flatten()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TransactionListener for StreamsTransactionEventHandler {
    async fn after_commit(&self, data: &TransactionData) -> HostResult<()> {
        self.handle(data)
            .await
            .map_err(|e| HostError::Listener(e.to_string()))
    }
}

fn operation_for(before: bool, after: bool) -> Option<OperationType> {
    match (before, after) {
        (false, true) => Some(OperationType::Created),
        (true, true) => Some(OperationType::Updated),
        (true, false) => Some(OperationType::Deleted),
        (false, false) => None,
    }
}

fn node_change(snapshot: &NodeSnapshot) -> NodeChange {
    NodeChange::new(
        snapshot.properties.clone(),
        snapshot.labels.iter().map(|l| l.as_str().to_string()),
    )
}

/// Endpoint reference with its natural key: the values of every UNIQUE
/// constraint of its labels whose properties the node fully carries
fn endpoint(node: &NodeSnapshot, constraints: &BTreeSet<Constraint>) -> RelationshipNodeChange {
    let mut ids = PropertyMap::new();
    for constraint in constraints.iter().filter(|c| c.is_unique()) {
        if constraint.properties.iter().all(|p| node.properties.contains_key(p)) {
            for property in &constraint.properties {
                if let Some(value) = node.properties.get(property) {
                    ids.insert(property.clone(), value.clone());
                }
            }
        }
    }

    RelationshipNodeChange {
        id: node.id.as_u64().to_string(),
        labels: node.labels.iter().map(|l| l.as_str().to_string()).collect(),
        ids,
    }
}
