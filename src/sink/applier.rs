//! Replays CDC events onto a target graph
//!
//! Every operation is an upsert or a match-then-delete, so re-delivering an
//! event leaves the graph unchanged.

use super::strategy::{endpoint_key, node_key, CdcStrategy, NodeKey};
use crate::event::{
    order_by_transaction, NodeChange, NodePayload, OperationType, Payload, RelationshipChange,
    RelationshipNodeChange, RelationshipPayload, StreamsTransactionEvent,
};
use crate::graph::{property_map, EdgeId, EdgeType, GraphError, GraphStore, Label, NodeId, PropertyMap};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Apply errors
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Event {id} is {operation} but has no {side} state")]
    MissingState {
        id: String,
        operation: OperationType,
        side: &'static str,
    },

    #[error("No identity key for {entity} {id}")]
    MissingKey { entity: &'static str, id: String },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

impl ApplyError {
    /// Errors caused by the event itself. The event is skipped and the rest of
    /// the batch still applies.
    pub fn is_data_error(&self) -> bool {
        match self {
            ApplyError::MissingState { .. } | ApplyError::MissingKey { .. } => true,
            ApplyError::Graph(GraphError::ConstraintViolation { .. }) => true,
            ApplyError::Graph(_) => false,
        }
    }
}

pub type ApplyResult<T> = Result<T, ApplyError>;

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: usize,
    pub skipped: usize,
}

impl ApplyReport {
    pub fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
    }
}

/// Stateless event applier for one identity strategy
#[derive(Debug, Clone, Default)]
pub struct EventApplier {
    strategy: CdcStrategy,
}

impl EventApplier {
    pub fn new(strategy: CdcStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &CdcStrategy {
        &self.strategy
    }

    /// Apply a batch: events are grouped by `txId` in order of first
    /// appearance and applied in ascending `txEventId` order within each
    /// transaction. Events with data errors are skipped and counted.
    pub fn apply_batch(
        &self,
        store: &mut GraphStore,
        events: Vec<StreamsTransactionEvent>,
    ) -> ApplyResult<ApplyReport> {
        let mut report = ApplyReport::default();
        for event in order_by_transaction(events) {
            match self.apply(store, &event) {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_data_error() => {
                    warn!(
                        tx_id = event.meta.tx_id,
                        tx_event_id = event.meta.tx_event_id,
                        "Skipping event: {}",
                        e
                    );
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        debug!(applied = report.applied, skipped = report.skipped, "Batch applied");
        Ok(report)
    }

    /// Apply a single event
    pub fn apply(&self, store: &mut GraphStore, event: &StreamsTransactionEvent) -> ApplyResult<()> {
        let operation = event.operation();
        match &event.payload {
            Payload::Node(node) => match operation {
                OperationType::Created | OperationType::Updated => {
                    let after = required(&node.after, &node.id, operation, "after")?;
                    self.upsert_node(store, node, after, event).map(|_| ())
                }
                OperationType::Deleted => self.delete_node(store, node, event),
            },
            Payload::Relationship(rel) => match operation {
                OperationType::Created | OperationType::Updated => {
                    let after = required(&rel.after, &rel.id, operation, "after")?;
                    self.upsert_relationship(store, rel, after, event)
                }
                OperationType::Deleted => self.delete_relationship(store, rel, event),
            },
        }
    }

    fn upsert_node(
        &self,
        store: &mut GraphStore,
        node: &NodePayload,
        after: &NodeChange,
        event: &StreamsTransactionEvent,
    ) -> ApplyResult<NodeId> {
        let mut labels: Vec<Label> = after.labels.iter().map(Label::new).collect();
        let mut properties = after.properties.clone();

        let keys = match &self.strategy {
            CdcStrategy::SourceId { id_name, label_name } => {
                let synthetic = Label::new(label_name.as_str());
                if !labels.contains(&synthetic) {
                    labels.push(synthetic);
                }
                properties.insert(id_name.clone(), node.id.clone().into());
                vec![source_id_key(id_name, label_name, &node.id)]
            }
            CdcStrategy::Schema { key_strategy } => {
                let constraints = &event.schema.constraints;
                let after_key = node_key(constraints, &after.labels, &after.properties, *key_strategy)
                    .ok_or_else(|| missing_key("node", &node.id))?;
                let before_key = node
                    .before
                    .as_ref()
                    .and_then(|b| node_key(constraints, &b.labels, &b.properties, *key_strategy));
                before_key.into_iter().chain(std::iter::once(after_key)).collect()
            }
        };

        let existing = keys
            .iter()
            .find_map(|key| store.find_nodes(&key.labels, &key.properties).first().copied());
        match existing {
            Some(id) => {
                store.update_node(id, labels, properties)?;
                Ok(id)
            }
            None => Ok(store.create_node_with_properties(labels, properties)?),
        }
    }

    fn delete_node(
        &self,
        store: &mut GraphStore,
        node: &NodePayload,
        event: &StreamsTransactionEvent,
    ) -> ApplyResult<()> {
        let key = match &self.strategy {
            CdcStrategy::SourceId { id_name, label_name } => source_id_key(id_name, label_name, &node.id),
            CdcStrategy::Schema { key_strategy } => {
                let before = required(&node.before, &node.id, OperationType::Deleted, "before")?;
                node_key(&event.schema.constraints, &before.labels, &before.properties, *key_strategy)
                    .ok_or_else(|| missing_key("node", &node.id))?
            }
        };

        let matches = store.find_nodes(&key.labels, &key.properties);
        if matches.is_empty() {
            debug!(id = %node.id, "Node to delete not found");
        }
        for id in matches {
            store.delete_node(id)?;
        }
        Ok(())
    }

    fn upsert_relationship(
        &self,
        store: &mut GraphStore,
        rel: &RelationshipPayload,
        after: &RelationshipChange,
        event: &StreamsTransactionEvent,
    ) -> ApplyResult<()> {
        let start = self.merge_endpoint(store, &rel.start, event)?;
        let end = self.merge_endpoint(store, &rel.end, event)?;
        let edge_type = EdgeType::new(rel.label.as_str());

        let mut properties = after.properties.clone();
        if let CdcStrategy::SourceId { id_name, .. } = &self.strategy {
            properties.insert(id_name.clone(), rel.id.clone().into());
        }

        match self.find_relationship(store, start, end, &edge_type, &rel.id) {
            Some(id) => store.replace_edge_properties(id, properties)?,
            None => {
                store.create_edge(start, end, edge_type, properties)?;
            }
        }
        Ok(())
    }

    fn delete_relationship(
        &self,
        store: &mut GraphStore,
        rel: &RelationshipPayload,
        event: &StreamsTransactionEvent,
    ) -> ApplyResult<()> {
        let start = self.endpoint_key(&rel.start, event)?;
        let end = self.endpoint_key(&rel.end, event)?;
        let start = store.find_nodes(&start.labels, &start.properties).first().copied();
        let end = store.find_nodes(&end.labels, &end.properties).first().copied();

        let (Some(start), Some(end)) = (start, end) else {
            debug!(id = %rel.id, "Relationship endpoints not found");
            return Ok(());
        };
        let edge_type = EdgeType::new(rel.label.as_str());
        if let Some(id) = self.find_relationship(store, start, end, &edge_type, &rel.id) {
            store.delete_edge(id)?;
        }
        Ok(())
    }

    fn endpoint_key(
        &self,
        endpoint: &RelationshipNodeChange,
        event: &StreamsTransactionEvent,
    ) -> ApplyResult<NodeKey> {
        match &self.strategy {
            CdcStrategy::SourceId { id_name, label_name } => {
                Ok(source_id_key(id_name, label_name, &endpoint.id))
            }
            CdcStrategy::Schema { .. } => endpoint_key(&event.schema.constraints, endpoint)
                .ok_or_else(|| missing_key("relationship endpoint", &endpoint.id)),
        }
    }

    /// Find the endpoint, creating it when absent
    fn merge_endpoint(
        &self,
        store: &mut GraphStore,
        endpoint: &RelationshipNodeChange,
        event: &StreamsTransactionEvent,
    ) -> ApplyResult<NodeId> {
        let key = self.endpoint_key(endpoint, event)?;
        if let Some(id) = store.find_nodes(&key.labels, &key.properties).first().copied() {
            return Ok(id);
        }

        let labels = match &self.strategy {
            CdcStrategy::SourceId { .. } => key.labels,
            CdcStrategy::Schema { .. } => endpoint.labels.iter().map(Label::new).collect(),
        };
        Ok(store.create_node_with_properties(labels, key.properties)?)
    }

    fn find_relationship(
        &self,
        store: &GraphStore,
        start: NodeId,
        end: NodeId,
        edge_type: &EdgeType,
        id: &str,
    ) -> Option<EdgeId> {
        let key = match &self.strategy {
            CdcStrategy::SourceId { id_name, .. } => property_map([(id_name.as_str(), id)]),
            CdcStrategy::Schema { .. } => PropertyMap::new(),
        };
        store.find_edges(start, end, edge_type, &key).first().copied()
    }
}

fn required<'a, T>(
    side: &'a Option<T>,
    id: &str,
    operation: OperationType,
    name: &'static str,
) -> ApplyResult<&'a T> {
    side.as_ref().ok_or_else(|| ApplyError::MissingState {
        id: id.to_string(),
        operation,
        side: name,
    })
}

/// `(label_name {id_name: id})`
fn source_id_key(id_name: &str, label_name: &str, id: &str) -> NodeKey {
    NodeKey {
        labels: vec![Label::new(label_name)],
        properties: property_map([(id_name, id)]),
    }
}

fn missing_key(entity: &'static str, id: &str) -> ApplyError {
    ApplyError::MissingKey {
        entity,
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Constraint, Meta, Schema};
    use crate::graph::PropertyValue;
    use crate::sink::KeyStrategy;

    fn meta(tx_id: i64, tx_event_id: i64, operation: OperationType) -> Meta {
        Meta {
            timestamp: 0,
            username: "neo4j".into(),
            tx_id,
            tx_event_id,
            tx_events_count: 3,
            operation,
            source: Default::default(),
        }
    }

    fn node_created(tx_event_id: i64, id: &str, labels: &[&str], properties: PropertyMap) -> StreamsTransactionEvent {
        StreamsTransactionEvent {
            meta: meta(1, tx_event_id, OperationType::Created),
            payload: NodePayload {
                id: id.into(),
                before: None,
                after: Some(NodeChange::new(properties, labels.iter().copied())),
            }
            .into(),
            schema: Schema::default(),
        }
    }

    fn node_deleted(id: &str, labels: &[&str], properties: PropertyMap) -> StreamsTransactionEvent {
        StreamsTransactionEvent {
            meta: meta(2, 0, OperationType::Deleted),
            payload: NodePayload {
                id: id.into(),
                before: Some(NodeChange::new(properties, labels.iter().copied())),
                after: None,
            }
            .into(),
            schema: Schema::default(),
        }
    }

    fn rel_created(tx_event_id: i64, id: &str, start: &str, end: &str) -> StreamsTransactionEvent {
        StreamsTransactionEvent {
            meta: meta(1, tx_event_id, OperationType::Created),
            payload: RelationshipPayload {
                id: id.into(),
                label: "KNOWS".into(),
                start: RelationshipNodeChange { id: start.into(), labels: vec!["User".into()], ids: PropertyMap::new() },
                end: RelationshipNodeChange { id: end.into(), labels: vec!["User".into()], ids: PropertyMap::new() },
                before: None,
                after: Some(RelationshipChange { properties: property_map([("since", 2014)]) }),
            }
            .into(),
            schema: Schema::default(),
        }
    }

    #[test]
    fn test_source_id_create_then_delete() {
        let applier = EventApplier::default();
        let mut store = GraphStore::new();

        applier
            .apply(&mut store, &node_created(0, "0", &["User"], property_map([("name", "Andrea")])))
            .unwrap();
        let nodes = store.find_nodes(&[Label::new("User"), Label::new("SourceEvent")], &property_map([("sourceId", "0")]));
        assert_eq!(nodes.len(), 1);

        let delete = node_deleted("0", &["User"], property_map([("name", "Andrea")]));
        applier.apply(&mut store, &delete).unwrap();
        assert_eq!(store.node_count(), 0);

        // redelivery
        applier.apply(&mut store, &delete).unwrap();
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn test_update_replaces_properties_and_labels() {
        let applier = EventApplier::default();
        let mut store = GraphStore::new();
        applier
            .apply(&mut store, &node_created(0, "0", &["User", "Admin"], property_map([("name", PropertyValue::from("Andrea")), ("age", 30.into())])))
            .unwrap();

        let updated = StreamsTransactionEvent {
            meta: meta(1, 1, OperationType::Updated),
            payload: NodePayload {
                id: "0".into(),
                before: Some(NodeChange::new(PropertyMap::new(), ["User", "Admin"])),
                after: Some(NodeChange::new(property_map([("name", "Andrea S")]), ["User"])),
            }
            .into(),
            schema: Schema::default(),
        };
        applier.apply(&mut store, &updated).unwrap();

        assert_eq!(store.node_count(), 1);
        let node = store.all_nodes()[0];
        assert!(!node.has_label(&Label::new("Admin")));
        assert!(node.get_property("age").is_none());
        assert_eq!(node.get_property("name"), Some(&PropertyValue::from("Andrea S")));
        assert_eq!(node.get_property("sourceId"), Some(&PropertyValue::from("0")));
    }

    #[test]
    fn test_relationship_upsert_is_idempotent() {
        let applier = EventApplier::default();
        let mut store = GraphStore::new();
        let batch = vec![
            node_created(0, "0", &["User"], property_map([("name", "Andrea")])),
            node_created(1, "1", &["User"], property_map([("name", "Michael")])),
            rel_created(2, "3", "0", "1"),
        ];

        let report = applier.apply_batch(&mut store, batch.clone()).unwrap();
        assert_eq!(report, ApplyReport { applied: 3, skipped: 0 });
        applier.apply_batch(&mut store, batch).unwrap();

        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 1);
        let edge = store.all_edges()[0];
        assert_eq!(edge.get_property("sourceId"), Some(&PropertyValue::from("3")));
        assert_eq!(edge.get_property("since"), Some(&PropertyValue::Integer(2014)));
    }

    #[test]
    fn test_batch_is_reordered_within_transaction() {
        let applier = EventApplier::default();
        let mut store = GraphStore::new();
        let batch = vec![
            rel_created(2, "3", "0", "1"),
            node_created(1, "1", &["User"], property_map([("name", "Michael")])),
            node_created(0, "0", &["User"], property_map([("name", "Andrea")])),
        ];
        applier.apply_batch(&mut store, batch).unwrap();

        // endpoints existed before the relationship was merged, so no placeholders
        assert_eq!(store.node_count(), 2);
        assert!(store.all_nodes().iter().all(|n| n.has_label(&Label::new("User"))));
    }

    #[test]
    fn test_schema_mode_skips_events_without_key() {
        let applier = EventApplier::new(CdcStrategy::schema(KeyStrategy::Default));
        let mut store = GraphStore::new();

        let mut keyed = node_created(0, "0", &["User"], property_map([("name", "Andrea"), ("surname", "S")]));
        keyed.schema.constraints = vec![Constraint::unique("User", ["name", "surname"])];
        let unkeyed = node_created(1, "1", &["User"], property_map([("name", "Michael")]));

        let report = applier.apply_batch(&mut store, vec![keyed, unkeyed]).unwrap();
        assert_eq!(report, ApplyReport { applied: 1, skipped: 1 });
        assert_eq!(store.node_count(), 1);
        assert!(store.all_nodes()[0].get_property("sourceId").is_none());
    }

    #[test]
    fn test_missing_after_state_is_a_data_error() {
        let applier = EventApplier::default();
        let mut store = GraphStore::new();
        let mut event = node_created(0, "0", &["User"], PropertyMap::new());
        if let Payload::Node(node) = &mut event.payload {
            node.after = None;
        }
        let err = applier.apply(&mut store, &event).unwrap_err();
        assert!(err.is_data_error());
        assert!(matches!(err, ApplyError::MissingState { side: "after", .. }));
    }

    #[test]
    fn test_relationship_delete_never_creates_endpoints() {
        let applier = EventApplier::default();
        let mut store = GraphStore::new();
        let mut event = rel_created(0, "3", "0", "1");
        event.meta.operation = OperationType::Deleted;
        if let Payload::Relationship(rel) = &mut event.payload {
            rel.before = rel.after.take();
        }
        applier.apply(&mut store, &event).unwrap();
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn test_rejected_update_leaves_node_untouched() {
        let applier = EventApplier::default();
        let mut store = GraphStore::new();
        store
            .create_constraint(crate::graph::ConstraintDefinition::unique("User", &["email"]))
            .unwrap();
        store
            .create_node_with_properties(vec![Label::new("User")], property_map([("email", "x@y")]))
            .unwrap();
        applier
            .apply(&mut store, &node_created(0, "0", &["Guest"], property_map([("email", "other")])))
            .unwrap();

        let promoted = StreamsTransactionEvent {
            meta: meta(2, 0, OperationType::Updated),
            payload: NodePayload {
                id: "0".into(),
                before: Some(NodeChange::new(property_map([("email", "other")]), ["Guest"])),
                after: Some(NodeChange::new(property_map([("email", "x@y")]), ["User"])),
            }
            .into(),
            schema: Schema::default(),
        };
        let report = applier.apply_batch(&mut store, vec![promoted]).unwrap();
        assert_eq!(report, ApplyReport { applied: 0, skipped: 1 });

        let id = store.find_nodes(&[Label::new("SourceEvent")], &property_map([("sourceId", "0")]))[0];
        let node = store.get_node(id).unwrap();
        assert_eq!(node.label_names(), vec!["Guest".to_string(), "SourceEvent".to_string()]);
        assert_eq!(node.get_property("email"), Some(&PropertyValue::from("other")));
        assert_eq!(store.find_nodes(&[Label::new("User")], &PropertyMap::new()).len(), 1);
    }
}
