//! CDC event data shapes
//!
//! Events are built once, at capture time, and treated as immutable values
//! from then on. The JSON field names match the wire format consumed by
//! existing sink deployments (`txId`, `txEventId`, ...).

use crate::graph::{PropertyMap, PropertyValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of mutation an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Created => "created",
            OperationType::Updated => "updated",
            OperationType::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Transaction metadata carried by every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Commit time, Unix milliseconds
    pub timestamp: i64,
    pub username: String,
    pub tx_id: i64,
    /// Zero-based position of this event inside its transaction
    pub tx_event_id: i64,
    pub tx_events_count: i64,
    pub operation: OperationType,
    /// Origin details such as the emitting hostname
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub source: IndexMap<String, String>,
}

/// Kind of a declared constraint, as named on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamsConstraintType {
    Unique,
    NodePropertyExists,
    RelationshipPropertyExists,
}

/// One declared uniqueness / existence rule
///
/// `label` is the entity key: a node label for node constraints or a
/// relationship type for relationship constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Constraint {
    pub label: String,
    pub properties: BTreeSet<String>,
    #[serde(rename = "type")]
    pub constraint_type: StreamsConstraintType,
}

impl Constraint {
    pub fn new<I, S>(label: impl Into<String>, properties: I, constraint_type: StreamsConstraintType) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            properties: properties.into_iter().map(Into::into).collect(),
            constraint_type,
        }
    }

    pub fn unique<I, S>(label: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(label, properties, StreamsConstraintType::Unique)
    }

    pub fn is_unique(&self) -> bool {
        self.constraint_type == StreamsConstraintType::Unique
    }
}

/// Schema attached to an event: property types plus applicable constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Property name -> declared type name
    #[serde(default)]
    pub properties: IndexMap<String, String>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Schema {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.constraints.is_empty()
    }
}

/// Full state of a node at one side of a transition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeChange {
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl NodeChange {
    /// Labels are deduplicated, first occurrence wins
    pub fn new<I, S>(properties: PropertyMap, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for label in labels.into_iter().map(Into::into) {
            if !unique.contains(&label) {
                unique.push(label);
            }
        }
        Self { properties, labels: unique }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Relationship endpoint, identified by internal id and, when constraints are
/// known, by its natural key in `ids`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipNodeChange {
    pub id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub ids: PropertyMap,
}

/// Relationship state at one side of a transition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipChange {
    #[serde(default)]
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    pub id: String,
    #[serde(default)]
    pub before: Option<NodeChange>,
    #[serde(default)]
    pub after: Option<NodeChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPayload {
    pub id: String,
    /// Relationship type
    pub label: String,
    pub start: RelationshipNodeChange,
    pub end: RelationshipNodeChange,
    #[serde(default)]
    pub before: Option<RelationshipChange>,
    #[serde(default)]
    pub after: Option<RelationshipChange>,
}

/// Node or relationship change
///
/// Untagged on the wire: a payload carrying `start`/`end`/`label` decodes as a
/// relationship, anything else with an `id` as a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Relationship(RelationshipPayload),
    Node(NodePayload),
}

impl Payload {
    pub fn id(&self) -> &str {
        match self {
            Payload::Node(node) => &node.id,
            Payload::Relationship(rel) => &rel.id,
        }
    }

    pub fn as_node(&self) -> Option<&NodePayload> {
        match self {
            Payload::Node(node) => Some(node),
            Payload::Relationship(_) => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&RelationshipPayload> {
        match self {
            Payload::Relationship(rel) => Some(rel),
            Payload::Node(_) => None,
        }
    }

    /// Operation implied by which sides of the transition are present
    pub fn inferred_operation(&self) -> Option<OperationType> {
        let (before, after) = match self {
            Payload::Node(node) => (node.before.is_some(), node.after.is_some()),
            Payload::Relationship(rel) => (rel.before.is_some(), rel.after.is_some()),
        };
        match (before, after) {
            (false, true) => Some(OperationType::Created),
            (true, true) => Some(OperationType::Updated),
            (true, false) => Some(OperationType::Deleted),
            (false, false) => None,
        }
    }
}

impl From<NodePayload> for Payload {
    fn from(payload: NodePayload) -> Self {
        Payload::Node(payload)
    }
}

impl From<RelationshipPayload> for Payload {
    fn from(payload: RelationshipPayload) -> Self {
        Payload::Relationship(payload)
    }
}

/// The atomic unit of transport: one change of one entity in one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamsTransactionEvent {
    pub meta: Meta,
    pub payload: Payload,
    #[serde(default)]
    pub schema: Schema,
}

impl StreamsTransactionEvent {
    pub fn operation(&self) -> OperationType {
        self.meta.operation
    }
}

/// A message sent by user code rather than captured from a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamsPublishedEvent {
    pub meta: PublishedMeta,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedMeta {
    pub timestamp: i64,
    pub username: String,
    #[serde(default)]
    pub source: IndexMap<String, String>,
}

/// Anything a router can be handed
#[derive(Debug, Clone, PartialEq)]
pub enum StreamsEvent {
    Transaction(StreamsTransactionEvent),
    Published(StreamsPublishedEvent),
}

impl StreamsEvent {
    pub fn as_transaction(&self) -> Option<&StreamsTransactionEvent> {
        match self {
            StreamsEvent::Transaction(event) => Some(event),
            StreamsEvent::Published(_) => None,
        }
    }
}

impl From<StreamsTransactionEvent> for StreamsEvent {
    fn from(event: StreamsTransactionEvent) -> Self {
        StreamsEvent::Transaction(event)
    }
}

impl From<StreamsPublishedEvent> for StreamsEvent {
    fn from(event: StreamsPublishedEvent) -> Self {
        StreamsEvent::Published(event)
    }
}

/// Schema property section for a property map: name -> type name
pub fn schema_properties(properties: &PropertyMap) -> IndexMap<String, String> {
    properties
        .iter()
        .map(|(k, v): (&String, &PropertyValue)| (k.clone(), v.type_name().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::property_map;

    #[test]
    fn test_node_change_dedups_labels() {
        let change = NodeChange::new(PropertyMap::new(), ["User", "Admin", "User"]);
        assert_eq!(change.labels, vec!["User", "Admin"]);
        assert!(change.has_label("Admin"));
    }

    #[test]
    fn test_inferred_operation() {
        let created: Payload = NodePayload {
            id: "0".into(),
            before: None,
            after: Some(NodeChange::default()),
        }
        .into();
        assert_eq!(created.inferred_operation(), Some(OperationType::Created));

        let deleted: Payload = NodePayload {
            id: "0".into(),
            before: Some(NodeChange::default()),
            after: None,
        }
        .into();
        assert_eq!(deleted.inferred_operation(), Some(OperationType::Deleted));
    }

    #[test]
    fn test_constraint_properties_are_a_set() {
        let a = Constraint::unique("User", ["surname", "name"]);
        let b = Constraint::unique("User", ["name", "surname", "name"]);
        assert_eq!(a, b);
        assert_eq!(a.properties.iter().cloned().collect::<Vec<_>>(), vec!["name", "surname"]);
        assert!(a.is_unique());
    }

    #[test]
    fn test_schema_properties() {
        let props = property_map([("name", PropertyValue::from("Andrea")), ("since", 2014.into())]);
        let schema = schema_properties(&props);
        assert_eq!(schema.get("name").map(String::as_str), Some("String"));
        assert_eq!(schema.get("since").map(String::as_str), Some("Long"));
    }
}
