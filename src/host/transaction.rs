//! Committed transaction data handed to transaction listeners

use crate::graph::{EdgeId, EdgeType, Label, Node, NodeId, PropertyMap};

/// A node as seen at one side of a commit
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub labels: Vec<Label>,
    pub properties: PropertyMap,
}

impl NodeSnapshot {
    pub fn new(id: NodeId, labels: Vec<Label>, properties: PropertyMap) -> Self {
        Self { id, labels, properties }
    }
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id,
            labels: node.labels.iter().cloned().collect(),
            properties: node.properties.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeStateChange {
    pub id: NodeId,
    pub before: Option<NodeSnapshot>,
    pub after: Option<NodeSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipStateChange {
    pub id: EdgeId,
    pub edge_type: EdgeType,
    pub start: NodeSnapshot,
    pub end: NodeSnapshot,
    pub before: Option<PropertyMap>,
    pub after: Option<PropertyMap>,
}

/// One entity touched by a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    Node(NodeStateChange),
    Relationship(RelationshipStateChange),
}

impl EntityChange {
    pub fn node_created(after: NodeSnapshot) -> Self {
        EntityChange::Node(NodeStateChange { id: after.id, before: None, after: Some(after) })
    }

    pub fn node_updated(before: NodeSnapshot, after: NodeSnapshot) -> Self {
        EntityChange::Node(NodeStateChange { id: after.id, before: Some(before), after: Some(after) })
    }

    pub fn node_deleted(before: NodeSnapshot) -> Self {
        EntityChange::Node(NodeStateChange { id: before.id, before: Some(before), after: None })
    }

    pub fn relationship_created(
        id: EdgeId,
        edge_type: impl Into<EdgeType>,
        start: NodeSnapshot,
        end: NodeSnapshot,
        after: PropertyMap,
    ) -> Self {
        EntityChange::Relationship(RelationshipStateChange {
            id,
            edge_type: edge_type.into(),
            start,
            end,
            before: None,
            after: Some(after),
        })
    }

    pub fn relationship_deleted(
        id: EdgeId,
        edge_type: impl Into<EdgeType>,
        start: NodeSnapshot,
        end: NodeSnapshot,
        before: PropertyMap,
    ) -> Self {
        EntityChange::Relationship(RelationshipStateChange {
            id,
            edge_type: edge_type.into(),
            start,
            end,
            before: Some(before),
            after: None,
        })
    }
}

/// Everything a listener learns about one committed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionData {
    pub tx_id: i64,
    pub username: String,
    /// Commit time, Unix milliseconds
    pub timestamp: i64,
    pub changes: Vec<EntityChange>,
}

impl TransactionData {
    pub fn new(tx_id: i64, username: impl Into<String>) -> Self {
        Self {
            tx_id,
            username: username.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            changes: Vec::new(),
        }
    }

    pub fn with_change(mut self, change: EntityChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
