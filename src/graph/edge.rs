//! Edge implementation for the property graph

use super::property::{PropertyMap, PropertyValue};
use super::types::{EdgeId, EdgeType, NodeId};
use serde::{Deserialize, Serialize};

/// A directed, typed edge in the property graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,

    /// Source node (edge goes FROM this node)
    pub source: NodeId,

    /// Target node (edge goes TO this node)
    pub target: NodeId,

    pub edge_type: EdgeType,

    pub properties: PropertyMap,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl Edge {
    /// Create a new edge with properties
    pub fn new_with_properties(
        id: EdgeId,
        source: NodeId,
        target: NodeId,
        edge_type: impl Into<EdgeType>,
        properties: PropertyMap,
    ) -> Self {
        Edge {
            id,
            source,
            target,
            edge_type: edge_type.into(),
            properties,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Check if this edge goes from `source` to `target`
    pub fn links(&self, source: NodeId, target: NodeId) -> bool {
        self.source == source && self.target == target
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_direction() {
        let mut edge = Edge::new_with_properties(
            EdgeId::new(1),
            NodeId::new(1),
            NodeId::new(2),
            "KNOWS WHO",
            PropertyMap::new(),
        );
        edge.set_property("since", 2014);

        assert!(edge.links(NodeId::new(1), NodeId::new(2)));
        assert!(!edge.links(NodeId::new(2), NodeId::new(1)));
        assert_eq!(edge.get_property("since").unwrap().as_integer(), Some(2014));
        assert_eq!(edge.edge_type.as_str(), "KNOWS WHO");
    }
}
