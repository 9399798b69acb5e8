//! In-memory graph storage
//!
//! Backs both the embedded host database (where committed changes are
//! captured) and the sink target (where CDC events are replayed).

use super::edge::Edge;
use super::node::Node;
use super::property::{contains_all, PropertyMap, PropertyValue};
use super::schema::{ConstraintDefinition, ConstraintKind, ConstraintTarget};
use super::types::{EdgeId, EdgeType, Label, NodeId};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

/// Errors that can occur during graph operations
#[derive(Error, Debug, PartialEq)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Edge {0} not found")]
    EdgeNotFound(EdgeId),

    #[error("Invalid edge: source node {0} does not exist")]
    InvalidEdgeSource(NodeId),

    #[error("Invalid edge: target node {0} does not exist")]
    InvalidEdgeTarget(NodeId),

    #[error("Constraint {constraint} violated: already satisfied by {existing}")]
    ConstraintViolation {
        constraint: String,
        existing: NodeId,
    },

    #[error("Constraint already exists: {0}")]
    ConstraintAlreadyExists(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// In-memory graph storage
///
/// Arena layout indexed by id:
/// - nodes / edges: id -> slot (None once deleted, id goes to the free list)
/// - outgoing / incoming: NodeId -> Vec<EdgeId>
/// - label_index: Label -> NodeIds
/// - edge_type_index: EdgeType -> EdgeIds
#[derive(Debug)]
pub struct GraphStore {
    nodes: Vec<Option<Node>>,
    edges: Vec<Option<Edge>>,
    outgoing: Vec<Vec<EdgeId>>,
    incoming: Vec<Vec<EdgeId>>,
    free_node_ids: Vec<u64>,
    free_edge_ids: Vec<u64>,
    label_index: FxHashMap<Label, FxHashSet<NodeId>>,
    edge_type_index: FxHashMap<EdgeType, FxHashSet<EdgeId>>,
    /// Declared schema constraints
    constraints: Vec<ConstraintDefinition>,
    next_node_id: u64,
    next_edge_id: u64,
}

impl GraphStore {
    /// Create a new empty graph store
    pub fn new() -> Self {
        GraphStore {
            nodes: Vec::with_capacity(1024),
            edges: Vec::with_capacity(4096),
            outgoing: Vec::with_capacity(1024),
            incoming: Vec::with_capacity(1024),
            free_node_ids: Vec::new(),
            free_edge_ids: Vec::new(),
            label_index: FxHashMap::default(),
            edge_type_index: FxHashMap::default(),
            constraints: Vec::new(),
            next_node_id: 1,
            next_edge_id: 1,
        }
    }

    // ============================================================
    // Nodes
    // ============================================================

    /// Create a node with a single label and no properties
    pub fn create_node(&mut self, label: impl Into<Label>) -> NodeId {
        self.insert_node(vec![label.into()], PropertyMap::new())
    }

    /// Create a node with labels and properties, enforcing unique constraints
    pub fn create_node_with_properties(
        &mut self,
        labels: Vec<Label>,
        properties: PropertyMap,
    ) -> GraphResult<NodeId> {
        self.check_unique(&labels, &properties, None)?;
        Ok(self.insert_node(labels, properties))
    }

    fn insert_node(&mut self, labels: Vec<Label>, properties: PropertyMap) -> NodeId {
        let node_id_u64 = match self.free_node_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.next_node_id;
                self.next_node_id += 1;
                id
            }
        };
        let node_id = NodeId::new(node_id_u64);
        let idx = node_id_u64 as usize;

        if idx >= self.nodes.len() {
            self.nodes.resize(idx + 1, None);
            self.outgoing.resize(idx + 1, Vec::new());
            self.incoming.resize(idx + 1, Vec::new());
        }

        let node = Node::new_with_properties(node_id, labels, properties);
        for label in &node.labels {
            self.label_index.entry(label.clone()).or_default().insert(node_id);
        }

        self.nodes[idx] = Some(node);
        node_id
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_u64() as usize)?.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.nodes
            .get_mut(id.as_u64() as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(GraphError::NodeNotFound(id))
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.get_node(id).is_some()
    }

    /// Set a single property on a node
    pub fn set_node_property(
        &mut self,
        node_id: NodeId,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> GraphResult<Option<PropertyValue>> {
        let key = key.into();
        let value = value.into();
        let node = self.get_node(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let mut next = node.properties.clone();
        next.insert(key.clone(), value.clone());
        let labels: Vec<Label> = node.labels.iter().cloned().collect();
        self.check_unique(&labels, &next, Some(node_id))?;

        Ok(self.node_mut(node_id)?.set_property(key, value))
    }

    /// Replace the full property set of a node
    pub fn replace_node_properties(&mut self, node_id: NodeId, properties: PropertyMap) -> GraphResult<()> {
        let node = self.get_node(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        let labels: Vec<Label> = node.labels.iter().cloned().collect();
        self.check_unique(&labels, &properties, Some(node_id))?;

        self.node_mut(node_id)?.replace_properties(properties);
        Ok(())
    }

    /// Make the node's label set exactly `labels`, keeping the label index in sync
    pub fn set_node_labels(&mut self, node_id: NodeId, labels: Vec<Label>) -> GraphResult<()> {
        let node = self.get_node(node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        self.check_unique(&labels, &node.properties, Some(node_id))?;
        self.apply_labels(node_id, labels)
    }

    /// Replace both labels and properties of a node. Unique constraints are
    /// checked against the new state as a whole; on error nothing changes.
    pub fn update_node(&mut self, node_id: NodeId, labels: Vec<Label>, properties: PropertyMap) -> GraphResult<()> {
        if !self.has_node(node_id) {
            return Err(GraphError::NodeNotFound(node_id));
        }
        self.check_unique(&labels, &properties, Some(node_id))?;

        self.node_mut(node_id)?.replace_properties(properties);
        self.apply_labels(node_id, labels)
    }

    fn apply_labels(&mut self, node_id: NodeId, labels: Vec<Label>) -> GraphResult<()> {
        let node = self.node_mut(node_id)?;
        let removed: Vec<Label> = node
            .labels
            .iter()
            .filter(|l| !labels.contains(l))
            .cloned()
            .collect();
        for label in &removed {
            node.remove_label(label);
        }
        let mut added = Vec::new();
        for label in labels {
            if node.add_label(label.clone()) {
                added.push(label);
            }
        }

        for label in removed {
            if let Some(ids) = self.label_index.get_mut(&label) {
                ids.remove(&node_id);
            }
        }
        for label in added {
            self.label_index.entry(label).or_default().insert(node_id);
        }
        Ok(())
    }

    /// Delete a node together with all its connected edges
    pub fn delete_node(&mut self, id: NodeId) -> GraphResult<Node> {
        let idx = id.as_u64() as usize;
        let node = self
            .nodes
            .get_mut(idx)
            .and_then(|slot| slot.take())
            .ok_or(GraphError::NodeNotFound(id))?;

        for label in &node.labels {
            if let Some(ids) = self.label_index.get_mut(label) {
                ids.remove(&id);
            }
        }

        let outgoing_edges = std::mem::take(&mut self.outgoing[idx]);
        let incoming_edges = std::mem::take(&mut self.incoming[idx]);
        for edge_id in outgoing_edges.iter().chain(incoming_edges.iter()) {
            // self-loops show up in both lists
            let _ = self.delete_edge(*edge_id);
        }

        self.free_node_ids.push(id.as_u64());
        Ok(node)
    }

    /// Ids of nodes carrying every label in `labels` and every entry of `properties`,
    /// in ascending id order
    pub fn find_nodes(&self, labels: &[Label], properties: &PropertyMap) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = match labels.iter().min_by_key(|l| self.label_cardinality(l)) {
            Some(seed) => self
                .label_index
                .get(seed)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            None => self.all_nodes().iter().map(|n| n.id).collect(),
        };

        ids.retain(|id| {
            self.get_node(*id).map_or(false, |node| {
                node.has_all_labels(labels) && contains_all(&node.properties, properties)
            })
        });
        ids.sort();
        ids
    }

    fn label_cardinality(&self, label: &Label) -> usize {
        self.label_index.get(label).map_or(0, |ids| ids.len())
    }

    /// Get all nodes with a specific label
    pub fn get_nodes_by_label(&self, label: &Label) -> Vec<&Node> {
        self.label_index
            .get(label)
            .map(|ids| ids.iter().filter_map(|&id| self.get_node(id)).collect())
            .unwrap_or_default()
    }

    // ============================================================
    // Edges
    // ============================================================

    /// Create an edge with properties between two existing nodes
    pub fn create_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: impl Into<EdgeType>,
        properties: PropertyMap,
    ) -> GraphResult<EdgeId> {
        if !self.has_node(source) {
            return Err(GraphError::InvalidEdgeSource(source));
        }
        if !self.has_node(target) {
            return Err(GraphError::InvalidEdgeTarget(target));
        }

        let edge_id_u64 = match self.free_edge_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.next_edge_id;
                self.next_edge_id += 1;
                id
            }
        };
        let edge_id = EdgeId::new(edge_id_u64);
        let idx = edge_id_u64 as usize;

        let edge_type = edge_type.into();
        let edge = Edge::new_with_properties(edge_id, source, target, edge_type.clone(), properties);

        self.outgoing[source.as_u64() as usize].push(edge_id);
        self.incoming[target.as_u64() as usize].push(edge_id);

        if idx >= self.edges.len() {
            self.edges.resize(idx + 1, None);
        }

        self.edge_type_index.entry(edge_type).or_default().insert(edge_id);

        self.edges[idx] = Some(edge);
        Ok(edge_id)
    }

    pub fn get_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.as_u64() as usize)?.as_ref()
    }

    /// Replace the full property set of an edge
    pub fn replace_edge_properties(&mut self, id: EdgeId, properties: PropertyMap) -> GraphResult<()> {
        let edge = self
            .edges
            .get_mut(id.as_u64() as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(GraphError::EdgeNotFound(id))?;
        edge.properties = properties;
        Ok(())
    }

    /// Delete an edge
    pub fn delete_edge(&mut self, id: EdgeId) -> GraphResult<Edge> {
        let idx = id.as_u64() as usize;
        let edge = self
            .edges
            .get_mut(idx)
            .and_then(|slot| slot.take())
            .ok_or(GraphError::EdgeNotFound(id))?;

        self.free_edge_ids.push(id.as_u64());

        if let Some(ids) = self.edge_type_index.get_mut(&edge.edge_type) {
            ids.remove(&id);
        }
        if let Some(adj) = self.outgoing.get_mut(edge.source.as_u64() as usize) {
            adj.retain(|&eid| eid != id);
        }
        if let Some(adj) = self.incoming.get_mut(edge.target.as_u64() as usize) {
            adj.retain(|&eid| eid != id);
        }

        Ok(edge)
    }

    /// Get all outgoing edges from a node
    pub fn get_outgoing_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.outgoing
            .get(node_id.as_u64() as usize)
            .map(|ids| ids.iter().filter_map(|&id| self.get_edge(id)).collect())
            .unwrap_or_default()
    }

    /// Get all incoming edges to a node
    pub fn get_incoming_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.incoming
            .get(node_id.as_u64() as usize)
            .map(|ids| ids.iter().filter_map(|&id| self.get_edge(id)).collect())
            .unwrap_or_default()
    }

    /// Ids of `edge_type` edges from `source` to `target` carrying every entry of
    /// `properties`, in creation order
    pub fn find_edges(
        &self,
        source: NodeId,
        target: NodeId,
        edge_type: &EdgeType,
        properties: &PropertyMap,
    ) -> Vec<EdgeId> {
        self.get_outgoing_edges(source)
            .into_iter()
            .filter(|e| {
                e.target == target && &e.edge_type == edge_type && contains_all(&e.properties, properties)
            })
            .map(|e| e.id)
            .collect()
    }

    /// Get all edges of a specific type
    pub fn get_edges_by_type(&self, edge_type: &EdgeType) -> Vec<&Edge> {
        self.edge_type_index
            .get(edge_type)
            .map(|ids| ids.iter().filter_map(|&id| self.get_edge(id)).collect())
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    pub fn all_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().flatten().collect()
    }

    pub fn all_edges(&self) -> Vec<&Edge> {
        self.edges.iter().flatten().collect()
    }

    /// Clear all data, keeping declared constraints
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.free_node_ids.clear();
        self.free_edge_ids.clear();
        self.label_index.clear();
        self.edge_type_index.clear();
        self.next_node_id = 1;
        self.next_edge_id = 1;
    }

    // ============================================================
    // Schema
    // ============================================================

    /// Declare a constraint
    pub fn create_constraint(&mut self, constraint: ConstraintDefinition) -> GraphResult<()> {
        if self.constraints.contains(&constraint) {
            return Err(GraphError::ConstraintAlreadyExists(constraint.to_string()));
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Drop a constraint; returns false if it was not declared
    pub fn drop_constraint(&mut self, constraint: &ConstraintDefinition) -> bool {
        let before = self.constraints.len();
        self.constraints.retain(|c| c != constraint);
        self.constraints.len() != before
    }

    pub fn constraints(&self) -> &[ConstraintDefinition] {
        &self.constraints
    }

    fn check_unique(&self, labels: &[Label], properties: &PropertyMap, ignore: Option<NodeId>) -> GraphResult<()> {
        for constraint in &self.constraints {
            let label = match (&constraint.kind, &constraint.target) {
                (ConstraintKind::Unique, ConstraintTarget::Label(label)) if labels.contains(label) => label,
                _ => continue,
            };
            let key: Option<PropertyMap> = constraint
                .property_keys
                .iter()
                .map(|k| properties.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            let Some(key) = key else { continue };

            if let Some(existing) = self
                .find_nodes(std::slice::from_ref(label), &key)
                .into_iter()
                .find(|id| Some(*id) != ignore)
            {
                return Err(GraphError::ConstraintViolation {
                    constraint: constraint.to_string(),
                    existing,
                });
            }
        }
        Ok(())
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}
