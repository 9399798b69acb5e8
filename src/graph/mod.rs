//! Core property graph
//!
//! This module implements the property graph data model the CDC pipeline
//! reads from and writes to:
//! - Nodes with an ordered set of labels and ordered properties
//! - Directed, typed edges with properties
//! - Label / edge-type indices and a schema constraint catalog

pub mod edge;
pub mod node;
pub mod property;
pub mod schema;
pub mod store;
pub mod types;

pub use edge::Edge;
pub use node::Node;
pub use property::{contains_all, property_map, PropertyMap, PropertyValue};
pub use schema::{ConstraintDefinition, ConstraintKind, ConstraintTarget};
pub use store::{GraphError, GraphResult, GraphStore};
pub use types::{quote_identifier, EdgeId, EdgeType, Label, NodeId};
