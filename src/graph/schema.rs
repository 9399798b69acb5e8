//! Schema constraints declared on the graph store

use super::types::{EdgeType, Label};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a constraint enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// The property combination is unique among entities of the target
    Unique,
    /// Every entity of the target carries the properties
    PropertyExists,
}

/// The label or relationship type a constraint is declared on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintTarget {
    Label(Label),
    RelationshipType(EdgeType),
}

impl ConstraintTarget {
    pub fn name(&self) -> &str {
        match self {
            ConstraintTarget::Label(label) => label.as_str(),
            ConstraintTarget::RelationshipType(edge_type) => edge_type.as_str(),
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, ConstraintTarget::Label(_))
    }
}

/// A constraint as declared in the database catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstraintDefinition {
    pub kind: ConstraintKind,
    pub target: ConstraintTarget,
    pub property_keys: Vec<String>,
}

impl ConstraintDefinition {
    pub fn unique(label: impl Into<Label>, property_keys: &[&str]) -> Self {
        Self {
            kind: ConstraintKind::Unique,
            target: ConstraintTarget::Label(label.into()),
            property_keys: property_keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn node_exists(label: impl Into<Label>, property_keys: &[&str]) -> Self {
        Self {
            kind: ConstraintKind::PropertyExists,
            target: ConstraintTarget::Label(label.into()),
            property_keys: property_keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn relationship_exists(edge_type: impl Into<EdgeType>, property_keys: &[&str]) -> Self {
        Self {
            kind: ConstraintKind::PropertyExists,
            target: ConstraintTarget::RelationshipType(edge_type.into()),
            property_keys: property_keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn is_node_constraint(&self) -> bool {
        self.target.is_node()
    }

    pub fn is_relationship_constraint(&self) -> bool {
        !self.target.is_node()
    }
}

impl fmt::Display for ConstraintDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::PropertyExists => "EXISTS",
        };
        write!(f, "{} ON {}({})", kind, self.target.name(), self.property_keys.join(", "))
    }
}
