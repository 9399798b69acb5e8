//! Node implementation for the property graph

use super::property::{PropertyMap, PropertyValue};
use super::types::{Label, NodeId};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// A node in the property graph
///
/// Labels are kept as an insertion-ordered set so that a node written from a
/// CDC event reports its labels in the order the event listed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Internal identifier for this node
    pub id: NodeId,

    /// Ordered set of labels
    pub labels: IndexSet<Label>,

    /// Properties associated with this node
    pub properties: PropertyMap,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Node {
    /// Create a new node with a single label
    pub fn new(id: NodeId, label: impl Into<Label>) -> Self {
        Self::new_with_properties(id, vec![label.into()], PropertyMap::new())
    }

    /// Create a new node with labels and properties
    pub fn new_with_properties(id: NodeId, labels: Vec<Label>, properties: PropertyMap) -> Self {
        let now = chrono::Utc::now().timestamp_millis();

        Node {
            id,
            labels: labels.into_iter().collect(),
            properties,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a label; returns false if it was already present
    pub fn add_label(&mut self, label: impl Into<Label>) -> bool {
        let added = self.labels.insert(label.into());
        if added {
            self.update_timestamp();
        }
        added
    }

    /// Remove a label from this node
    pub fn remove_label(&mut self, label: &Label) -> bool {
        let removed = self.labels.shift_remove(label);
        if removed {
            self.update_timestamp();
        }
        removed
    }

    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }

    /// True if the node carries every label in `labels`
    pub fn has_all_labels(&self, labels: &[Label]) -> bool {
        labels.iter().all(|l| self.labels.contains(l))
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.as_str().to_string()).collect()
    }

    /// Set a property value, returning the previous one
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        let old = self.properties.insert(key.into(), value.into());
        self.update_timestamp();
        old
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Replace the whole property set
    pub fn replace_properties(&mut self, properties: PropertyMap) {
        self.properties = properties;
        self.update_timestamp();
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    fn update_timestamp(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
