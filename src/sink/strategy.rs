//! Identity strategies for replayed CDC events

use crate::event::{Constraint, RelationshipNodeChange};
use crate::graph::{Label, PropertyMap};
use serde::{Deserialize, Serialize};

/// Default synthetic identity property name
pub const DEFAULT_ID_NAME: &str = "sourceId";
/// Default synthetic identity label
pub const DEFAULT_LABEL_NAME: &str = "SourceEvent";

/// How schema mode picks a node key when several UNIQUE constraints apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// The smallest applicable constraint
    #[default]
    Default,
    /// The union of every applicable constraint
    All,
}

/// How replayed entities are identified in the target graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdcStrategy {
    /// Carry the source's internal id in a synthetic property (and label)
    SourceId { id_name: String, label_name: String },
    /// Match on the natural keys declared by UNIQUE constraints
    Schema { key_strategy: KeyStrategy },
}

impl CdcStrategy {
    pub fn source_id(id_name: impl Into<String>, label_name: impl Into<String>) -> Self {
        CdcStrategy::SourceId {
            id_name: id_name.into(),
            label_name: label_name.into(),
        }
    }

    pub fn schema(key_strategy: KeyStrategy) -> Self {
        CdcStrategy::Schema { key_strategy }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CdcStrategy::SourceId { .. } => "source-id",
            CdcStrategy::Schema { .. } => "schema",
        }
    }
}

impl Default for CdcStrategy {
    fn default() -> Self {
        Self::source_id(DEFAULT_ID_NAME, DEFAULT_LABEL_NAME)
    }
}

/// Labels to match on plus the key properties identifying one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeKey {
    pub labels: Vec<Label>,
    pub properties: PropertyMap,
}

/// UNIQUE constraints declared on one of `labels` whose properties are all in `available`
fn applicable<'a, F>(constraints: &'a [Constraint], labels: &'a [String], available: F) -> Vec<&'a Constraint>
where
    F: Fn(&str) -> bool,
{
    constraints
        .iter()
        .filter(|c| c.is_unique() && labels.contains(&c.label))
        .filter(|c| !c.properties.is_empty() && c.properties.iter().all(|p| available(p.as_str())))
        .collect()
}

fn key_from(chosen: &[&Constraint], properties: &PropertyMap) -> NodeKey {
    let mut labels: Vec<Label> = Vec::new();
    let mut key = PropertyMap::new();
    for constraint in chosen {
        let label = Label::new(constraint.label.as_str());
        if !labels.contains(&label) {
            labels.push(label);
        }
        for property in &constraint.properties {
            if let Some(value) = properties.get(property) {
                key.insert(property.clone(), value.clone());
            }
        }
    }
    NodeKey { labels, properties: key }
}

/// Natural key of a node state, or `None` when no UNIQUE constraint of its
/// labels is fully covered by its properties
pub fn node_key(
    constraints: &[Constraint],
    labels: &[String],
    properties: &PropertyMap,
    key_strategy: KeyStrategy,
) -> Option<NodeKey> {
    let candidates = applicable(constraints, labels, |p| {
        properties.get(p).map_or(false, |v| !v.is_null())
    });
    let chosen: Vec<&Constraint> = match key_strategy {
        KeyStrategy::Default => candidates
            .into_iter()
            .min_by(|a, b| {
                a.properties
                    .len()
                    .cmp(&b.properties.len())
                    .then_with(|| a.label.cmp(&b.label))
                    .then_with(|| a.properties.cmp(&b.properties))
            })
            .into_iter()
            .collect(),
        KeyStrategy::All => candidates,
    };

    if chosen.is_empty() {
        None
    } else {
        Some(key_from(&chosen, properties))
    }
}

/// Key of a relationship endpoint from its `ids` map. The labels to match on
/// are those of the constraints the ids satisfy, or all endpoint labels when
/// none does. `None` when the endpoint carries no ids.
pub fn endpoint_key(constraints: &[Constraint], endpoint: &RelationshipNodeChange) -> Option<NodeKey> {
    if endpoint.ids.is_empty() {
        return None;
    }
    let matched = applicable(constraints, &endpoint.labels, |p| endpoint.ids.contains_key(p));
    let labels = if matched.is_empty() {
        endpoint.labels.iter().map(Label::new).collect()
    } else {
        key_from(&matched, &endpoint.ids).labels
    };
    Some(NodeKey {
        labels,
        properties: endpoint.ids.clone(),
    })
}
