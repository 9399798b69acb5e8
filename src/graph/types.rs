//! Core type definitions for the graph store

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                $name(id)
            }

            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }
    };
}

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                $name(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Name as it must be written inside a Cypher pattern
            pub fn quoted(&self) -> String {
                quote_identifier(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<&String> for $name {
            fn from(s: &String) -> Self {
                $name(s.clone())
            }
        }
    };
}

numeric_id!(
    /// Internal identifier for a node. Not stable across databases.
    NodeId
);

numeric_id!(
    /// Internal identifier for an edge
    EdgeId
);

name_type!(
    /// Node label (e.g., "User", "Action")
    Label
);

name_type!(
    /// Relationship type (e.g., "KNOWS")
    EdgeType
);

/// Returns true when `name` can be used bare in a Cypher pattern.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Backtick-quote a label, type or property name unless it is a plain identifier.
pub fn quote_identifier(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        let id = NodeId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert_eq!(format!("{}", id), "NodeId(42)");

        let id2: NodeId = 100.into();
        assert_eq!(id2.as_u64(), 100);
        assert!(NodeId::new(1) < id2);
    }

    #[test]
    fn test_label_serializes_as_plain_string() {
        let label = Label::new("User Ext");
        assert_eq!(serde_json::to_string(&label).unwrap(), "\"User Ext\"");

        let back: Label = serde_json::from_str("\"User\"").unwrap();
        assert_eq!(back.as_str(), "User");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("User"), "User");
        assert_eq!(quote_identifier("_tmp1"), "_tmp1");
        assert_eq!(quote_identifier("User Ext"), "`User Ext`");
        assert_eq!(quote_identifier("comp@ny"), "`comp@ny`");
        assert_eq!(quote_identifier("1st"), "`1st`");
        assert_eq!(quote_identifier(""), "``");
        assert_eq!(EdgeType::new("KNOWS WHO").quoted(), "`KNOWS WHO`");
    }
}
