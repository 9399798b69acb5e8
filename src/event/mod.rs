//! CDC event model
//!
//! Pure data shapes for change-data-capture events plus their JSON codec.
//! Every other component consumes these types; none of them mutate an event
//! after it has been built.

pub mod json;
pub mod model;
pub mod ordering;

pub use json::{from_json_slice, from_json_str, read_json_lines, to_json_bytes, to_json_string};
pub use model::{
    schema_properties, Constraint, Meta, NodeChange, NodePayload, OperationType, Payload,
    PublishedMeta, RelationshipChange, RelationshipNodeChange, RelationshipPayload, Schema,
    StreamsConstraintType, StreamsEvent, StreamsPublishedEvent, StreamsTransactionEvent,
};
pub use ordering::{order_by_transaction, validate_tx_event_ids};

use thiserror::Error;

/// Event encoding and validation errors
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed event on line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid event numbering in transaction {tx_id}: {reason}")]
    TxEventIds { tx_id: i64, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EventResult<T> = Result<T, EventError>;
