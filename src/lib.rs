//! Samyama CDC
//!
//! Change-data-capture streams for the Samyama graph database: committed
//! graph mutations become ordered, schema-aware events; action batches are
//! persisted as an outbox record on their action node; and a sink replays
//! events idempotently onto another graph.
//!
//! # Architecture
//!
//! - [`event`]: event model and JSON wire codec
//! - [`constraints`]: background constraint snapshot service
//! - [`source`]: transaction listener building enriched events for a router
//! - [`router`]: action-event persistence router
//! - [`lifecycle`]: availability-driven start/stop of the source pipeline
//! - [`sink`]: identity strategies, event applier and topic consumer
//! - [`transport`]: publish/subscribe seam plus an in-memory broker
//! - [`host`]: host database seams plus an embedded implementation
//! - [`graph`]: the in-memory property graph behind both ends
//!
//! ## Example Usage
//!
//! ```rust
//! use samyama_cdc::event::{Meta, NodeChange, NodePayload, OperationType, Schema, StreamsTransactionEvent};
//! use samyama_cdc::graph::{property_map, GraphStore, Label};
//! use samyama_cdc::sink::{CdcStrategy, EventApplier};
//!
//! let event = StreamsTransactionEvent {
//!     meta: Meta {
//!         timestamp: 0,
//!         username: "neo4j".to_string(),
//!         tx_id: 1,
//!         tx_event_id: 0,
//!         tx_events_count: 1,
//!         operation: OperationType::Created,
//!         source: Default::default(),
//!     },
//!     payload: NodePayload {
//!         id: "0".to_string(),
//!         before: None,
//!         after: Some(NodeChange::new(property_map([("name", "Andrea")]), ["User"])),
//!     }
//!     .into(),
//!     schema: Schema::default(),
//! };
//!
//! let mut store = GraphStore::new();
//! let applier = EventApplier::new(CdcStrategy::source_id("sourceId", "SourceEvent"));
//! let report = applier.apply_batch(&mut store, vec![event]).unwrap();
//!
//! assert_eq!(report.applied, 1);
//! assert_eq!(store.get_nodes_by_label(&Label::new("User")).len(), 1);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constraints;
pub mod event;
pub mod graph;
pub mod host;
pub mod lifecycle;
pub mod router;
pub mod sink;
pub mod source;
pub mod transport;

// Re-export main types for convenience
pub use graph::{
    Edge, EdgeId, EdgeType, GraphError, GraphResult, GraphStore, Label, Node, NodeId,
    PropertyMap, PropertyValue,
};

pub use event::{
    Constraint, EventError, EventResult, Meta, NodeChange, NodePayload, OperationType, Payload,
    RelationshipChange, RelationshipNodeChange, RelationshipPayload, Schema,
    StreamsConstraintType, StreamsEvent, StreamsTransactionEvent,
};

pub use host::{
    DatabaseManagementService, EmbeddedDatabase, EmbeddedDbms, GraphDatabase, HostError,
    HostResult, TransactionData,
};

pub use config::{ConfigError, ConfigResult, StreamsConfig};
pub use constraints::ConstraintsService;
pub use lifecycle::{EventRouterLifecycle, LifecycleState};
pub use router::PersistentActionEventRouter;
pub use sink::{ApplyError, ApplyReport, CdcStrategy, EventApplier, KeyStrategy, SinkConsumer};
pub use source::{RouterError, RouterResult, StreamsEventRouter, StreamsTransactionEventHandler};
pub use transport::{EventPublisher, EventSubscriber, InMemoryBroker, PublishingEventRouter, TransportError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
