//! Sink side: replay CDC events onto a target graph
//!
//! - [`strategy`]: identity resolution (synthetic source id or schema natural keys)
//! - [`applier`]: the per-operation upsert / delete state machine
//! - [`consumer`]: topic subscription feeding the applier in batches

pub mod applier;
pub mod consumer;
pub mod strategy;

pub use applier::{ApplyError, ApplyReport, ApplyResult, EventApplier};
pub use consumer::{SinkConsumer, SinkHandle, DEFAULT_BATCH_SIZE};
pub use strategy::{
    endpoint_key, node_key, CdcStrategy, KeyStrategy, NodeKey, DEFAULT_ID_NAME, DEFAULT_LABEL_NAME,
};
