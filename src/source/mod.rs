//! Source side of the pipeline
//!
//! Commits are turned into [`StreamsTransactionEvent`](crate::event::StreamsTransactionEvent)s by the
//! [`StreamsTransactionEventHandler`] and handed, one batch per transaction,
//! to a [`StreamsEventRouter`].

pub mod handler;

pub use handler::StreamsTransactionEventHandler;

use crate::event::{EventError, StreamsEvent};
use crate::host::HostError;
use crate::transport::TransportError;
use async_trait::async_trait;
use thiserror::Error;

/// Routing errors
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Host database error: {0}")]
    Host(#[from] HostError),

    #[error("Event encoding error: {0}")]
    Event(#[from] EventError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type RouterResult<T> = Result<T, RouterError>;

/// Destination for batches of captured events
#[async_trait]
pub trait StreamsEventRouter: Send + Sync {
    async fn start(&self);

    async fn stop(&self);

    /// Route one batch. Implementations ignore event kinds they do not handle.
    async fn send_events(&self, events: Vec<StreamsEvent>) -> RouterResult<()>;
}
