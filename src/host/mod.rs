//! Host database seams
//!
//! The CDC components never talk to a concrete database. They see:
//! - [`GraphDatabase`]: availability probe, constraint catalog read, one-shot write transactions
//! - [`DatabaseManagementService`]: database lookup and transaction listener registry
//! - [`AvailabilityListener`] / [`TransactionListener`]: callbacks the host fires
//!
//! [`embedded`] implements all of them over an in-memory [`GraphStore`](crate::graph::GraphStore).

pub mod embedded;
pub mod transaction;

pub use embedded::{EmbeddedDatabase, EmbeddedDbms};
pub use transaction::{EntityChange, NodeSnapshot, NodeStateChange, RelationshipStateChange, TransactionData};

use crate::graph::{ConstraintDefinition, GraphError, Label, PropertyMap};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Name of the coordination database every host exposes
pub const SYSTEM_DATABASE_NAME: &str = "system";

/// Host database errors
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Database {0} is unavailable")]
    Unavailable(String),

    #[error("Database {0} is shutting down")]
    ShuttingDown(String),

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Transaction listener is not registered on {0}")]
    ListenerNotRegistered(String),

    #[error("Transaction listener is already registered on {0}")]
    ListenerAlreadyRegistered(String),

    #[error("Write failed: {0}")]
    Graph(#[from] GraphError),

    #[error("Transaction listener failed: {0}")]
    Listener(String),
}

impl HostError {
    /// Errors that clear up by themselves once the database is back
    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::Unavailable(_) | HostError::ShuttingDown(_))
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// A write executed as its own transaction
#[derive(Debug, Clone, PartialEq)]
pub enum WriteStatement {
    /// `MERGE (n:<labels> {<key>}) SET n.<k> = <v>, ...`
    MergeNode {
        labels: Vec<Label>,
        key: PropertyMap,
        set: PropertyMap,
    },
}

impl fmt::Display for WriteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStatement::MergeNode { labels, key, set } => {
                let labels: String = labels.iter().map(|l| format!(":{}", l.quoted())).collect();
                let key: Vec<String> = key
                    .keys()
                    .map(|k| format!("{}: ${}", crate::graph::quote_identifier(k), k))
                    .collect();
                write!(f, "MERGE (n{} {{{}}})", labels, key.join(", "))?;
                if !set.is_empty() {
                    let set: Vec<String> = set
                        .keys()
                        .map(|k| format!("n.{} = ${}", crate::graph::quote_identifier(k), k))
                        .collect();
                    write!(f, " SET {}", set.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

/// One database of the host
#[async_trait]
pub trait GraphDatabase: Send + Sync {
    fn name(&self) -> &str;

    /// Wait up to `timeout` for the database to accept transactions
    async fn is_available(&self, timeout: Duration) -> bool;

    /// Read the declared constraints in a read-only transaction
    async fn list_constraints(&self) -> HostResult<Vec<ConstraintDefinition>>;

    /// Run `statement` in its own write transaction
    async fn execute_write(&self, statement: WriteStatement) -> HostResult<()>;
}

/// Called by the host after a transaction commits
#[async_trait]
pub trait TransactionListener: Send + Sync {
    async fn after_commit(&self, data: &TransactionData) -> HostResult<()>;
}

/// Database availability callbacks. The host may fire them concurrently and
/// in any interleaving.
#[async_trait]
pub trait AvailabilityListener: Send + Sync {
    async fn available(&self);
    async fn unavailable(&self);
}

/// Database lookup and listener registry of the host
pub trait DatabaseManagementService: Send + Sync {
    fn database(&self, name: &str) -> HostResult<Arc<dyn GraphDatabase>>;

    fn system_database(&self) -> HostResult<Arc<dyn GraphDatabase>> {
        self.database(SYSTEM_DATABASE_NAME)
    }

    fn register_transaction_listener(
        &self,
        database: &str,
        listener: Arc<dyn TransactionListener>,
    ) -> HostResult<()>;

    /// Fails with [`HostError::ListenerNotRegistered`] when `listener` is unknown
    fn unregister_transaction_listener(
        &self,
        database: &str,
        listener: &Arc<dyn TransactionListener>,
    ) -> HostResult<()>;
}
