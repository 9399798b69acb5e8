//! In-process host: databases backed by [`GraphStore`]

use super::{
    AvailabilityListener, DatabaseManagementService, GraphDatabase, HostError, HostResult,
    TransactionData, TransactionListener, WriteStatement, SYSTEM_DATABASE_NAME,
};
use crate::graph::{ConstraintDefinition, GraphStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A single in-memory database
pub struct EmbeddedDatabase {
    name: String,
    store: Arc<RwLock<GraphStore>>,
    available: watch::Sender<bool>,
    availability_listeners: Mutex<Vec<Arc<dyn AvailabilityListener>>>,
}

impl EmbeddedDatabase {
    /// Create an available database with an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_store(name, Arc::new(RwLock::new(GraphStore::new())))
    }

    pub fn with_store(name: impl Into<String>, store: Arc<RwLock<GraphStore>>) -> Self {
        let (available, _) = watch::channel(true);
        Self {
            name: name.into(),
            store,
            available,
            availability_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Shared handle on the underlying store
    pub fn store(&self) -> Arc<RwLock<GraphStore>> {
        Arc::clone(&self.store)
    }

    pub fn is_available_now(&self) -> bool {
        *self.available.borrow()
    }

    pub fn register_availability_listener(&self, listener: Arc<dyn AvailabilityListener>) {
        self.availability_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Flip availability. On an actual change every availability listener is
    /// called on its own task, so callbacks may race each other.
    pub fn set_available(&self, available: bool) -> Vec<JoinHandle<()>> {
        let previous = self.available.send_replace(available);
        if previous == available {
            return Vec::new();
        }
        info!(database = %self.name, available, "Database availability changed");

        let listeners = self
            .availability_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        listeners
            .into_iter()
            .map(|listener| {
                tokio::spawn(async move {
                    if available {
                        listener.available().await;
                    } else {
                        listener.unavailable().await;
                    }
                })
            })
            .collect()
    }

    fn ensure_available(&self) -> HostResult<()> {
        if self.is_available_now() {
            Ok(())
        } else {
            Err(HostError::Unavailable(self.name.clone()))
        }
    }
}

#[async_trait]
impl GraphDatabase for EmbeddedDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self, timeout: Duration) -> bool {
        let mut rx = self.available.subscribe();
        let wait = async move {
            loop {
                if *rx.borrow_and_update() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    async fn list_constraints(&self) -> HostResult<Vec<ConstraintDefinition>> {
        self.ensure_available()?;
        Ok(self.store.read().await.constraints().to_vec())
    }

    async fn execute_write(&self, statement: WriteStatement) -> HostResult<()> {
        self.ensure_available()?;
        debug!(database = %self.name, %statement, "Executing write");

        let mut store = self.store.write().await;
        match statement {
            WriteStatement::MergeNode { labels, key, set } => {
                match store.find_nodes(&labels, &key).first().copied() {
                    Some(id) => {
                        for (k, v) in set {
                            store.set_node_property(id, k, v)?;
                        }
                    }
                    None => {
                        let mut properties = key;
                        properties.extend(set);
                        store.create_node_with_properties(labels, properties)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// In-process database management service
///
/// Always hosts the `system` coordination database.
pub struct EmbeddedDbms {
    databases: StdRwLock<HashMap<String, Arc<EmbeddedDatabase>>>,
    listeners: Mutex<HashMap<String, Vec<Arc<dyn TransactionListener>>>>,
}

impl EmbeddedDbms {
    pub fn new() -> Self {
        let dbms = Self {
            databases: StdRwLock::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        };
        dbms.create_database(SYSTEM_DATABASE_NAME);
        dbms
    }

    /// Create (or return the existing) database named `name`
    pub fn create_database(&self, name: &str) -> Arc<EmbeddedDatabase> {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            databases
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(EmbeddedDatabase::new(name))),
        )
    }

    pub fn embedded(&self, name: &str) -> HostResult<Arc<EmbeddedDatabase>> {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::DatabaseNotFound(name.to_string()))
    }

    pub fn listener_count(&self, database: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(database)
            .map_or(0, |l| l.len())
    }

    /// Notify every listener registered on `database` of a committed
    /// transaction. All listeners run even if one fails; the first failure is
    /// returned.
    pub async fn commit(&self, database: &str, data: &TransactionData) -> HostResult<()> {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(database)
            .cloned()
            .unwrap_or_default();

        let mut first_error = None;
        for listener in listeners {
            if let Err(e) = listener.after_commit(data).await {
                error!(database, tx_id = data.tx_id, "Transaction listener failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for EmbeddedDbms {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseManagementService for EmbeddedDbms {
    fn database(&self, name: &str) -> HostResult<Arc<dyn GraphDatabase>> {
        let db: Arc<dyn GraphDatabase> = self.embedded(name)?;
        Ok(db)
    }

    fn register_transaction_listener(
        &self,
        database: &str,
        listener: Arc<dyn TransactionListener>,
    ) -> HostResult<()> {
        self.embedded(database)?;
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let registered = listeners.entry(database.to_string()).or_default();
        if registered.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return Err(HostError::ListenerAlreadyRegistered(database.to_string()));
        }
        registered.push(listener);
        Ok(())
    }

    fn unregister_transaction_listener(
        &self,
        database: &str,
        listener: &Arc<dyn TransactionListener>,
    ) -> HostResult<()> {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let registered = listeners.entry(database.to_string()).or_default();
        let before = registered.len();
        registered.retain(|l| !Arc::ptr_eq(l, listener));
        if registered.len() == before {
            return Err(HostError::ListenerNotRegistered(database.to_string()));
        }
        Ok(())
    }
}
