//! Availability-driven lifecycle of the source pipeline
//!
//! The host fires `available()` / `unavailable()` asynchronously and does not
//! serialize them. Every transition runs under one async mutex so at most one
//! transaction handler is ever registered, whatever the interleaving.

use crate::config::StreamsConfig;
use crate::constraints::ConstraintsService;
use crate::host::{
    AvailabilityListener, DatabaseManagementService, GraphDatabase, HostError,
    TransactionListener,
};
use crate::router::PersistentActionEventRouter;
use crate::source::{StreamsEventRouter, StreamsTransactionEventHandler};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Builds the router for a (re)registration
pub type RouterFactory = Box<dyn Fn(Arc<dyn GraphDatabase>) -> Arc<dyn StreamsEventRouter> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unregistered,
    Registering,
    Registered,
    Unregistering,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unregistered => "unregistered",
            LifecycleState::Registering => "registering",
            LifecycleState::Registered => "registered",
            LifecycleState::Unregistering => "unregistering",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: LifecycleState,
    constraints: Option<Arc<ConstraintsService>>,
    router: Option<Arc<dyn StreamsEventRouter>>,
    handler: Option<Arc<dyn TransactionListener>>,
}

/// Starts and stops the router, constraint poller and transaction handler of
/// one database as it comes and goes
pub struct EventRouterLifecycle {
    dbms: Arc<dyn DatabaseManagementService>,
    database: String,
    system_db_wait_timeout: Duration,
    polling_interval: Duration,
    availability_wait: Duration,
    router_factory: RouterFactory,
    inner: Mutex<Inner>,
}

impl EventRouterLifecycle {
    pub fn new(
        dbms: Arc<dyn DatabaseManagementService>,
        database: impl Into<String>,
        config: &StreamsConfig,
    ) -> Self {
        Self {
            dbms,
            database: database.into(),
            system_db_wait_timeout: config.system_db_wait_timeout(),
            polling_interval: config.schema_polling_interval(),
            availability_wait: config.schema_availability_wait(),
            router_factory: Box::new(|db: Arc<dyn GraphDatabase>| -> Arc<dyn StreamsEventRouter> {
                Arc::new(PersistentActionEventRouter::new(db))
            }),
            inner: Mutex::new(Inner {
                state: LifecycleState::Unregistered,
                constraints: None,
                router: None,
                handler: None,
            }),
        }
    }

    /// Route through something other than the action persistence router
    pub fn with_router_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(Arc<dyn GraphDatabase>) -> Arc<dyn StreamsEventRouter> + Send + Sync + 'static,
    {
        self.router_factory = Box::new(factory);
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().await.state
    }

    /// The constraint service, once the first registration has built it
    pub async fn constraints(&self) -> Option<Arc<ConstraintsService>> {
        self.inner.lock().await.constraints.clone()
    }

    /// Wait for the system database, then register. Does nothing when the
    /// system database stays unavailable or a handler is already registered.
    pub async fn on_available(&self) {
        let system = match self.dbms.system_database() {
            Ok(system) => system,
            Err(e) => {
                warn!(database = %self.database, "Cannot look up the system database: {}", e);
                return;
            }
        };
        if !system.is_available(self.system_db_wait_timeout).await {
            info!(
                database = %self.database,
                timeout_ms = self.system_db_wait_timeout.as_millis() as u64,
                "Cannot start the source module: system database not available in time"
            );
            return;
        }

        let mut inner = self.inner.lock().await;
        if inner.state == LifecycleState::Registered {
            debug!(database = %self.database, "Transaction handler already registered");
            return;
        }
        inner.state = LifecycleState::Registering;
        info!(database = %self.database, "Initialising the source module");

        let db = match self.dbms.database(&self.database) {
            Ok(db) => db,
            Err(e) => {
                warn!(database = %self.database, "Cannot register transaction handler: {}", e);
                inner.state = LifecycleState::Unregistered;
                return;
            }
        };

        let constraints = match &inner.constraints {
            Some(constraints) => Arc::clone(constraints),
            None => {
                let constraints = Arc::new(ConstraintsService::with_intervals(
                    Arc::clone(&db),
                    self.polling_interval,
                    self.availability_wait,
                ));
                inner.constraints = Some(Arc::clone(&constraints));
                constraints
            }
        };
        let router = (self.router_factory)(Arc::clone(&db));
        let handler: Arc<dyn TransactionListener> = Arc::new(StreamsTransactionEventHandler::new(
            Arc::clone(&router),
            Arc::clone(&constraints),
        ));

        router.start().await;

        match self
            .dbms
            .register_transaction_listener(&self.database, Arc::clone(&handler))
        {
            Ok(()) => {
                constraints.start();
                inner.router = Some(router);
                inner.handler = Some(handler);
                inner.state = LifecycleState::Registered;
                info!(database = %self.database, "Source transaction handler registered");
            }
            Err(e) => {
                error!(database = %self.database, "Failed to register transaction handler: {}", e);
                router.stop().await;
                inner.state = LifecycleState::Unregistered;
            }
        }
    }

    /// Stop the router and unregister the handler. Never-started components
    /// and a handler the host no longer knows are not errors.
    pub async fn on_unavailable(&self) {
        let mut inner = self.inner.lock().await;
        if inner.router.is_none() && inner.handler.is_none() {
            debug!(database = %self.database, "Nothing registered");
            return;
        }
        inner.state = LifecycleState::Unregistering;

        if let Some(router) = inner.router.take() {
            router.stop().await;
        }
        if let Some(handler) = inner.handler.take() {
            match self.dbms.unregister_transaction_listener(&self.database, &handler) {
                Ok(()) | Err(HostError::ListenerNotRegistered(_)) => {}
                Err(e) => warn!(database = %self.database, "Failed to unregister transaction handler: {}", e),
            }
        }

        inner.state = LifecycleState::Unregistered;
        info!(database = %self.database, "Source transaction handler unregistered");
    }

    /// Unregister and stop the constraint poller
    pub async fn shutdown(&self) {
        self.on_unavailable().await;
        let constraints = self.inner.lock().await.constraints.clone();
        if let Some(constraints) = constraints {
            constraints.stop().await;
        }
    }
}

#[async_trait]
impl AvailabilityListener for EventRouterLifecycle {
    async fn available(&self) {
        self.on_available().await;
    }

    async fn unavailable(&self) {
        self.on_unavailable().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EmbeddedDbms;

    fn config() -> StreamsConfig {
        StreamsConfig {
            system_db_wait_timeout_ms: 100,
            schema_polling_interval_ms: 50,
            schema_availability_wait_ms: 50,
            ..StreamsConfig::default()
        }
    }

    fn setup() -> (Arc<EmbeddedDbms>, Arc<EventRouterLifecycle>) {
        let dbms = Arc::new(EmbeddedDbms::new());
        dbms.create_database("neo4j");
        let lifecycle = Arc::new(EventRouterLifecycle::new(dbms.clone(), "neo4j", &config()));
        (dbms, lifecycle)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let (dbms, lifecycle) = setup();
        assert_eq!(lifecycle.state().await, LifecycleState::Unregistered);

        lifecycle.available().await;
        assert_eq!(lifecycle.state().await, LifecycleState::Registered);
        assert_eq!(dbms.listener_count("neo4j"), 1);
        assert!(lifecycle.constraints().await.unwrap().is_running());

        lifecycle.available().await;
        assert_eq!(dbms.listener_count("neo4j"), 1);

        lifecycle.unavailable().await;
        assert_eq!(lifecycle.state().await, LifecycleState::Unregistered);
        assert_eq!(dbms.listener_count("neo4j"), 0);

        // idempotent
        lifecycle.unavailable().await;
        lifecycle.shutdown().await;
        assert!(!lifecycle.constraints().await.unwrap().is_running());
    }

    #[tokio::test]
    async fn test_constraints_service_is_reused() {
        let (_, lifecycle) = setup();
        lifecycle.available().await;
        let first = lifecycle.constraints().await.unwrap();
        lifecycle.unavailable().await;
        lifecycle.available().await;
        let second = lifecycle.constraints().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn test_system_database_timeout_skips_registration() {
        let (dbms, lifecycle) = setup();
        dbms.embedded("system").unwrap().set_available(false);

        lifecycle.available().await;
        assert_eq!(lifecycle.state().await, LifecycleState::Unregistered);
        assert_eq!(dbms.listener_count("neo4j"), 0);
    }

    #[tokio::test]
    async fn test_unknown_database_rolls_back() {
        let dbms = Arc::new(EmbeddedDbms::new());
        let lifecycle = EventRouterLifecycle::new(dbms.clone(), "missing", &config());
        lifecycle.available().await;
        assert_eq!(lifecycle.state().await, LifecycleState::Unregistered);
    }

    /// Host whose listener registry always refuses
    struct RefusingDbms(EmbeddedDbms);

    impl DatabaseManagementService for RefusingDbms {
        fn database(&self, name: &str) -> crate::host::HostResult<Arc<dyn GraphDatabase>> {
            self.0.database(name)
        }

        fn register_transaction_listener(
            &self,
            database: &str,
            _listener: Arc<dyn TransactionListener>,
        ) -> crate::host::HostResult<()> {
            Err(HostError::ShuttingDown(database.to_string()))
        }

        fn unregister_transaction_listener(
            &self,
            database: &str,
            _listener: &Arc<dyn TransactionListener>,
        ) -> crate::host::HostResult<()> {
            Err(HostError::ListenerNotRegistered(database.to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_registration_leaves_nothing_running() {
        let inner = EmbeddedDbms::new();
        inner.create_database("neo4j");
        let dbms = Arc::new(RefusingDbms(inner));
        let lifecycle = EventRouterLifecycle::new(dbms, "neo4j", &config());

        lifecycle.available().await;
        assert_eq!(lifecycle.state().await, LifecycleState::Unregistered);
        assert!(!lifecycle.constraints().await.unwrap().is_running());
        assert!(lifecycle.inner.lock().await.router.is_none());
    }

    #[tokio::test]
    async fn test_unregister_tolerates_foreign_removal() {
        let (dbms, lifecycle) = setup();
        lifecycle.available().await;

        // someone else already dropped our listener
        let handler = lifecycle.inner.lock().await.handler.clone().unwrap();
        dbms.unregister_transaction_listener("neo4j", &handler).unwrap();

        lifecycle.unavailable().await;
        assert_eq!(lifecycle.state().await, LifecycleState::Unregistered);
        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_flaps_keep_at_most_one_handler() {
        let (dbms, lifecycle) = setup();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let lifecycle = Arc::clone(&lifecycle);
            tasks.push(tokio::spawn(async move {
                if i % 3 == 2 {
                    lifecycle.unavailable().await;
                } else {
                    lifecycle.available().await;
                }
            }));
            assert!(dbms.listener_count("neo4j") <= 1);
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(dbms.listener_count("neo4j") <= 1);

        let registered = lifecycle.state().await == LifecycleState::Registered;
        assert_eq!(dbms.listener_count("neo4j"), usize::from(registered));
        lifecycle.shutdown().await;
        assert_eq!(dbms.listener_count("neo4j"), 0);
    }
}
