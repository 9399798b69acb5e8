//! Constraint snapshot service
//!
//! Keeps an eventually-consistent copy of the database's declared constraints,
//! grouped by label (node constraints) and relationship type, so event
//! enrichment never has to open a read transaction of its own.
//!
//! A single background task refreshes the snapshot every `polling_interval`.
//! Readers get an `Arc` to the current map; a refresh builds new maps and
//! swaps them in, so a snapshot handed out earlier never changes.

use crate::event::{Constraint, StreamsConstraintType};
use crate::graph::{ConstraintDefinition, ConstraintKind};
use crate::host::{GraphDatabase, HostResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Entity name (label or relationship type) -> constraints declared on it
pub type ConstraintMap = HashMap<String, BTreeSet<Constraint>>;

/// Default time between two refreshes
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(300_000);
/// Default time to wait for the database before a refresh
pub const DEFAULT_AVAILABILITY_WAIT: Duration = Duration::from_millis(5_000);

struct SnapshotState {
    db: Arc<dyn GraphDatabase>,
    polling_interval: Duration,
    availability_wait: Duration,
    node_constraints: RwLock<Arc<ConstraintMap>>,
    relationship_constraints: RwLock<Arc<ConstraintMap>>,
    active: AtomicBool,
}

struct Worker {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background constraint poller for one database
pub struct ConstraintsService {
    state: Arc<SnapshotState>,
    worker: Mutex<Option<Worker>>,
}

impl ConstraintsService {
    pub fn new(db: Arc<dyn GraphDatabase>) -> Self {
        Self::with_intervals(db, DEFAULT_POLLING_INTERVAL, DEFAULT_AVAILABILITY_WAIT)
    }

    pub fn with_intervals(
        db: Arc<dyn GraphDatabase>,
        polling_interval: Duration,
        availability_wait: Duration,
    ) -> Self {
        Self {
            state: Arc::new(SnapshotState {
                db,
                polling_interval,
                availability_wait,
                node_constraints: RwLock::new(Arc::new(ConstraintMap::new())),
                relationship_constraints: RwLock::new(Arc::new(ConstraintMap::new())),
                active: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the polling task. No-op while a live worker exists.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().map_or(false, |w| !w.handle.is_finished()) {
            return;
        }

        let (cancel, cancelled) = watch::channel(false);
        self.state.active.store(true, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(poll_loop(state, cancelled));
        info!(database = self.state.db.name(), "Constraints service started");
        *worker = Some(Worker { cancel, handle });
    }

    /// Cancel the polling task and wait for it to finish.
    /// No-op when the service was never started.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        self.state.active.store(false, Ordering::SeqCst);
        worker.cancel.send_replace(true);
        if let Err(e) = worker.handle.await {
            warn!(database = self.state.db.name(), "Constraints poller ended abnormally: {}", e);
        }
        info!(database = self.state.db.name(), "Constraints service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |w| !w.handle.is_finished())
    }

    /// Run one poll inline
    pub async fn refresh(&self) -> HostResult<()> {
        self.state.poll_once().await
    }

    /// Constraints declared on node label `label`, empty when none are known
    pub fn for_label(&self, label: &str) -> BTreeSet<Constraint> {
        self.all_for_labels().get(label).cloned().unwrap_or_default()
    }

    /// Constraints declared on relationship type `rel_type`, empty when none are known
    pub fn for_relationship_type(&self, rel_type: &str) -> BTreeSet<Constraint> {
        self.all_for_relationship_types()
            .get(rel_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_for_labels(&self) -> Arc<ConstraintMap> {
        Arc::clone(&self.state.node_constraints.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn all_for_relationship_types(&self) -> Arc<ConstraintMap> {
        Arc::clone(
            &self
                .state
                .relationship_constraints
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl SnapshotState {
    async fn poll_once(&self) -> HostResult<()> {
        let definitions = self.db.list_constraints().await?;

        let mut nodes = ConstraintMap::new();
        let mut relationships = ConstraintMap::new();
        for definition in &definitions {
            let target = if definition.is_node_constraint() {
                &mut nodes
            } else {
                &mut relationships
            };
            target
                .entry(definition.target.name().to_string())
                .or_default()
                .insert(to_streams_constraint(definition));
        }

        debug!(
            database = self.db.name(),
            labels = nodes.len(),
            relationship_types = relationships.len(),
            "Constraint snapshot refreshed"
        );
        *self.node_constraints.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(nodes);
        *self
            .relationship_constraints
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(relationships);
        Ok(())
    }
}

async fn poll_loop(state: Arc<SnapshotState>, mut cancelled: watch::Receiver<bool>) {
    while state.active.load(Ordering::SeqCst) {
        if !state.db.is_available(state.availability_wait).await {
            info!(database = state.db.name(), "Database not available, constraints poller exiting");
            break;
        }

        if let Err(e) = state.poll_once().await {
            if e.is_transient() {
                debug!(database = state.db.name(), "Skipping constraint poll: {}", e);
            } else {
                warn!(database = state.db.name(), "Constraint poll failed: {}", e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(state.polling_interval) => {}
            _ = cancelled.changed() => break,
        }
    }
}

/// Map a catalog entry onto its wire-level constraint
pub fn to_streams_constraint(definition: &ConstraintDefinition) -> Constraint {
    let constraint_type = match (definition.kind, definition.is_node_constraint()) {
        (ConstraintKind::Unique, _) => StreamsConstraintType::Unique,
        (ConstraintKind::PropertyExists, true) => StreamsConstraintType::NodePropertyExists,
        (ConstraintKind::PropertyExists, false) => StreamsConstraintType::RelationshipPropertyExists,
    };
    Constraint::new(
        definition.target.name(),
        definition.property_keys.iter().cloned(),
        constraint_type,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EmbeddedDatabase;

    async fn database_with_constraints() -> Arc<EmbeddedDatabase> {
        let db = Arc::new(EmbeddedDatabase::new("neo4j"));
        {
            let store = db.store();
            let mut store = store.write().await;
            store
                .create_constraint(ConstraintDefinition::unique("User", &["name", "surname"]))
                .unwrap();
            store
                .create_constraint(ConstraintDefinition::node_exists("User", &["name"]))
                .unwrap();
            store
                .create_constraint(ConstraintDefinition::relationship_exists("KNOWS", &["since"]))
                .unwrap();
        }
        db
    }

    #[test]
    fn test_to_streams_constraint() {
        let unique = to_streams_constraint(&ConstraintDefinition::unique("User", &["name"]));
        assert_eq!(unique, Constraint::unique("User", ["name"]));

        let exists = to_streams_constraint(&ConstraintDefinition::relationship_exists("KNOWS", &["since"]));
        assert_eq!(exists.constraint_type, StreamsConstraintType::RelationshipPropertyExists);
        assert_eq!(exists.label, "KNOWS");
    }

    #[tokio::test]
    async fn test_empty_before_first_poll() {
        let db = database_with_constraints().await;
        let service = ConstraintsService::new(db);
        assert!(service.for_label("User").is_empty());
        assert!(service.all_for_relationship_types().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_groups_by_entity() {
        let db = database_with_constraints().await;
        let service = ConstraintsService::new(db);
        service.refresh().await.unwrap();

        let user = service.for_label("User");
        assert_eq!(user.len(), 2);
        assert!(user.contains(&Constraint::unique("User", ["name", "surname"])));
        assert!(user.contains(&Constraint::new(
            "User",
            ["name"],
            StreamsConstraintType::NodePropertyExists
        )));

        let knows = service.for_relationship_type("KNOWS");
        assert_eq!(knows.len(), 1);
        assert!(service.for_label("KNOWS").is_empty());
        assert!(service.for_relationship_type("User").is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_are_immutable() {
        let db = database_with_constraints().await;
        let service = ConstraintsService::new(db.clone());
        service.refresh().await.unwrap();
        let before = service.all_for_labels();

        db.store()
            .write()
            .await
            .create_constraint(ConstraintDefinition::unique("Product", &["sku"]))
            .unwrap();
        service.refresh().await.unwrap();

        assert!(!before.contains_key("Product"));
        assert!(service.all_for_labels().contains_key("Product"));
    }

    #[tokio::test]
    async fn test_dropped_constraints_disappear() {
        let db = database_with_constraints().await;
        let service = ConstraintsService::new(db.clone());
        service.refresh().await.unwrap();

        db.store()
            .write()
            .await
            .drop_constraint(&ConstraintDefinition::relationship_exists("KNOWS", &["since"]));
        service.refresh().await.unwrap();
        assert!(service.for_relationship_type("KNOWS").is_empty());
    }

    #[tokio::test]
    async fn test_background_poll_and_stop() {
        let db = database_with_constraints().await;
        let service = ConstraintsService::with_intervals(
            db,
            Duration::from_millis(20),
            Duration::from_millis(50),
        );

        service.stop().await;
        service.start();
        service.start();
        assert!(service.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.for_label("User").len(), 2);

        service.stop().await;
        assert!(!service.is_running());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_poller_exits_when_database_goes_away() {
        let db = database_with_constraints().await;
        db.set_available(false);
        let service = ConstraintsService::with_intervals(
            db.clone(),
            Duration::from_millis(20),
            Duration::from_millis(20),
        );

        service.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!service.is_running());
        assert!(service.for_label("User").is_empty());

        db.set_available(true);
        service.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.is_running());
        assert_eq!(service.for_label("User").len(), 2);
        service.stop().await;
    }
}
