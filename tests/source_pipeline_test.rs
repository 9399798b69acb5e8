//! Integration tests for the CDC source side
//!
//! Covers the constraint snapshot, action batch persistence, the
//! availability lifecycle and a full source -> broker -> sink round trip.

use samyama_cdc::event::{
    Constraint, Meta, NodeChange, NodePayload, OperationType, RelationshipChange,
    RelationshipNodeChange, RelationshipPayload, Schema, StreamsConstraintType, StreamsEvent,
    StreamsTransactionEvent,
};
use samyama_cdc::graph::{
    property_map, ConstraintDefinition, EdgeId, EdgeType, GraphStore, Label, NodeId, PropertyMap,
    PropertyValue,
};
use samyama_cdc::host::{
    EmbeddedDatabase, EmbeddedDbms, EntityChange, GraphDatabase, NodeSnapshot, TransactionData,
};
use samyama_cdc::sink::{CdcStrategy, EventApplier, KeyStrategy, SinkConsumer};
use samyama_cdc::source::StreamsEventRouter;
use samyama_cdc::{
    ConstraintsService, EventRouterLifecycle, InMemoryBroker, LifecycleState,
    PersistentActionEventRouter, PublishingEventRouter, StreamsConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

fn meta(tx_event_id: i64, count: i64, operation: OperationType) -> Meta {
    Meta {
        timestamp: 1_600_000_000_000,
        username: "neo4j".to_string(),
        tx_id: 42,
        tx_event_id,
        tx_events_count: count,
        operation,
        source: Default::default(),
    }
}

fn created_node(tx_event_id: i64, id: &str, labels: &[&str], properties: PropertyMap) -> StreamsTransactionEvent {
    StreamsTransactionEvent {
        meta: meta(tx_event_id, 3, OperationType::Created),
        payload: NodePayload {
            id: id.to_string(),
            before: None,
            after: Some(NodeChange::new(properties, labels.iter().copied())),
        }
        .into(),
        schema: Schema::default(),
    }
}

fn fast_config() -> StreamsConfig {
    StreamsConfig {
        system_db_wait_timeout_ms: 200,
        schema_polling_interval_ms: 50,
        schema_availability_wait_ms: 50,
        ..StreamsConfig::default()
    }
}

#[tokio::test]
async fn test_constraints_snapshot_after_poll() {
    let db = Arc::new(EmbeddedDatabase::new("neo4j"));
    {
        let store = db.store();
        let mut store = store.write().await;
        store.create_constraint(ConstraintDefinition::unique("User", &["name", "surname"])).unwrap();
        store.create_constraint(ConstraintDefinition::node_exists("User", &["name"])).unwrap();
        store.create_constraint(ConstraintDefinition::relationship_exists("KNOWS", &["since"])).unwrap();
    }

    let service = ConstraintsService::with_intervals(db.clone(), Duration::from_millis(20), Duration::from_millis(20));
    assert!(service.for_label("User").is_empty());

    service.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let user = service.for_label("User");
    assert_eq!(user.len(), 2);
    assert!(user.contains(&Constraint::unique("User", ["name", "surname"])));
    assert!(user.contains(&Constraint::new("User", ["name"], StreamsConstraintType::NodePropertyExists)));
    assert_eq!(
        service.for_relationship_type("KNOWS").into_iter().collect::<Vec<_>>(),
        vec![Constraint::new("KNOWS", ["since"], StreamsConstraintType::RelationshipPropertyExists)]
    );
    assert!(service.for_label("Unknown").is_empty());

    service.stop().await;
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_action_batch_is_persisted_on_action_node() {
    let db = Arc::new(EmbeddedDatabase::new("neo4j"));
    let router = PersistentActionEventRouter::new(db.clone());
    router.start().await;

    let action = created_node(0, "10", &["Action"], property_map([("actionId", "A-1")]));
    let user = created_node(1, "11", &["User"], property_map([("name", "Andrea")]));
    let link = StreamsTransactionEvent {
        meta: meta(2, 3, OperationType::Created),
        payload: RelationshipPayload {
            id: "12".to_string(),
            label: "PERFORMED".to_string(),
            start: RelationshipNodeChange {
                id: "10".to_string(),
                labels: vec!["Action".to_string()],
                ids: PropertyMap::new(),
            },
            end: RelationshipNodeChange {
                id: "11".to_string(),
                labels: vec!["User".to_string()],
                ids: PropertyMap::new(),
            },
            before: None,
            after: Some(RelationshipChange::default()),
        }
        .into(),
        schema: Schema::default(),
    };

    let order = created_node(3, "13", &["Order"], property_map([("total", 42i64)]));

    let batch: Vec<StreamsEvent> = vec![action.into(), user.clone().into(), link.into(), order.clone().into()];
    router.send_events(batch.clone()).await.unwrap();
    // a rerun overwrites rather than duplicates
    router.send_events(batch).await.unwrap();

    let store = db.store();
    let store = store.read().await;
    let actions = store.find_nodes(&[Label::new("Action")], &property_map([("actionId", "A-1")]));
    assert_eq!(actions.len(), 1);

    let json = store.get_node(actions[0]).unwrap().get_property("json").unwrap();
    let stored: serde_json::Value = serde_json::from_str(json.as_string().unwrap()).unwrap();
    assert_eq!(stored, serde_json::to_value(vec![user, order]).unwrap());
    assert_eq!(stored.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_batch_without_action_writes_nothing() {
    let db = Arc::new(EmbeddedDatabase::new("neo4j"));
    let router = PersistentActionEventRouter::new(db.clone());

    let user = created_node(0, "1", &["User"], property_map([("name", "Andrea")]));
    router.send_events(vec![user.into()]).await.unwrap();
    router.send_events(Vec::new()).await.unwrap();

    assert_eq!(db.store().read().await.node_count(), 0);
}

#[tokio::test]
async fn test_lifecycle_follows_availability_flips() {
    let dbms = Arc::new(EmbeddedDbms::new());
    let db = dbms.create_database("neo4j");
    let lifecycle = Arc::new(EventRouterLifecycle::new(dbms.clone(), "neo4j", &fast_config()));
    db.register_availability_listener(lifecycle.clone());

    // starts available; a flip down and back up re-registers exactly once
    lifecycle.on_available().await;
    assert_eq!(dbms.listener_count("neo4j"), 1);

    for handle in db.set_available(false) {
        handle.await.unwrap();
    }
    assert_eq!(lifecycle.state().await, LifecycleState::Unregistered);
    assert_eq!(dbms.listener_count("neo4j"), 0);

    for handle in db.set_available(true) {
        handle.await.unwrap();
    }
    assert_eq!(lifecycle.state().await, LifecycleState::Registered);
    assert_eq!(dbms.listener_count("neo4j"), 1);

    lifecycle.shutdown().await;
    assert_eq!(dbms.listener_count("neo4j"), 0);
}

#[tokio::test]
async fn test_racing_availability_callbacks() {
    let dbms = Arc::new(EmbeddedDbms::new());
    dbms.create_database("neo4j");
    let lifecycle = Arc::new(EventRouterLifecycle::new(dbms.clone(), "neo4j", &fast_config()));

    let mut tasks = Vec::new();
    for i in 0..50 {
        let lifecycle = lifecycle.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                lifecycle.on_available().await;
            } else {
                lifecycle.on_unavailable().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let expected = usize::from(lifecycle.state().await == LifecycleState::Registered);
    assert_eq!(dbms.listener_count("neo4j"), expected);

    lifecycle.on_available().await;
    assert_eq!(dbms.listener_count("neo4j"), 1);
    lifecycle.shutdown().await;
}

fn user(id: u64, name: &str, surname: &str) -> NodeSnapshot {
    NodeSnapshot::new(
        NodeId::new(id),
        vec![Label::new("User")],
        property_map([("name", name), ("surname", surname)]),
    )
}

#[tokio::test]
async fn test_source_to_sink_round_trip() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dbms = Arc::new(EmbeddedDbms::new());
    let db = dbms.create_database("neo4j");
    db.store()
        .write()
        .await
        .create_constraint(ConstraintDefinition::unique("User", &["name", "surname"]))
        .unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    let publisher = broker.clone();
    let lifecycle = EventRouterLifecycle::new(dbms.clone(), "neo4j", &fast_config()).with_router_factory(
        move |_db: Arc<dyn GraphDatabase>| -> Arc<dyn StreamsEventRouter> {
            Arc::new(PublishingEventRouter::new(publisher.clone(), "users"))
        },
    );
    lifecycle.on_available().await;
    lifecycle.constraints().await.unwrap().refresh().await.unwrap();

    let andrea = user(0, "Andrea", "Santurbano");
    let michael = user(1, "Michael", "Hunger");
    let created = TransactionData::new(1, "neo4j")
        .with_change(EntityChange::node_created(andrea.clone()))
        .with_change(EntityChange::node_created(michael.clone()))
        .with_change(EntityChange::relationship_created(
            EdgeId::new(7),
            "KNOWS",
            andrea.clone(),
            michael.clone(),
            property_map([("since", 2014i64)]),
        ));
    dbms.commit("neo4j", &created).await.unwrap();

    let mut renamed = andrea.clone();
    renamed.properties.insert("surname".to_string(), PropertyValue::from("S."));
    let updated = TransactionData::new(2, "neo4j").with_change(EntityChange::node_updated(andrea, renamed));
    dbms.commit("neo4j", &updated).await.unwrap();

    let deleted = TransactionData::new(3, "neo4j").with_change(EntityChange::node_deleted(michael));
    dbms.commit("neo4j", &deleted).await.unwrap();

    let keys: Vec<String> = broker.records("users").into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["1-0", "1-1", "1-2", "2-0", "3-0"]);
    broker.close();

    let sink = Arc::new(RwLock::new(GraphStore::new()));
    let consumer = SinkConsumer::new("users", EventApplier::new(CdcStrategy::schema(KeyStrategy::Default)), sink.clone());
    let report = consumer.spawn(broker.as_ref()).unwrap().join().await.unwrap();
    assert_eq!(report.applied, 5);
    assert_eq!(report.skipped, 0);

    let sink = sink.read().await;
    assert_eq!(sink.node_count(), 1);
    assert_eq!(sink.edge_count(), 0);
    let survivor = sink.all_nodes()[0];
    assert_eq!(survivor.get_property("surname"), Some(&PropertyValue::from("S.")));
    assert!(sink.get_edges_by_type(&EdgeType::new("KNOWS")).is_empty());

    lifecycle.shutdown().await;
}
