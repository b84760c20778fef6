//! SQLite persistence across store restarts

use std::sync::Arc;
use std::time::Duration;

use sentinel::model::{IncidentFilter, ServiceStatus};
use sentinel::store::{SqliteStore, Store};

use crate::helpers::{start_engine_with_store, tcp_service};

#[tokio::test]
async fn engine_state_survives_a_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sentinel.db");

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let engine = start_engine_with_store(store).await;

    // a tcp service against a dead port: the initial check fails and
    // opens an incident
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let created = engine
        .monitor
        .add_service(&tcp_service("redis", &dead_addr))
        .await
        .unwrap();
    let id = created.service.id.clone();

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let current = engine.store.get_service(&id).await.unwrap();
        if current.state.status == ServiceStatus::Down {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "service never went down");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    engine.shutdown().await;
    engine.store.close().await.unwrap();

    // reopen the same file with a fresh store
    let reopened = SqliteStore::new(&db_path).await.unwrap();

    let current = reopened.get_service(&id).await.unwrap();
    assert_eq!(current.service.name, "redis");
    assert_eq!(current.state.status, ServiceStatus::Down);
    assert!(current.state.total_checks >= 1);
    assert_eq!(current.active_incident_count, 1);

    let (incidents, total) = reopened
        .find_incidents(&IncidentFilter {
            service_id: Some(id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert!(!incidents[0].resolved);
    assert!(incidents[0].error.contains("connect"));

    reopened.close().await.unwrap();
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sentinel.db");

    let first = SqliteStore::new(&db_path).await.unwrap();
    first.close().await.unwrap();

    // opening again re-runs the migration set without error
    let second = SqliteStore::new(&db_path).await.unwrap();
    let (items, total) = second
        .find_services(&Default::default())
        .await
        .unwrap();
    assert!(items.is_empty());
    assert_eq!(total, 0);
    second.close().await.unwrap();
}
