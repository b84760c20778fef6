//! Incident lifecycle through the full engine
//!
//! Drives a service through up -> down -> up against a mock HTTP target
//! and verifies state, incidents and notifications at each step.

use std::time::Duration;

use sentinel::model::{IncidentFilter, ServiceStatus};
use sentinel::store::Store;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{http_service, start_engine, wait_for};

async fn mount_status(server: &MockServer, status: u16) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status).set_body_string(match status {
            200 => "OK",
            _ => "Internal Server Error",
        }))
        .mount(server)
        .await;
}

#[tokio::test]
async fn down_transition_opens_incident_and_recovery_closes_it() {
    let server = MockServer::start().await;
    mount_status(&server, 200).await;

    let engine = start_engine().await;
    let created = engine
        .monitor
        .add_service(&http_service(
            "api",
            &format!("{}/health", server.uri()),
            1,
            1,
            1,
            "!results.root.success",
        ))
        .await
        .unwrap();
    let id = created.service.id.clone();

    // healthy first
    let current = wait_for(&engine.store, &id, 5, |c| {
        c.state.status == ServiceStatus::Up
    })
    .await;
    assert_eq!(current.active_incident_count, 0);
    assert_eq!(engine.notifier.alert_count(), 0);

    // target starts failing: next tick opens exactly one incident
    mount_status(&server, 500).await;
    let current = wait_for(&engine.store, &id, 5, |c| {
        c.state.status == ServiceStatus::Down
    })
    .await;
    assert_eq!(current.active_incident_count, 1);
    assert!(current.state.consecutive_fails >= 1);
    assert_eq!(current.state.consecutive_success, 0);
    assert!(current
        .state
        .last_error
        .as_deref()
        .unwrap()
        .contains("HTTP 500"));
    assert_eq!(engine.notifier.alert_count(), 1);

    // stays down: no more incidents, no more alerts
    tokio::time::sleep(Duration::from_millis(2200)).await;
    let current = engine.store.get_service(&id).await.unwrap();
    assert_eq!(current.incident_count, 1);
    assert_eq!(engine.notifier.alert_count(), 1);

    // target recovers: incident resolves, one recovery is sent
    mount_status(&server, 200).await;
    let current = wait_for(&engine.store, &id, 5, |c| {
        c.state.status == ServiceStatus::Up
    })
    .await;
    assert_eq!(current.active_incident_count, 0);
    assert_eq!(current.incident_count, 1);
    assert_eq!(engine.notifier.recovery_count(), 1);

    let (incidents, _) = engine
        .store
        .find_incidents(&IncidentFilter {
            service_id: Some(id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert!(incident.resolved);
    assert!(incident.end_time.unwrap() >= incident.start_time);
    assert!(incident.duration.unwrap() > 0);

    // no new incidents appear after recovery
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let current = engine.store.get_service(&id).await.unwrap();
    assert_eq!(current.incident_count, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn force_resolve_is_idempotent_through_the_api_path() {
    let server = MockServer::start().await;
    mount_status(&server, 500).await;

    let engine = start_engine().await;
    let created = engine
        .monitor
        .add_service(&http_service(
            "api",
            &format!("{}/health", server.uri()),
            3600,
            1,
            1,
            "",
        ))
        .await
        .unwrap();
    let id = created.service.id.clone();

    // initial check opens the incident
    wait_for(&engine.store, &id, 5, |c| c.active_incident_count == 1).await;

    let first = engine.monitor.force_resolve_incidents(&id).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(engine.notifier.recovery_count(), 1);

    let second = engine.monitor.force_resolve_incidents(&id).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(engine.notifier.recovery_count(), 1);

    // manual resolution does not flip the status
    let current = engine.store.get_service(&id).await.unwrap();
    assert_eq!(current.state.status, ServiceStatus::Down);

    engine.shutdown().await;
}
