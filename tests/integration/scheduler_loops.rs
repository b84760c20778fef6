//! Scheduler behavior: happy path, retries, config updates, deletion

use std::time::Duration;

use sentinel::broadcaster::FrameType;
use sentinel::model::{IncidentFilter, ServiceStatus};
use sentinel::store::Store;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{http_service, start_engine, wait_for};

#[tokio::test]
async fn happy_path_reaches_up_within_two_intervals() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let engine = start_engine().await;
    let created = engine
        .monitor
        .add_service(&http_service(
            "api",
            &format!("{}/health", server.uri()),
            1,
            1,
            1,
            "false",
        ))
        .await
        .unwrap();
    let id = created.service.id.clone();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let current = engine.store.get_service(&id).await.unwrap();
    assert_eq!(current.state.status, ServiceStatus::Up);
    assert!(current.state.total_checks >= 1);
    assert!(current.state.consecutive_success >= 1);
    assert_eq!(current.incident_count, 0);
    assert!(current.state.response_time_ms.is_some());
    assert!(current.state.last_check.is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn retries_recover_within_one_round() {
    let server = MockServer::start().await;
    // first two attempts fail, the third succeeds
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = start_engine().await;
    let created = engine
        .monitor
        .add_service(&http_service(
            "api",
            &format!("{}/health", server.uri()),
            3600,
            1,
            3,
            "",
        ))
        .await
        .unwrap();
    let id = created.service.id.clone();

    // inter-attempt sleeps are 1s and 2s, so the round takes >= 3s
    let started = std::time::Instant::now();
    let current = wait_for(&engine.store, &id, 10, |c| c.state.total_checks >= 1).await;
    let elapsed = started.elapsed();

    assert_eq!(current.state.status, ServiceStatus::Up);
    assert_eq!(current.state.total_checks, 1);
    assert_eq!(current.incident_count, 0);
    assert_eq!(engine.notifier.alert_count(), 0);
    assert!(
        elapsed >= Duration::from_millis(2800),
        "expected backoff sleeps, round finished in {elapsed:?}"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn interval_update_applies_to_a_fresh_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = start_engine().await;
    let created = engine
        .monitor
        .add_service(&http_service(
            "api",
            &format!("{}/health", server.uri()),
            30,
            1,
            1,
            "false",
        ))
        .await
        .unwrap();
    let id = created.service.id.clone();

    // only the initial check runs on the 30s job
    wait_for(&engine.store, &id, 5, |c| c.state.total_checks == 1).await;

    let mut req = http_service(
        "api",
        &format!("{}/health", server.uri()),
        1,
        1,
        1,
        "false",
    );
    req.tags = created.service.tags.clone();
    engine.monitor.update_service(&id, &req).await.unwrap();

    // two more checks within 5s proves the 1s ticker replaced the 30s one
    wait_for(&engine.store, &id, 5, |c| c.state.total_checks >= 3).await;
    assert_eq!(engine.scheduler.job_count(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn disabling_a_service_stops_its_checks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = start_engine().await;
    let created = engine
        .monitor
        .add_service(&http_service(
            "api",
            &format!("{}/health", server.uri()),
            1,
            1,
            1,
            "false",
        ))
        .await
        .unwrap();
    let id = created.service.id.clone();

    wait_for(&engine.store, &id, 5, |c| c.state.total_checks >= 1).await;

    let mut req = http_service(
        "api",
        &format!("{}/health", server.uri()),
        1,
        1,
        1,
        "false",
    );
    req.is_enabled = false;
    engine.monitor.update_service(&id, &req).await.unwrap();

    // the job is gone and the counters freeze
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while engine.scheduler.job_count() > 0 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(engine.scheduler.job_count(), 0);

    let frozen = engine.store.get_service(&id).await.unwrap().state.total_checks;
    tokio::time::sleep(Duration::from_millis(2200)).await;
    let current = engine.store.get_service(&id).await.unwrap();
    assert_eq!(current.state.total_checks, frozen);

    engine.shutdown().await;
}

#[tokio::test]
async fn delete_is_clean() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let engine = start_engine().await;
    let created = engine
        .monitor
        .add_service(&http_service(
            "api",
            &format!("{}/health", server.uri()),
            1,
            1,
            1,
            "",
        ))
        .await
        .unwrap();
    let id = created.service.id.clone();

    // one unresolved incident exists
    wait_for(&engine.store, &id, 5, |c| c.active_incident_count == 1).await;

    let (_, mut frames) = engine.broadcaster.subscribe();
    engine.monitor.delete_service(&id).await.unwrap();

    // incidents for the service are gone
    let (items, total) = engine
        .store
        .find_incidents(&IncidentFilter {
            service_id: Some(id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(items.is_empty());
    assert_eq!(total, 0);
    assert!(engine.store.get_service(&id).await.is_err());

    // after the deleted frame, no further events reference the service
    let mut saw_deleted = false;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    while let Ok(frame) = frames.try_recv() {
        let frame_id = frame.data["id"].as_str().unwrap_or_default().to_string();
        let frame_service_id = frame.data["service_id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if frame.frame_type == FrameType::ServiceDeleted && frame_id == id {
            saw_deleted = true;
            continue;
        }
        assert!(
            frame_id != id && frame_service_id != id,
            "event for deleted service: {frame:?}"
        );
    }
    assert!(saw_deleted, "expected a service_deleted frame");

    engine.shutdown().await;
}
