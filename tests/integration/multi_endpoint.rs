//! Multi-endpoint HTTP services with comparison conditions

use sentinel::model::{CreateUpdateServiceRequest, Protocol, ServiceStatus};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{start_engine, wait_for};

fn two_endpoint_service(uri: &str, condition: &str) -> CreateUpdateServiceRequest {
    CreateUpdateServiceRequest {
        name: "replicas".to_string(),
        protocol: Protocol::Http,
        interval: 3600,
        timeout: 2,
        retries: 1,
        tags: vec![],
        config: json!({
            "endpoints": [
                {"name": "a", "url": format!("{uri}/a"), "json_path": "value"},
                {"name": "b", "url": format!("{uri}/b"), "json_path": "value"}
            ],
            "condition": condition
        }),
        is_enabled: true,
    }
}

#[tokio::test]
async fn matching_values_pass_the_comparison_condition() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": 1})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": 1})))
        .mount(&server)
        .await;

    let engine = start_engine().await;
    let created = engine
        .monitor
        .add_service(&two_endpoint_service(
            &server.uri(),
            "results.a.value !== results.b.value",
        ))
        .await
        .unwrap();

    let current = wait_for(&engine.store, &created.service.id, 5, |c| {
        c.state.total_checks >= 1
    })
    .await;

    assert_eq!(current.state.status, ServiceStatus::Up);
    assert_eq!(current.incident_count, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn diverging_values_open_an_incident_with_composite_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": 1})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": 2})))
        .mount(&server)
        .await;

    let engine = start_engine().await;
    let created = engine
        .monitor
        .add_service(&two_endpoint_service(
            &server.uri(),
            "results.a.value !== results.b.value",
        ))
        .await
        .unwrap();

    let current = wait_for(&engine.store, &created.service.id, 5, |c| {
        c.state.status == ServiceStatus::Down
    })
    .await;

    assert_eq!(current.active_incident_count, 1);
    let error = current.state.last_error.unwrap();
    assert!(error.contains("condition signalled an incident"), "{error}");
    assert!(error.contains("a:"), "{error}");
    assert!(error.contains("b:"), "{error}");
    assert_eq!(engine.notifier.alert_count(), 1);

    engine.shutdown().await;
}
