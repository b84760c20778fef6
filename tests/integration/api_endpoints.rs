//! REST endpoint coverage against a live server

use std::net::SocketAddr;

use sentinel::api::{spawn_api_server, ApiState};
use sentinel::store::Store;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{start_engine, wait_for, TestEngine};

async fn spawn_test_api(engine: &TestEngine) -> SocketAddr {
    let state = ApiState {
        store: engine.store.clone(),
        monitor: engine.monitor.clone(),
        broadcaster: engine.broadcaster.clone(),
    };
    spawn_api_server("127.0.0.1:0".parse().unwrap(), true, state)
        .await
        .unwrap()
}

fn service_body(name: &str, url: &str) -> Value {
    json!({
        "name": name,
        "protocol": "http",
        "interval": 3600,
        "timeout": 2,
        "retries": 1,
        "tags": ["prod", "edge"],
        "config": {
            "endpoints": [{"name": "root", "url": url}],
            "condition": "!results.root.success"
        },
        "is_enabled": true
    })
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let engine = start_engine().await;
    let addr = spawn_test_api(&engine).await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    engine.shutdown().await;
}

#[tokio::test]
async fn service_crud_round_trip() {
    let target = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&target)
        .await;

    let engine = start_engine().await;
    let addr = spawn_test_api(&engine).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api/v1");
    let url = format!("{}/health", target.uri());

    // create
    let response = client
        .post(format!("{base}/services"))
        .json(&service_body("api", &url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["name"], "api");
    assert_eq!(created["state"]["status"], "unknown");
    assert_eq!(created["tags"], json!(["edge", "prod"]));

    // read back with byte-equivalent config
    let fetched: Value = client
        .get(format!("{base}/services/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["config"], service_body("api", &url)["config"]);

    // list with filters
    let listed: Value = client
        .get(format!("{base}/services?protocol=http&tags=prod&page_size=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["items"][0]["id"], json!(id));

    // update
    let mut body = service_body("api-renamed", &url);
    body["interval"] = json!(60);
    let updated: Value = client
        .put(format!("{base}/services/{id}"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["name"], "api-renamed");
    assert_eq!(updated["interval"], 60);

    // delete
    let response = client
        .delete(format!("{base}/services/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = client
        .get(format!("{base}/services/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains(&id));

    engine.shutdown().await;
}

#[tokio::test]
async fn invalid_requests_get_400() {
    let engine = start_engine().await;
    let addr = spawn_test_api(&engine).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api/v1");

    // interval below the minimum
    let mut body = service_body("bad", "http://localhost:1/");
    body["interval"] = json!(0);
    let response = client
        .post(format!("{base}/services"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("interval"));

    // config not matching the protocol
    let mut body = service_body("bad", "http://localhost:1/");
    body["config"] = json!({"endpoint": "localhost:9000"});
    let response = client
        .post(format!("{base}/services"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // unknown filter values
    let response = client
        .get(format!("{base}/services?status=sideways"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    engine.shutdown().await;
}

#[tokio::test]
async fn check_and_resolve_endpoints() {
    let target = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&target)
        .await;

    let engine = start_engine().await;
    let addr = spawn_test_api(&engine).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api/v1");

    let created: Value = client
        .post(format!("{base}/services"))
        .json(&service_body("api", &format!("{}/health", target.uri())))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    // initial check opens an incident
    wait_for(&engine.store, &id, 10, |c| c.active_incident_count == 1).await;

    // manual check bumps the counter again
    let before = engine.store.get_service(&id).await.unwrap().state.total_checks;
    let response = client
        .post(format!("{base}/services/{id}/check"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    wait_for(&engine.store, &id, 10, |c| c.state.total_checks > before).await;

    // resolve all incidents
    let response = client
        .post(format!("{base}/services/{id}/resolve"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "resolved 1 incidents");

    engine.shutdown().await;
}

#[tokio::test]
async fn incident_listings_and_deletion() {
    let target = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&target)
        .await;

    let engine = start_engine().await;
    let addr = spawn_test_api(&engine).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api/v1");

    let created: Value = client
        .post(format!("{base}/services"))
        .json(&service_body("api", &format!("{}/health", target.uri())))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    wait_for(&engine.store, &id, 10, |c| c.active_incident_count == 1).await;

    // per-service listing
    let listed: Value = client
        .get(format!("{base}/services/{id}/incidents?resolved=false"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);
    let incident_id = listed["items"][0]["id"].as_str().unwrap().to_string();

    // unknown service 404s instead of listing nothing
    let response = client
        .get(format!("{base}/services/nope/incidents"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // global listing with search
    let listed: Value = client
        .get(format!("{base}/incidents?search=HTTP%20500"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);

    // deleting through the wrong service 404s
    let response = client
        .delete(format!("{base}/services/other/incidents/{incident_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = client
        .delete(format!("{base}/services/{id}/incidents/{incident_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let listed: Value = client
        .get(format!("{base}/services/{id}/incidents"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn stats_tags_and_dashboard() {
    let target = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&target)
        .await;

    let engine = start_engine().await;
    let addr = spawn_test_api(&engine).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api/v1");

    let created: Value = client
        .post(format!("{base}/services"))
        .json(&service_body("api", &format!("{}/health", target.uri())))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    wait_for(&engine.store, &id, 10, |c| c.state.total_checks >= 1).await;

    // per-service stats with default window
    let stats: Value = client
        .get(format!("{base}/services/{id}/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["service_id"], json!(id));
    assert_eq!(stats["total_incidents"], 0);
    assert_eq!(stats["uptime_percentage"], 100.0);

    let response = client
        .get(format!("{base}/services/{id}/stats?days=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // tags
    let tags: Value = client
        .get(format!("{base}/tags"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tags, json!(["edge", "prod"]));

    let counts: Value = client
        .get(format!("{base}/tags/count"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(counts["prod"], 1);

    // dashboard aggregate
    let dashboard: Value = client
        .get(format!("{base}/dashboard/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(dashboard["total_services"], 1);
    assert_eq!(dashboard["services_up"], 1);
    assert_eq!(dashboard["protocols"]["http"], 1);
    assert_eq!(dashboard["uptime_percentage"], 100.0);

    engine.shutdown().await;
}
