//! Shared fixtures for integration tests

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use sentinel::broadcaster::Broadcaster;
use sentinel::bus::{Broker, ServiceUpdated, TriggerService};
use sentinel::model::{
    CreateUpdateServiceRequest, Incident, Protocol, ServiceWithState,
};
use sentinel::monitor::MonitorService;
use sentinel::notify::Notifier;
use sentinel::scheduler::Scheduler;
use sentinel::store::{MemoryStore, Store};
use serde_json::json;

/// Notifier that records every delivered alert and recovery
#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<String>>,
    pub recoveries: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn alert_count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    pub fn recovery_count(&self) -> usize {
        self.recoveries.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_alert(&self, _service_name: &str, incident: &Incident) -> Result<()> {
        self.alerts.lock().unwrap().push(incident.id.clone());
        Ok(())
    }

    async fn send_recovery(&self, _service_name: &str, incident: &Incident) -> Result<()> {
        self.recoveries.lock().unwrap().push(incident.id.clone());
        Ok(())
    }
}

/// A fully wired engine over a given store
pub struct TestEngine {
    pub store: Arc<dyn Store>,
    pub monitor: Arc<MonitorService>,
    pub scheduler: Arc<Scheduler>,
    pub broadcaster: Arc<Broadcaster>,
    pub notifier: Arc<RecordingNotifier>,
    pub updates: Arc<Broker<ServiceUpdated>>,
    pub triggers: Arc<Broker<TriggerService>>,
}

impl TestEngine {
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.broadcaster.stop();
        self.triggers.stop();
        self.updates.stop();
    }
}

pub async fn start_engine() -> TestEngine {
    start_engine_with_store(Arc::new(MemoryStore::new())).await
}

pub async fn start_engine_with_store(store: Arc<dyn Store>) -> TestEngine {
    let updates: Arc<Broker<ServiceUpdated>> = Arc::new(Broker::new());
    let triggers: Arc<Broker<TriggerService>> = Arc::new(Broker::new());
    updates.start();
    triggers.start();

    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = Arc::new(MonitorService::new(
        store.clone(),
        notifier.clone(),
        updates.clone(),
        triggers.clone(),
    ));

    let scheduler = Scheduler::new(store.clone(), monitor.clone(), triggers.clone());
    scheduler.start().await.expect("scheduler start");

    let broadcaster = Broadcaster::new(store.clone(), updates.clone(), triggers.clone());
    broadcaster.start();

    TestEngine {
        store,
        monitor,
        scheduler,
        broadcaster,
        notifier,
        updates,
        triggers,
    }
}

/// HTTP service request with a single endpoint and explicit condition
pub fn http_service(
    name: &str,
    url: &str,
    interval: u64,
    timeout: u64,
    retries: u32,
    condition: &str,
) -> CreateUpdateServiceRequest {
    CreateUpdateServiceRequest {
        name: name.to_string(),
        protocol: Protocol::Http,
        interval,
        timeout,
        retries,
        tags: vec![],
        config: json!({
            "endpoints": [{"name": "root", "url": url}],
            "condition": condition
        }),
        is_enabled: true,
    }
}

pub fn tcp_service(name: &str, endpoint: &str) -> CreateUpdateServiceRequest {
    CreateUpdateServiceRequest {
        name: name.to_string(),
        protocol: Protocol::Tcp,
        interval: 10,
        timeout: 2,
        retries: 1,
        tags: vec![],
        config: json!({"endpoint": endpoint}),
        is_enabled: true,
    }
}

/// Poll the store until the predicate holds, panicking after `secs`
pub async fn wait_for(
    store: &Arc<dyn Store>,
    id: &str,
    secs: u64,
    predicate: impl Fn(&ServiceWithState) -> bool,
) -> ServiceWithState {
    let deadline = Instant::now() + Duration::from_secs(secs);
    loop {
        if let Ok(current) = store.get_service(id).await {
            if predicate(&current) {
                return current;
            }
        }
        assert!(
            Instant::now() < deadline,
            "condition not reached within {secs}s"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
