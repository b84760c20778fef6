//! Per-service probe scheduling
//!
//! The scheduler owns one in-memory job per enabled service. Each job is
//! an independent task running a probe loop:
//!
//! 1. Check immediately on start, then on every `interval` tick
//! 2. Re-read the service from the store on each round, so updates apply
//!    on the next tick
//! 3. Probe with up to `retries` attempts, each bounded by `timeout`,
//!    sleeping `attempt * 1s` between attempts
//! 4. Record the outcome through the monitor
//!
//! Lifecycle events arrive over the trigger broker: `created` adds a job,
//! `updated` replaces it, `deleted` cancels it, `check` requests an
//! immediate round. Within one job checks are strictly serial; a tick
//! that fires while a check is still running is skipped, and `check`
//! requests are coalesced through a single-slot command channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::bus::{Broker, TriggerEvent, TriggerService};
use crate::model::{Page, Service, ServiceFilter};
use crate::monitor::MonitorService;
use crate::probes::build_probe;
use crate::store::{Store, StoreResult};

/// How long `stop` waits for in-flight checks before abandoning them
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum JobCommand {
    CheckNow,
}

/// In-memory record driving probes for one service
struct Job {
    name: String,
    command_tx: mpsc::Sender<JobCommand>,
    handle: JoinHandle<()>,
}

struct Listener {
    subscription: u64,
    handle: JoinHandle<()>,
}

/// Owns the probe loops and reacts to service lifecycle events
pub struct Scheduler {
    store: Arc<dyn Store>,
    monitor: Arc<MonitorService>,
    triggers: Arc<Broker<TriggerService>>,
    jobs: Mutex<HashMap<String, Job>>,
    listener: Mutex<Option<Listener>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        monitor: Arc<MonitorService>,
        triggers: Arc<Broker<TriggerService>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            monitor,
            triggers,
            jobs: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
        })
    }

    /// Load enabled services, spawn their probe loops and start reacting
    /// to lifecycle events
    pub async fn start(self: &Arc<Self>) -> StoreResult<()> {
        let mut page = 1;
        loop {
            let filter = ServiceFilter {
                is_enabled: Some(true),
                page: Page::new(Some(page), Some(Page::MAX_SIZE)),
                ..Default::default()
            };
            let (items, _) = self.store.find_services(&filter).await?;
            let fetched = items.len() as u64;

            for item in items {
                self.add_job(&item.service);
            }

            if fetched < Page::MAX_SIZE {
                break;
            }
            page += 1;
        }

        let (subscription, mut rx) = self.triggers.subscribe();
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                scheduler.handle_event(event);
            }
            debug!("trigger subscription closed");
        });
        *self.listener.lock().expect("scheduler lock poisoned") = Some(Listener {
            subscription,
            handle,
        });

        info!("scheduler started with {} jobs", self.job_count());
        Ok(())
    }

    /// Cancel every job and wait for them to drain
    ///
    /// In-flight checks get [`STOP_GRACE`] to finish; whatever is still
    /// running afterwards is abandoned, not joined indefinitely.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        info!("stopping scheduler");

        if let Some(listener) = self
            .listener
            .lock()
            .expect("scheduler lock poisoned")
            .take()
        {
            self.triggers.unsubscribe(listener.subscription);
            listener.handle.abort();
        }

        let jobs: Vec<Job> = self
            .jobs
            .lock()
            .expect("scheduler lock poisoned")
            .drain()
            .map(|(_, job)| job)
            .collect();

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let Job {
                handle, command_tx, ..
            } = job;
            // closing the command channel tells the loop to exit
            drop(command_tx);
            handles.push(handle);
        }

        let drained = tokio::time::timeout(STOP_GRACE, async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("grace period elapsed, abandoning remaining jobs");
            for handle in &handles {
                handle.abort();
            }
        }

        info!("scheduler stopped");
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().expect("scheduler lock poisoned").len()
    }

    fn handle_event(&self, event: TriggerService) {
        let id = event.service.id.clone();
        match event.event_type {
            TriggerEvent::Created => {
                if event.service.is_enabled {
                    self.add_job(&event.service);
                }
            }
            TriggerEvent::Updated => {
                self.remove_job(&id);
                if event.service.is_enabled {
                    self.add_job(&event.service);
                }
            }
            TriggerEvent::Deleted => self.remove_job(&id),
            TriggerEvent::Check => self.request_check(&id),
            TriggerEvent::Unknown => warn!("ignoring unknown lifecycle event for {id}"),
        }
    }

    fn add_job(&self, service: &Service) {
        let (command_tx, command_rx) = mpsc::channel(1);

        let handle = tokio::spawn(probe_loop(
            self.store.clone(),
            self.monitor.clone(),
            service.id.clone(),
            service.interval_duration(),
            command_rx,
        ));

        let job = Job {
            name: service.name.clone(),
            command_tx,
            handle,
        };

        let mut jobs = self.jobs.lock().expect("scheduler lock poisoned");
        if let Some(previous) = jobs.insert(service.id.clone(), job) {
            previous.handle.abort();
        }
        debug!("job added for {} ({})", service.name, service.id);
    }

    fn remove_job(&self, id: &str) {
        let removed = self.jobs.lock().expect("scheduler lock poisoned").remove(id);
        if let Some(job) = removed {
            job.handle.abort();
            debug!("job removed for {} ({id})", job.name);
        }
    }

    /// Request an immediate check; coalesced when one is already pending
    fn request_check(&self, id: &str) {
        let jobs = self.jobs.lock().expect("scheduler lock poisoned");
        let Some(job) = jobs.get(id) else {
            debug!("no job for {id}, ignoring check request");
            return;
        };

        match job.command_tx.try_send(JobCommand::CheckNow) {
            Ok(()) => debug!("immediate check requested for {id}"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("check already pending for {id}, coalescing");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("job for {id} is gone, check request dropped");
            }
        }
    }
}

/// Probe loop for one service
///
/// Runs until the command channel closes, the job is aborted, or the
/// service disappears from the store.
async fn probe_loop(
    store: Arc<dyn Store>,
    monitor: Arc<MonitorService>,
    service_id: String,
    interval: Duration,
    mut command_rx: mpsc::Receiver<JobCommand>,
) {
    debug!("probe loop for {service_id} started (interval {interval:?})");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !run_check(&store, &monitor, &service_id).await {
                    break;
                }
            }

            command = command_rx.recv() => match command {
                Some(JobCommand::CheckNow) => {
                    if !run_check(&store, &monitor, &service_id).await {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    debug!("probe loop for {service_id} stopped");
}

/// One check round; returns false when the loop should exit
async fn run_check(
    store: &Arc<dyn Store>,
    monitor: &Arc<MonitorService>,
    service_id: &str,
) -> bool {
    // fresh read so updates apply on the next tick
    let current = match store.get_service(service_id).await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => {
            debug!("service {service_id} gone, stopping probe loop");
            return false;
        }
        Err(e) => {
            warn!("failed to load service {service_id}: {e}");
            return true;
        }
    };
    let service = current.service;

    if !service.is_enabled {
        debug!("service {service_id} disabled, skipping check");
        return true;
    }

    let probe = match build_probe(&service) {
        Ok(probe) => probe,
        Err(e) => {
            warn!("failed to build probe for {service_id}: {e:#}");
            return true;
        }
    };

    let timeout = service.timeout_duration();
    let retries = service.retries.max(1);
    let start = Instant::now();
    let mut last_err = None;

    for attempt in 1..=retries {
        match probe.check(timeout).await {
            Ok(()) => {
                if let Err(e) = monitor.record_success(service_id, start.elapsed()).await {
                    warn!("failed to record success for {service_id}: {e}");
                }
                return true;
            }
            Err(e) => {
                debug!("check attempt {attempt}/{retries} for {service_id} failed: {e:#}");
                last_err = Some(e);
                if attempt < retries {
                    // linear backoff between attempts
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
            }
        }
    }

    let message = last_err
        .map(|e| format!("{e:#}"))
        .unwrap_or_else(|| "check failed".to_string());
    if let Err(e) = monitor.record_failure(service_id, &message, start.elapsed()).await {
        warn!("failed to record failure for {service_id}: {e}");
    }
    true
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ServiceUpdated;
    use crate::model::{CreateUpdateServiceRequest, Protocol, ServiceStatus, ServiceWithState};
    use crate::notify::{FanoutNotifier, Notifier};
    use crate::store::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        store: Arc<MemoryStore>,
        monitor: Arc<MonitorService>,
        scheduler: Arc<Scheduler>,
        triggers: Arc<Broker<TriggerService>>,
    }

    fn fixture() -> Fixture {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let updates: Arc<Broker<ServiceUpdated>> = Arc::new(Broker::new());
        let triggers: Arc<Broker<TriggerService>> = Arc::new(Broker::new());
        updates.start();
        triggers.start();

        let notifier: Arc<dyn Notifier> = Arc::new(FanoutNotifier::new(vec![]));
        let monitor = Arc::new(MonitorService::new(
            store.clone(),
            notifier,
            updates,
            triggers.clone(),
        ));
        let scheduler = Scheduler::new(store.clone(), monitor.clone(), triggers.clone());

        Fixture {
            store,
            monitor,
            scheduler,
            triggers,
        }
    }

    fn http_request(name: &str, url: &str, interval: u64) -> CreateUpdateServiceRequest {
        CreateUpdateServiceRequest {
            name: name.to_string(),
            protocol: Protocol::Http,
            interval,
            timeout: 2,
            retries: 1,
            tags: vec![],
            config: json!({
                "endpoints": [{"name": "root", "url": url}]
            }),
            is_enabled: true,
        }
    }

    /// Poll the store until the predicate holds or the deadline passes
    async fn wait_for(
        store: &Arc<MemoryStore>,
        id: &str,
        predicate: impl Fn(&ServiceWithState) -> bool,
    ) -> ServiceWithState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(current) = crate::store::Store::get_service(store.as_ref(), id).await {
                if predicate(&current) {
                    return current;
                }
            }
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    #[tokio::test]
    async fn created_service_gets_initial_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let f = fixture();
        f.scheduler.start().await.unwrap();

        // long interval: only the immediate initial check can account for
        // the observed state change
        let created = f
            .monitor
            .add_service(&http_request("api", &format!("{}/health", server.uri()), 3600))
            .await
            .unwrap();

        let current = wait_for(&f.store, &created.service.id, |c| {
            c.state.total_checks >= 1
        })
        .await;

        assert_eq!(current.state.status, ServiceStatus::Up);
        assert_eq!(current.state.consecutive_success, 1);
        assert_eq!(f.scheduler.job_count(), 1);

        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn start_loads_enabled_services_only() {
        let f = fixture();

        // created before start, without lifecycle events
        f.store
            .create_service(&http_request("a", "http://localhost:1/", 3600))
            .await
            .unwrap();
        let mut disabled = http_request("b", "http://localhost:1/", 3600);
        disabled.is_enabled = false;
        f.store.create_service(&disabled).await.unwrap();

        f.scheduler.start().await.unwrap();
        assert_eq!(f.scheduler.job_count(), 1);

        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn deleted_event_removes_job() {
        let f = fixture();
        f.scheduler.start().await.unwrap();

        let created = f
            .monitor
            .add_service(&http_request("api", "http://localhost:1/", 3600))
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while f.scheduler.job_count() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.scheduler.job_count(), 1);

        f.monitor.delete_service(&created.service.id).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while f.scheduler.job_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.scheduler.job_count(), 0);

        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn check_event_triggers_immediate_round() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let f = fixture();
        f.scheduler.start().await.unwrap();

        let created = f
            .monitor
            .add_service(&http_request("api", &format!("{}/health", server.uri()), 3600))
            .await
            .unwrap();
        let id = created.service.id.clone();

        // initial check
        wait_for(&f.store, &id, |c| c.state.total_checks >= 1).await;

        f.monitor.trigger_check(&id).await.unwrap();
        wait_for(&f.store, &id, |c| c.state.total_checks >= 2).await;

        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn check_request_without_job_is_ignored() {
        let f = fixture();
        f.scheduler.start().await.unwrap();

        // publishing a check for an unknown id must not panic anything
        f.triggers.publish(TriggerService {
            event_type: TriggerEvent::Check,
            service: crate::model::Service {
                id: "ghost".to_string(),
                name: "ghost".to_string(),
                protocol: Protocol::Tcp,
                interval: 10,
                timeout: 2,
                retries: 1,
                tags: vec![],
                config: crate::model::ServiceConfig::Tcp(crate::model::TcpConfig {
                    endpoint: "localhost:1".to_string(),
                    send_data: None,
                    expect_data: None,
                }),
                is_enabled: true,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            },
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.scheduler.job_count(), 0);

        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_jobs() {
        let f = fixture();
        f.scheduler.start().await.unwrap();

        f.monitor
            .add_service(&http_request("api", "http://localhost:1/", 3600))
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while f.scheduler.job_count() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        f.scheduler.stop().await;
        assert_eq!(f.scheduler.job_count(), 0);
    }
}
