//! Live update fan-out to UI subscribers
//!
//! The broadcaster consumes both brokers and turns internal events into
//! typed JSON frames for connected WebSocket clients:
//!
//! - `TriggerService` lifecycle events become `service_*` frames carrying
//!   the service DTO (fresh state and incident counts where the rows
//!   still exist)
//! - `ServiceUpdated` state changes become `stats_update` frames carrying
//!   the dashboard aggregate, recomputed on demand
//!
//! Each subscriber has a bounded buffer. Dead or slow subscribers are
//! dropped from the set; the WebSocket handler owns the actual socket
//! writes and their deadlines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{Broker, ServiceUpdated, TriggerEvent, TriggerService};
use crate::model::{DashboardStats, IncidentFilter, Page, ServiceFilter, ServiceStatus};
use crate::store::{Store, StoreResult};

/// Buffered frames per UI subscriber; overflow drops the subscriber
const FRAME_BUFFER: usize = 64;

/// Frame type discriminator pushed to UIs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    ServiceCreated,
    ServiceUpdated,
    ServiceDeleted,
    ServiceCheck,
    StatsUpdate,
}

/// Typed JSON frame pushed to every live UI subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFrame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WsFrame {
    fn new(frame_type: FrameType, data: serde_json::Value) -> Self {
        Self {
            frame_type,
            timestamp: Utc::now(),
            data,
        }
    }
}

struct Forwarders {
    trigger_subscription: u64,
    update_subscription: u64,
    tasks: Vec<JoinHandle<()>>,
}

/// Consumes broker events and pushes frames to UI subscribers
pub struct Broadcaster {
    store: Arc<dyn Store>,
    updates: Arc<Broker<ServiceUpdated>>,
    triggers: Arc<Broker<TriggerService>>,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<WsFrame>>>,
    next_id: AtomicU64,
    forwarders: Mutex<Option<Forwarders>>,
}

impl Broadcaster {
    pub fn new(
        store: Arc<dyn Store>,
        updates: Arc<Broker<ServiceUpdated>>,
        triggers: Arc<Broker<TriggerService>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            updates,
            triggers,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            forwarders: Mutex::new(None),
        })
    }

    /// Start consuming both brokers
    pub fn start(self: &Arc<Self>) {
        let (trigger_subscription, mut trigger_rx) = self.triggers.subscribe();
        let (update_subscription, mut update_rx) = self.updates.subscribe();

        let broadcaster = Arc::clone(self);
        let trigger_task = tokio::spawn(async move {
            while let Some(event) = trigger_rx.recv().await {
                broadcaster.handle_trigger(event).await;
            }
        });

        let broadcaster = Arc::clone(self);
        let update_task = tokio::spawn(async move {
            while let Some(ServiceUpdated) = update_rx.recv().await {
                broadcaster.push_stats().await;
            }
        });

        *self.forwarders.lock().expect("broadcaster lock poisoned") = Some(Forwarders {
            trigger_subscription,
            update_subscription,
            tasks: vec![trigger_task, update_task],
        });

        info!("broadcaster started");
    }

    pub fn stop(&self) {
        if let Some(forwarders) = self
            .forwarders
            .lock()
            .expect("broadcaster lock poisoned")
            .take()
        {
            self.triggers.unsubscribe(forwarders.trigger_subscription);
            self.updates.unsubscribe(forwarders.update_subscription);
            for task in forwarders.tasks {
                task.abort();
            }
        }
        self.subscribers
            .lock()
            .expect("broadcaster lock poisoned")
            .clear();
        info!("broadcaster stopped");
    }

    /// Register a UI subscriber
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<WsFrame>) {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("broadcaster lock poisoned")
            .insert(id, tx);
        debug!("ui subscriber {id} registered");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .expect("broadcaster lock poisoned")
            .remove(&id);
        debug!("ui subscriber {id} removed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("broadcaster lock poisoned")
            .len()
    }

    /// Push a frame to every subscriber, dropping dead or slow ones
    fn push(&self, frame: WsFrame) {
        let mut subscribers = self.subscribers.lock().expect("broadcaster lock poisoned");
        subscribers.retain(|id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("ui subscriber {id} too slow, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("ui subscriber {id} disconnected");
                false
            }
        });
    }

    async fn handle_trigger(&self, event: TriggerService) {
        let frame_type = match event.event_type {
            TriggerEvent::Created => FrameType::ServiceCreated,
            TriggerEvent::Updated => FrameType::ServiceUpdated,
            TriggerEvent::Deleted => FrameType::ServiceDeleted,
            TriggerEvent::Check => FrameType::ServiceCheck,
            TriggerEvent::Unknown => return,
        };

        // fresh DTO where the rows still exist; the event snapshot covers
        // deletions
        let data = match self.store.get_service(&event.service.id).await {
            Ok(current) => serde_json::to_value(&current),
            Err(_) => serde_json::to_value(&event.service),
        };

        match data {
            Ok(data) => self.push(WsFrame::new(frame_type, data)),
            Err(e) => warn!("failed to serialize service frame: {e}"),
        }
    }

    async fn push_stats(&self) {
        if self.subscriber_count() == 0 {
            return;
        }
        match dashboard_stats(self.store.as_ref()).await {
            Ok(stats) => match serde_json::to_value(&stats) {
                Ok(data) => self.push(WsFrame::new(FrameType::StatsUpdate, data)),
                Err(e) => warn!("failed to serialize dashboard stats: {e}"),
            },
            Err(e) => warn!("failed to compute dashboard stats: {e}"),
        }
    }
}

/// Compute the dashboard aggregate by enumerating services and recent
/// incidents
pub async fn dashboard_stats(store: &dyn Store) -> StoreResult<DashboardStats> {
    let mut services = Vec::new();
    let mut page = 1;
    loop {
        let filter = ServiceFilter {
            page: Page::new(Some(page), Some(Page::MAX_SIZE)),
            ..Default::default()
        };
        let (items, _) = store.find_services(&filter).await?;
        let fetched = items.len() as u64;
        services.extend(items);
        if fetched < Page::MAX_SIZE {
            break;
        }
        page += 1;
    }

    let now = Utc::now();
    let mut stats = DashboardStats {
        total_services: services.len() as u64,
        services_up: 0,
        services_down: 0,
        services_unknown: 0,
        services_disabled: 0,
        protocols: HashMap::new(),
        active_incidents: 0,
        recent_incidents: 0,
        avg_response_time_ms: None,
        uptime_percentage: 100.0,
        total_checks: 0,
        checks_per_minute: 0.0,
        last_check: None,
    };

    let mut response_time_sum = 0u64;
    let mut response_time_count = 0u64;
    let mut enabled = 0u64;
    let mut enabled_up = 0u64;

    for current in &services {
        let service = &current.service;
        let state = &current.state;

        *stats
            .protocols
            .entry(service.protocol.as_str().to_string())
            .or_insert(0) += 1;

        if !service.is_enabled {
            stats.services_disabled += 1;
        } else {
            enabled += 1;
            stats.checks_per_minute += 60.0 / service.interval as f64;
        }

        match state.status {
            ServiceStatus::Up => {
                stats.services_up += 1;
                if service.is_enabled {
                    enabled_up += 1;
                }
            }
            ServiceStatus::Down => stats.services_down += 1,
            ServiceStatus::Unknown => stats.services_unknown += 1,
        }

        stats.total_checks += state.total_checks;

        if let Some(response_time) = state.response_time_ms {
            response_time_sum += response_time;
            response_time_count += 1;
        }
        if let Some(last_check) = state.last_check {
            stats.last_check = Some(match stats.last_check {
                Some(previous) => previous.max(last_check),
                None => last_check,
            });
        }
    }

    if response_time_count > 0 {
        stats.avg_response_time_ms = Some(response_time_sum as f64 / response_time_count as f64);
    }
    if enabled > 0 {
        stats.uptime_percentage = enabled_up as f64 / enabled as f64 * 100.0;
    }

    let (_, active) = store
        .find_incidents(&IncidentFilter {
            resolved: Some(false),
            page: Page::new(Some(1), Some(1)),
            ..Default::default()
        })
        .await?;
    stats.active_incidents = active;

    let (_, recent) = store
        .find_incidents(&IncidentFilter {
            start_time: Some(now - chrono::Duration::hours(24)),
            page: Page::new(Some(1), Some(1)),
            ..Default::default()
        })
        .await?;
    stats.recent_incidents = recent;

    Ok(stats)
}

// ============================================================================
// Tests
// ============================================================================
