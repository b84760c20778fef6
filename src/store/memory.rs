//! In-memory store (no persistence)
//!
//! Keeps everything in process memory behind an `RwLock`. Useful for:
//! - Tests without database dependencies
//! - Throwaway setups (`storage.backend = "none"`)
//!
//! All data is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use ulid::Ulid;

use super::error::{StoreError, StoreResult};
use super::Store;
use crate::model::{
    CreateUpdateServiceRequest, Incident, IncidentFilter, Service, ServiceFilter, ServiceOrder,
    ServiceState, ServiceStats, ServiceStatus, ServiceWithState,
};

#[derive(Default)]
struct Inner {
    services: HashMap<String, Service>,
    states: HashMap<String, ServiceState>,
    incidents: HashMap<String, Incident>,
}

/// In-memory store
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn with_state(&self, id: &str) -> StoreResult<ServiceWithState> {
        let service = self
            .services
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("service {id}")))?;
        let state = self
            .states
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("service state {id}")))?;

        let incident_count = self
            .incidents
            .values()
            .filter(|i| i.service_id == *id)
            .count() as u64;
        let active_incident_count = self
            .incidents
            .values()
            .filter(|i| i.service_id == *id && !i.resolved)
            .count() as u64;

        Ok(ServiceWithState {
            service: service.clone(),
            state: state.clone(),
            incident_count,
            active_incident_count,
        })
    }
}

fn matches_service(filter: &ServiceFilter, service: &Service, state: &ServiceState) -> bool {
    if let Some(name) = &filter.name {
        if !service.name.to_lowercase().contains(&name.to_lowercase()) {
            return false;
        }
    }
    if let Some(protocol) = filter.protocol {
        if service.protocol != protocol {
            return false;
        }
    }
    if let Some(enabled) = filter.is_enabled {
        if service.is_enabled != enabled {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if state.status != status {
            return false;
        }
    }
    if !filter.tags.is_empty() && !filter.tags.iter().any(|t| service.tags.contains(t)) {
        return false;
    }
    true
}

fn matches_incident(filter: &IncidentFilter, incident: &Incident) -> bool {
    if let Some(service_id) = &filter.service_id {
        if incident.service_id != *service_id {
            return false;
        }
    }
    if let Some(resolved) = filter.resolved {
        if incident.resolved != resolved {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        if !incident.error.contains(search.as_str()) && incident.service_id != *search {
            return false;
        }
    }
    if let Some(start) = filter.start_time {
        if incident.start_time < start {
            return false;
        }
    }
    if let Some(end) = filter.end_time {
        if incident.start_time > end {
            return false;
        }
    }
    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_service(
        &self,
        req: &CreateUpdateServiceRequest,
    ) -> StoreResult<ServiceWithState> {
        let config = req.validate().map_err(StoreError::InvalidInput)?;
        let now = Utc::now();
        let id = Ulid::new().to_string();

        let service = Service {
            id: id.clone(),
            name: req.name.clone(),
            protocol: req.protocol,
            interval: req.interval,
            timeout: req.timeout,
            retries: req.retries,
            tags: req.normalized_tags(),
            config,
            is_enabled: req.is_enabled,
            created_at: now,
            updated_at: now,
        };
        let state = ServiceState::initial(&id, req.interval, now);

        let mut inner = self.inner.write().await;
        inner.services.insert(id.clone(), service);
        inner.states.insert(id.clone(), state);
        debug!("created service {id} in memory");
        inner.with_state(&id)
    }

    async fn get_service(&self, id: &str) -> StoreResult<ServiceWithState> {
        self.inner.read().await.with_state(id)
    }

    async fn find_services(
        &self,
        filter: &ServiceFilter,
    ) -> StoreResult<(Vec<ServiceWithState>, u64)> {
        let inner = self.inner.read().await;

        let mut matched: Vec<&Service> = inner
            .services
            .values()
            .filter(|service| {
                inner
                    .states
                    .get(&service.id)
                    .is_some_and(|state| matches_service(filter, service, state))
            })
            .collect();

        match filter.order_by {
            ServiceOrder::Name => matched.sort_by(|a, b| a.name.cmp(&b.name)),
            ServiceOrder::Protocol => {
                matched.sort_by(|a, b| a.protocol.as_str().cmp(b.protocol.as_str()))
            }
            ServiceOrder::CreatedAt => matched.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            ServiceOrder::UpdatedAt => matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(filter.page.offset() as usize)
            .take(filter.page.limit() as usize)
            .map(|service| inner.with_state(&service.id))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok((items, total))
    }

    async fn update_service(
        &self,
        id: &str,
        req: &CreateUpdateServiceRequest,
    ) -> StoreResult<ServiceWithState> {
        let config = req.validate().map_err(StoreError::InvalidInput)?;

        let mut inner = self.inner.write().await;
        let service = inner
            .services
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("service {id}")))?;

        service.name = req.name.clone();
        service.protocol = req.protocol;
        service.interval = req.interval;
        service.timeout = req.timeout;
        service.retries = req.retries;
        service.tags = req.normalized_tags();
        service.config = config;
        service.is_enabled = req.is_enabled;
        service.updated_at = Utc::now();

        inner.with_state(id)
    }

    async fn delete_service(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.services.remove(id).is_none() {
            return Err(StoreError::NotFound(format!("service {id}")));
        }
        inner.states.remove(id);
        inner.incidents.retain(|_, i| i.service_id != id);
        Ok(())
    }

    async fn update_service_state(&self, state: &ServiceState) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.states.contains_key(&state.service_id) {
            return Err(StoreError::NotFound(format!(
                "service state {}",
                state.service_id
            )));
        }
        inner
            .states
            .insert(state.service_id.clone(), state.clone());
        Ok(())
    }

    async fn save_incident(&self, incident: &Incident) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .incidents
            .insert(incident.id.clone(), incident.clone());
        Ok(())
    }

    async fn update_incident(&self, incident: &Incident) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.incidents.contains_key(&incident.id) {
            return Err(StoreError::NotFound(format!("incident {}", incident.id)));
        }
        inner
            .incidents
            .insert(incident.id.clone(), incident.clone());
        Ok(())
    }

    async fn delete_incident(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .incidents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("incident {id}")))
    }

    async fn get_incident(&self, id: &str) -> StoreResult<Incident> {
        self.inner
            .read()
            .await
            .incidents
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("incident {id}")))
    }

    async fn find_incidents(&self, filter: &IncidentFilter) -> StoreResult<(Vec<Incident>, u64)> {
        let inner = self.inner.read().await;

        let mut matched: Vec<Incident> = inner
            .incidents
            .values()
            .filter(|i| matches_incident(filter, i))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(filter.page.offset() as usize)
            .take(filter.page.limit() as usize)
            .collect();

        Ok((items, total))
    }

    async fn resolve_all_incidents(&self, service_id: &str) -> StoreResult<Vec<Incident>> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let mut resolved = Vec::new();
        for incident in inner.incidents.values_mut() {
            if incident.service_id == service_id && !incident.resolved {
                incident.resolve(now);
                resolved.push(incident.clone());
            }
        }
        Ok(resolved)
    }

    async fn service_stats(
        &self,
        service_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<ServiceStats> {
        let inner = self.inner.read().await;

        let state = inner
            .states
            .get(service_id)
            .ok_or_else(|| StoreError::NotFound(format!("service {service_id}")))?;

        let now = Utc::now();
        let mut total_incidents = 0u64;
        let mut downtime_ms = 0i64;

        for incident in inner.incidents.values() {
            if incident.service_id != service_id {
                continue;
            }
            if incident.start_time >= since {
                total_incidents += 1;
            }
            let window_start = incident.start_time.max(since);
            let window_end = incident.end_time.unwrap_or(now).min(now);
            if window_end > window_start {
                downtime_ms += (window_end - window_start).num_milliseconds();
            }
        }

        let period_ms = (now - since).num_milliseconds();
        let uptime_percentage = if period_ms > 0 {
            ((1.0 - downtime_ms as f64 / period_ms as f64) * 100.0).clamp(0.0, 100.0)
        } else {
            100.0
        };

        Ok(ServiceStats {
            service_id: service_id.to_string(),
            since,
            total_incidents,
            total_downtime_seconds: downtime_ms / 1000,
            uptime_percentage,
            avg_response_time_ms: state.response_time_ms,
        })
    }

    async fn all_tags(&self) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        let mut tags: Vec<String> = inner
            .services
            .values()
            .flat_map(|s| s.tags.iter().cloned())
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn tags_with_count(&self) -> StoreResult<HashMap<String, u64>> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for service in inner.services.values() {
            for tag in &service.tags {
                *counts.entry(tag.clone()).or_insert(0u64) += 1;
            }
        }
        Ok(counts)
    }

    async fn close(&self) -> StoreResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
