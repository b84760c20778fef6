//! Monitoring state machine
//!
//! `MonitorService` is the only writer of service state and incidents.
//! Probe outcomes funnel through [`MonitorService::record_success`] and
//! [`MonitorService::record_failure`]; CRUD mutations funnel through the
//! store and publish lifecycle events on the trigger broker for the
//! scheduler and the broadcaster to react to.
//!
//! ## Incident lifecycle
//!
//! - A failure recorded while the service was `up` or `unknown` opens a
//!   new incident and sends an alert. Further failures only bump
//!   counters, which keeps "at most one unresolved incident per service"
//!   true as long as per-service calls stay serialized (the scheduler
//!   guarantees that).
//! - A success resolves every unresolved incident and sends a recovery
//!   per incident, even when the service was already `up` (idempotent
//!   cleanup).
//!
//! ## Failure semantics
//!
//! Store errors surface to the caller. Notifier errors are logged and
//! dropped; the persisted transition is authoritative and notifications
//! are best-effort.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument};

use crate::bus::{Broker, ServiceUpdated, TriggerEvent, TriggerService};
use crate::model::{CreateUpdateServiceRequest, Incident, ServiceStatus, ServiceWithState};
use crate::notify::Notifier;
use crate::store::{Store, StoreResult};

/// State machine over services, state and incidents
pub struct MonitorService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    updates: Arc<Broker<ServiceUpdated>>,
    triggers: Arc<Broker<TriggerService>>,
}

impl MonitorService {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        updates: Arc<Broker<ServiceUpdated>>,
        triggers: Arc<Broker<TriggerService>>,
    ) -> Self {
        Self {
            store,
            notifier,
            updates,
            triggers,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ========================================================================
    // CRUD (publishes lifecycle events)
    // ========================================================================

    #[instrument(skip(self, req), fields(name = %req.name))]
    pub async fn add_service(
        &self,
        req: &CreateUpdateServiceRequest,
    ) -> StoreResult<ServiceWithState> {
        let created = self.store.create_service(req).await?;
        info!("service {} created", created.service.id);

        self.triggers.publish(TriggerService {
            event_type: TriggerEvent::Created,
            service: created.service.clone(),
        });
        Ok(created)
    }

    #[instrument(skip(self, req))]
    pub async fn update_service(
        &self,
        id: &str,
        req: &CreateUpdateServiceRequest,
    ) -> StoreResult<ServiceWithState> {
        let updated = self.store.update_service(id, req).await?;
        info!("service {id} updated");

        self.triggers.publish(TriggerService {
            event_type: TriggerEvent::Updated,
            service: updated.service.clone(),
        });
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete_service(&self, id: &str) -> StoreResult<()> {
        // snapshot for the event before the rows disappear
        let existing = self.store.get_service(id).await?;
        self.store.delete_service(id).await?;
        info!("service {id} deleted");

        self.triggers.publish(TriggerService {
            event_type: TriggerEvent::Deleted,
            service: existing.service,
        });
        Ok(())
    }

    /// Request an immediate one-shot check for a service
    #[instrument(skip(self))]
    pub async fn trigger_check(&self, id: &str) -> StoreResult<()> {
        let existing = self.store.get_service(id).await?;

        self.triggers.publish(TriggerService {
            event_type: TriggerEvent::Check,
            service: existing.service,
        });
        Ok(())
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Record a successful check
    ///
    /// Flips the state to `up`, resets failure counters, resolves every
    /// unresolved incident (sending recoveries) and publishes an update
    /// event.
    #[instrument(skip(self, response_time))]
    pub async fn record_success(
        &self,
        service_id: &str,
        response_time: Duration,
    ) -> StoreResult<()> {
        let current = self.store.get_service(service_id).await?;
        let service = current.service;
        let mut state = current.state;
        let now = Utc::now();

        state.status = ServiceStatus::Up;
        state.last_check = Some(now);
        state.next_check = Some(now + chrono::Duration::seconds(service.interval as i64));
        state.response_time_ms = Some(response_time.as_millis() as u64);
        state.consecutive_fails = 0;
        state.consecutive_success += 1;
        state.total_checks += 1;
        state.last_error = None;

        self.store.update_service_state(&state).await?;

        // idempotent cleanup: resolves nothing when already up
        let resolved = self.store.resolve_all_incidents(service_id).await?;
        for incident in &resolved {
            self.notify_recovery(&service.name, incident).await;
        }

        debug!(
            "recorded success for {service_id} ({}ms)",
            response_time.as_millis()
        );
        self.updates.publish(ServiceUpdated);
        Ok(())
    }

    /// Record a failed check
    ///
    /// Flips the state to `down` and bumps counters. When the service was
    /// `up` or `unknown` this opens a new incident and sends an alert.
    #[instrument(skip(self, error, response_time))]
    pub async fn record_failure(
        &self,
        service_id: &str,
        error: &str,
        response_time: Duration,
    ) -> StoreResult<()> {
        let current = self.store.get_service(service_id).await?;
        let service = current.service;
        let mut state = current.state;
        let now = Utc::now();

        let was_up = matches!(state.status, ServiceStatus::Up | ServiceStatus::Unknown);

        state.status = ServiceStatus::Down;
        state.last_check = Some(now);
        state.next_check = Some(now + chrono::Duration::seconds(service.interval as i64));
        state.response_time_ms = Some(response_time.as_millis() as u64);
        state.consecutive_fails += 1;
        state.consecutive_success = 0;
        state.total_checks += 1;
        state.last_error = Some(error.to_string());

        self.store.update_service_state(&state).await?;

        if was_up {
            let incident = Incident::open(service_id, error, now);
            self.store.save_incident(&incident).await?;
            info!(
                "opened incident {} for {service_id}: {error}",
                incident.id
            );

            if let Err(e) = self.notifier.send_alert(&service.name, &incident).await {
                error!("failed to send alert for {service_id}: {e:#}");
            }
        } else {
            debug!(
                "service {service_id} still down ({} consecutive fails)",
                state.consecutive_fails
            );
        }

        self.updates.publish(ServiceUpdated);
        Ok(())
    }

    /// Resolve every unresolved incident of a service, manually
    ///
    /// Sends a recovery notification per transitioned incident; calling
    /// again immediately is a no-op.
    #[instrument(skip(self))]
    pub async fn force_resolve_incidents(&self, service_id: &str) -> StoreResult<Vec<Incident>> {
        let current = self.store.get_service(service_id).await?;

        let resolved = self.store.resolve_all_incidents(service_id).await?;
        for incident in &resolved {
            self.notify_recovery(&current.service.name, incident).await;
        }

        if !resolved.is_empty() {
            info!(
                "force-resolved {} incidents for {service_id}",
                resolved.len()
            );
            self.updates.publish(ServiceUpdated);
        }
        Ok(resolved)
    }

    async fn notify_recovery(&self, service_name: &str, incident: &Incident) {
        if let Err(e) = self.notifier.send_recovery(service_name, incident).await {
            error!("failed to send recovery for {service_name}: {e:#}");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
