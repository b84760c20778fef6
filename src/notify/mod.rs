//! Outbound notifications
//!
//! The monitor talks to a single [`Notifier`]; the default implementation
//! ([`FanoutNotifier`]) dispatches to every configured sink in parallel
//! with a per-sink timeout. Notification failures are logged and surfaced
//! to the caller, but they never affect a recorded state transition —
//! the store is authoritative, notifications are best-effort.

pub mod discord;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tracing::{error, info, instrument};

pub use discord::DiscordNotifier;

use crate::model::Incident;

/// Deadline for a single sink delivery
const SINK_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery of alert and recovery messages
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, service_name: &str, incident: &Incident) -> Result<()>;

    async fn send_recovery(&self, service_name: &str, incident: &Incident) -> Result<()>;
}

// ============================================================================
// Generic webhook sink
// ============================================================================

/// Sink that POSTs a JSON payload to an arbitrary webhook URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    #[instrument(skip(self, incident), fields(incident_id = %incident.id))]
    async fn post(&self, event: &str, service_name: &str, incident: &Incident) -> Result<()> {
        let payload = json!({
            "event": event,
            "service": service_name,
            "incident_id": incident.id,
            "error": incident.error,
            "started_at": incident.start_time.to_rfc3339(),
            "resolved_at": incident.end_time.map(|t| t.to_rfc3339()),
            "timestamp": Utc::now().to_rfc3339(),
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("failed to send webhook")?;

        if !response.status().is_success() {
            return Err(anyhow!("webhook returned status {}", response.status()));
        }

        info!("sent {event} webhook for {service_name}");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_alert(&self, service_name: &str, incident: &Incident) -> Result<()> {
        self.post("alert", service_name, incident).await
    }

    async fn send_recovery(&self, service_name: &str, incident: &Incident) -> Result<()> {
        self.post("recovery", service_name, incident).await
    }
}

// ============================================================================
// Fan-out
// ============================================================================

#[derive(Clone, Copy)]
enum Kind {
    Alert,
    Recovery,
}

/// Dispatches to all configured sinks in parallel
///
/// With no sinks configured this is a no-op notifier.
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
    sink_timeout: Duration,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            sinks,
            sink_timeout: SINK_TIMEOUT,
        }
    }

    pub fn with_sink_timeout(mut self, sink_timeout: Duration) -> Self {
        self.sink_timeout = sink_timeout;
        self
    }

    async fn dispatch(&self, kind: Kind, service_name: &str, incident: &Incident) -> Result<()> {
        let sends = self.sinks.iter().map(|sink| {
            let sink = sink.clone();
            async move {
                let send = match kind {
                    Kind::Alert => sink.send_alert(service_name, incident),
                    Kind::Recovery => sink.send_recovery(service_name, incident),
                };
                match tokio::time::timeout(self.sink_timeout, send).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("sink timed out after {:?}", self.sink_timeout)),
                }
            }
        });

        let mut first_error = None;
        for result in join_all(sends).await {
            if let Err(e) = result {
                error!("notification sink failed: {e:#}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn send_alert(&self, service_name: &str, incident: &Incident) -> Result<()> {
        self.dispatch(Kind::Alert, service_name, incident).await
    }

    async fn send_recovery(&self, service_name: &str, incident: &Incident) -> Result<()> {
        self.dispatch(Kind::Recovery, service_name, incident).await
    }
}

// ============================================================================
// Tests
// ============================================================================
