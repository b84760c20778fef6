//! Discord webhook sink
//!
//! Builds Discord embed payloads for incident alerts and recoveries and
//! delivers them to a webhook URL.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument};

use super::Notifier;
use crate::model::Incident;

const COLOR_RED: u32 = 15158332;
const COLOR_GREEN: u32 = 3066993;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Sink that posts incident embeds to a Discord webhook
#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: Client,
    url: String,
    /// Optional user to mention in the message content
    user_id: Option<String>,
}

impl DiscordNotifier {
    pub fn new(url: String, user_id: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            user_id,
        }
    }

    fn build_alert_embed(&self, service_name: &str, incident: &Incident) -> Embed {
        Embed {
            title: Some(format!("🔴 Service Down: {service_name}")),
            description: Some(incident.error.clone()),
            color: Some(COLOR_RED),
            fields: vec![EmbedField {
                name: "Started".to_string(),
                value: incident.start_time.to_rfc3339(),
                inline: true,
            }],
            footer: Some(EmbedFooter {
                text: "sentinel".to_string(),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    fn build_recovery_embed(&self, service_name: &str, incident: &Incident) -> Embed {
        let mut fields = vec![EmbedField {
            name: "Started".to_string(),
            value: incident.start_time.to_rfc3339(),
            inline: true,
        }];
        if let Some(duration_ns) = incident.duration {
            fields.push(EmbedField {
                name: "Duration".to_string(),
                value: format_duration(duration_ns),
                inline: true,
            });
        }

        Embed {
            title: Some(format!("✅ Service Recovered: {service_name}")),
            description: Some(incident.error.clone()),
            color: Some(COLOR_GREEN),
            fields,
            footer: Some(EmbedFooter {
                text: "sentinel".to_string(),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    fn build_message(&self, service_name: &str, emoji: &str, embed: Embed) -> Message {
        let content = self
            .user_id
            .as_ref()
            .map(|user_id| format!("{emoji} Service: `{service_name}` <@{user_id}>"));
        Message {
            content,
            embeds: vec![embed],
        }
    }

    #[instrument(skip(self, message))]
    async fn send_message(&self, message: &Message) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .context("failed to send discord webhook")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "discord webhook returned status {}",
                response.status()
            ));
        }

        info!("sent discord notification");
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send_alert(&self, service_name: &str, incident: &Incident) -> Result<()> {
        let embed = self.build_alert_embed(service_name, incident);
        let message = self.build_message(service_name, "🔴", embed);
        self.send_message(&message).await
    }

    async fn send_recovery(&self, service_name: &str, incident: &Incident) -> Result<()> {
        let embed = self.build_recovery_embed(service_name, incident);
        let message = self.build_message(service_name, "✅", embed);
        self.send_message(&message).await
    }
}

fn format_duration(duration_ns: i64) -> String {
    let total_secs = duration_ns / 1_000_000_000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
