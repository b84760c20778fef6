//! Domain model for monitored services
//!
//! This module defines the core entities (`Service`, `ServiceState`,
//! `Incident`), the protocol-specific configuration variants, and the
//! request/filter/statistics types shared between the store, the monitor
//! and the API surface.
//!
//! ## Design
//!
//! - **Tagged configs**: service configuration is stored as JSON but parsed
//!   into a `ServiceConfig` variant against the declared protocol at the
//!   domain boundary. The untyped JSON never reaches the probe layer.
//! - **Validation up-front**: requests are validated before anything is
//!   persisted; probes can assume a well-formed config.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of endpoints in an HTTP multi-endpoint service
pub const MAX_HTTP_ENDPOINTS: usize = 10;

/// Maximum length of a failure condition script in bytes (64 KiB)
pub const MAX_CONDITION_BYTES: usize = 64 * 1024;

// ============================================================================
// Status Enums
// ============================================================================

/// Wire protocol a service is probed with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Tcp,
    Grpc,
}

impl Protocol {
    /// Get the string representation (lowercase)
    ///
    /// This matches the serde serialization format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Tcp => "tcp",
            Protocol::Grpc => "grpc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Protocol::Http),
            "tcp" => Some(Protocol::Tcp),
            "grpc" => Some(Protocol::Grpc),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status of a service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// No check has completed yet
    Unknown,
    Up,
    Down,
}

impl ServiceStatus {
    /// Get the string representation (lowercase)
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Up => "up",
            ServiceStatus::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(ServiceStatus::Unknown),
            "up" => Some(ServiceStatus::Up),
            "down" => Some(ServiceStatus::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A monitored service as registered by an operator
///
/// Serialize-only: the inbound shape is [`CreateUpdateServiceRequest`],
/// whose raw config is parsed against the protocol.
#[derive(Debug, Clone, Serialize)]
pub struct Service {
    /// Lexicographically-sortable time-ordered identifier (ULID), immutable
    pub id: String,

    pub name: String,

    pub protocol: Protocol,

    /// Seconds between checks (>= 1)
    pub interval: u64,

    /// Per-attempt deadline in seconds (>= 1)
    pub timeout: u64,

    /// Probe attempts per check (>= 1)
    pub retries: u32,

    /// Tag set, deduplicated and sorted
    #[serde(default)]
    pub tags: Vec<String>,

    /// Protocol-specific configuration
    pub config: ServiceConfig,

    pub is_enabled: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Mutable per-service monitoring state (1:1 with `Service`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub service_id: String,

    pub status: ServiceStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_check: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub consecutive_fails: u32,
    pub consecutive_success: u32,
    pub total_checks: u64,

    /// Response time of the most recent check in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

impl ServiceState {
    /// Initial state for a freshly created service
    pub fn initial(service_id: &str, interval: u64, now: DateTime<Utc>) -> Self {
        Self {
            service_id: service_id.to_string(),
            status: ServiceStatus::Unknown,
            last_check: None,
            next_check: Some(now + chrono::Duration::seconds(interval as i64)),
            last_error: None,
            consecutive_fails: 0,
            consecutive_success: 0,
            total_checks: 0,
            response_time_ms: None,
        }
    }
}

/// A contiguous interval during which a service was continuously down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,

    pub service_id: String,

    pub start_time: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    pub error: String,

    /// Nanoseconds between start and end, for client compatibility
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,

    pub resolved: bool,
}

impl Incident {
    /// Open a new unresolved incident starting now
    pub fn open(service_id: &str, error: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            service_id: service_id.to_string(),
            start_time: now,
            end_time: None,
            error: error.to_string(),
            duration: None,
            resolved: false,
        }
    }

    /// Mark the incident resolved at `now`
    ///
    /// Sets `end_time`, computes `duration` and flips `resolved`.
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        let end = now.max(self.start_time);
        self.end_time = Some(end);
        self.duration = (end - self.start_time).num_nanoseconds();
        self.resolved = true;
    }
}

/// Read DTO: a service joined with its state and incident counts
#[derive(Debug, Clone, Serialize)]
pub struct ServiceWithState {
    #[serde(flatten)]
    pub service: Service,

    pub state: ServiceState,

    /// Total incidents ever recorded for this service
    pub incident_count: u64,

    /// Incidents currently unresolved (0 or 1 by invariant)
    pub active_incident_count: u64,
}

// ============================================================================
// Protocol Configurations
// ============================================================================

/// HTTP method for an endpoint check
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
}

/// A single endpoint of an HTTP multi-endpoint service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpEndpoint {
    /// Unique within the service; key into the condition's `results` object
    pub name: String,

    pub url: String,

    #[serde(default, skip_serializing_if = "is_default_method")]
    pub method: HttpMethod,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,

    /// Expected HTTP status; 0 accepts any 2xx
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub expected_status: u16,

    /// Dotted path into the response JSON; integer segments index arrays
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub json_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Configuration for HTTP multi-endpoint services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// Legacy per-config timeout knob; the effective deadline comes from the
    /// service row. Retained so stored configs round-trip unchanged.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout: u64,

    pub endpoints: Vec<HttpEndpoint>,

    /// JavaScript failure condition over `results`; truthy signals an
    /// incident. Empty means "any endpoint failure signals an incident".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

fn is_default_method(method: &HttpMethod) -> bool {
    *method == HttpMethod::Get
}

/// Configuration for raw TCP services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TcpConfig {
    /// Target as "host:port"
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_data: Option<String>,

    /// Substring that must appear in the first KiB of the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_data: Option<String>,
}

/// Kind of check a gRPC probe performs
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GrpcCheckType {
    #[default]
    Health,
    Reflection,
    Connectivity,
}

/// Configuration for gRPC services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrpcConfig {
    /// Target as "host:port"
    pub endpoint: String,

    #[serde(default)]
    pub check_type: GrpcCheckType,

    /// Health-check target; empty checks overall server health
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default)]
    pub tls: bool,

    /// Skip certificate verification (only meaningful with `tls`)
    #[serde(default)]
    pub insecure_tls: bool,
}

/// Protocol-specific service configuration
///
/// Serialized untagged: the wire shape is the plain protocol-specific
/// object, disambiguated by the service's `protocol` field on the way in
/// (see [`ServiceConfig::from_value`]).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ServiceConfig {
    Http(HttpConfig),
    Tcp(TcpConfig),
    Grpc(GrpcConfig),
}

impl ServiceConfig {
    /// Parse a raw config object against the declared protocol
    pub fn from_value(protocol: Protocol, value: &serde_json::Value) -> Result<Self, String> {
        let parsed = match protocol {
            Protocol::Http => serde_json::from_value(value.clone()).map(ServiceConfig::Http),
            Protocol::Tcp => serde_json::from_value(value.clone()).map(ServiceConfig::Tcp),
            Protocol::Grpc => serde_json::from_value(value.clone()).map(ServiceConfig::Grpc),
        };
        parsed.map_err(|e| format!("invalid {protocol} config: {e}"))
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            ServiceConfig::Http(_) => Protocol::Http,
            ServiceConfig::Tcp(_) => Protocol::Tcp,
            ServiceConfig::Grpc(_) => Protocol::Grpc,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Validate protocol-specific constraints
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ServiceConfig::Http(http) => {
                if http.endpoints.is_empty() {
                    return Err("http config requires at least one endpoint".to_string());
                }
                if http.endpoints.len() > MAX_HTTP_ENDPOINTS {
                    return Err(format!(
                        "http config allows at most {MAX_HTTP_ENDPOINTS} endpoints, got {}",
                        http.endpoints.len()
                    ));
                }
                if http.condition.len() > MAX_CONDITION_BYTES {
                    return Err(format!(
                        "condition exceeds {MAX_CONDITION_BYTES} bytes ({})",
                        http.condition.len()
                    ));
                }
                let mut seen = std::collections::HashSet::new();
                for endpoint in &http.endpoints {
                    if endpoint.name.is_empty() {
                        return Err("endpoint name must not be empty".to_string());
                    }
                    if !seen.insert(endpoint.name.as_str()) {
                        return Err(format!("duplicate endpoint name: {}", endpoint.name));
                    }
                    if endpoint.url.is_empty() {
                        return Err(format!("endpoint {} has an empty url", endpoint.name));
                    }
                    if endpoint.expected_status != 0
                        && !(100..=599).contains(&endpoint.expected_status)
                    {
                        return Err(format!(
                            "endpoint {} has invalid expected_status {}",
                            endpoint.name, endpoint.expected_status
                        ));
                    }
                }
                Ok(())
            }
            ServiceConfig::Tcp(tcp) => validate_host_port(&tcp.endpoint),
            ServiceConfig::Grpc(grpc) => validate_host_port(&grpc.endpoint),
        }
    }
}

fn validate_host_port(endpoint: &str) -> Result<(), String> {
    let Some((host, port)) = endpoint.rsplit_once(':') else {
        return Err(format!("endpoint {endpoint:?} is not host:port"));
    };
    if host.is_empty() {
        return Err(format!("endpoint {endpoint:?} has an empty host"));
    }
    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("endpoint {endpoint:?} has an invalid port"))
}

// ============================================================================
// Requests & Filters
// ============================================================================

/// Body of POST /services and PUT /services/{id}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUpdateServiceRequest {
    pub name: String,
    pub protocol: Protocol,
    pub interval: u64,
    pub timeout: u64,
    pub retries: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub config: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CreateUpdateServiceRequest {
    /// Validate the request and parse its config against the protocol
    pub fn validate(&self) -> Result<ServiceConfig, String> {
        if self.name.trim().is_empty() {
            return Err("service name must not be empty".to_string());
        }
        if self.interval < 1 {
            return Err("interval must be at least 1 second".to_string());
        }
        if self.timeout < 1 {
            return Err("timeout must be at least 1 second".to_string());
        }
        if self.retries < 1 {
            return Err("retries must be at least 1".to_string());
        }
        let config = ServiceConfig::from_value(self.protocol, &self.config)?;
        config.validate()?;
        Ok(config)
    }

    /// Tags deduplicated and sorted (set semantics)
    pub fn normalized_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }
}

/// Pagination window, 1-based
#[derive(Debug, Clone, Copy)]
pub struct Page {
    page: u64,
    page_size: u64,
}

impl Page {
    pub const DEFAULT_SIZE: u64 = 20;
    pub const MAX_SIZE: u64 = 100;

    pub fn new(page: Option<u64>, page_size: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(Self::DEFAULT_SIZE)
                .clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn limit(&self) -> u64 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.page_size
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Whitelisted service ordering columns
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOrder {
    Name,
    #[default]
    CreatedAt,
    UpdatedAt,
    Protocol,
}

impl ServiceOrder {
    /// Parse an order_by parameter; unknown values fall back to the default
    /// so the raw string never reaches SQL.
    pub fn parse(s: &str) -> Self {
        match s {
            "name" => ServiceOrder::Name,
            "created_at" => ServiceOrder::CreatedAt,
            "updated_at" => ServiceOrder::UpdatedAt,
            "protocol" => ServiceOrder::Protocol,
            _ => ServiceOrder::default(),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            ServiceOrder::Name => "name",
            ServiceOrder::CreatedAt => "created_at",
            ServiceOrder::UpdatedAt => "updated_at",
            ServiceOrder::Protocol => "protocol",
        }
    }
}

/// Filter for service listings
#[derive(Debug, Default, Clone)]
pub struct ServiceFilter {
    /// Case-insensitive name substring
    pub name: Option<String>,
    pub protocol: Option<Protocol>,
    pub is_enabled: Option<bool>,
    pub status: Option<ServiceStatus>,
    /// Any-of tag match
    pub tags: Vec<String>,
    pub order_by: ServiceOrder,
    pub page: Page,
}

/// Filter for incident listings
#[derive(Debug, Default, Clone)]
pub struct IncidentFilter {
    pub service_id: Option<String>,
    pub resolved: Option<bool>,
    /// Substring of the incident error, or an exact service id
    pub search: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub page: Page,
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-service statistics over a window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub service_id: String,
    pub since: DateTime<Utc>,
    pub total_incidents: u64,
    pub total_downtime_seconds: i64,
    /// `1 - downtime/period`, clamped to [0, 100]
    pub uptime_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<u64>,
}

/// Aggregate statistics across all services, pushed to dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_services: u64,
    pub services_up: u64,
    pub services_down: u64,
    pub services_unknown: u64,
    pub services_disabled: u64,

    /// Service count per protocol
    pub protocols: HashMap<String, u64>,

    pub active_incidents: u64,
    /// Incidents started within the last 24 hours
    pub recent_incidents: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<f64>,

    /// Share of enabled services currently up, in percent
    pub uptime_percentage: f64,

    pub total_checks: u64,

    /// Estimated checks per minute across enabled services
    pub checks_per_minute: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

// ============================================================================
// Tests
// ============================================================================
