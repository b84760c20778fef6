//! HTTP multi-endpoint probe
//!
//! Fires every configured endpoint concurrently, collects per-endpoint
//! outcomes into a `results` object and evaluates the service's
//! JavaScript failure condition over it. The whole round, condition
//! evaluation included, runs under the shared deadline; the engine has
//! no instruction limit of its own, so a runaway condition is cut off
//! here.
//!
//! ## Per-endpoint evaluation
//!
//! 1. Build the request (method, headers, body, optional Basic auth)
//! 2. Status must be 2xx, or equal to `expected_status` when set
//! 3. When `json_path` is set, the response must be JSON and the path
//!    must resolve; the extracted value becomes `results.<name>.value`
//! 4. Wall-clock duration is measured per endpoint
//!
//! An empty condition falls back to "any endpoint failure signals an
//! incident".

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::time::timeout;
use tracing::trace;

use super::condition;
use super::Probe;
use crate::model::{HttpConfig, HttpEndpoint, HttpMethod};

/// Response body bytes kept for the condition's `response` binding
const RESPONSE_CAPTURE_LIMIT: usize = 2048;

/// Response body bytes embedded in error messages
const ERROR_BODY_LIMIT: usize = 256;

/// Outcome of a single endpoint check, exposed to the condition as
/// `results.<name>`
#[derive(Debug, Clone, Serialize)]
pub struct EndpointResult {
    pub success: bool,

    /// Value extracted via `json_path`, when configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Truncated response body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    pub duration_ms: u64,
}

/// Probe for HTTP multi-endpoint services
pub struct HttpProbe {
    config: HttpConfig,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    async fn check_endpoint(
        &self,
        endpoint: &HttpEndpoint,
        deadline: Duration,
    ) -> (String, EndpointResult) {
        trace!("checking endpoint {} at {}", endpoint.name, endpoint.url);

        let start = Instant::now();
        let outcome = self.execute_request(endpoint, deadline).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok((status, body)) => evaluate_response(endpoint, status, &body, duration_ms),
            Err(e) => EndpointResult {
                success: false,
                value: None,
                error: Some(format!("request failed: {e:#}")),
                response: None,
                duration_ms,
            },
        };

        (endpoint.name.clone(), result)
    }

    /// Execute the HTTP request, returning (status_code, body)
    async fn execute_request(
        &self,
        endpoint: &HttpEndpoint,
        deadline: Duration,
    ) -> Result<(u16, String)> {
        let method = match endpoint.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        };

        let mut request = self
            .client
            .request(method, &endpoint.url)
            .timeout(deadline);

        for (key, value) in &endpoint.headers {
            request = request.header(key, value);
        }
        if !endpoint.body.is_empty() {
            request = request.body(endpoint.body.clone());
        }
        if let (Some(username), Some(password)) = (&endpoint.username, &endpoint.password) {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.context("HTTP request failed")?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .context("failed to read response body")?;

        Ok((status, body))
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, deadline: Duration) -> Result<()> {
        timeout(deadline, self.run(deadline))
            .await
            .context("http check timed out")?
    }
}

impl HttpProbe {
    async fn run(&self, deadline: Duration) -> Result<()> {
        let checks = self
            .config
            .endpoints
            .iter()
            .map(|endpoint| self.check_endpoint(endpoint, deadline));
        let outcomes: Vec<(String, EndpointResult)> = join_all(checks).await;

        if self.config.condition.is_empty() {
            if outcomes.iter().any(|(_, result)| !result.success) {
                bail!("endpoint failure: {}", summarize(&outcomes));
            }
            return Ok(());
        }

        let mut results = serde_json::Map::new();
        for (name, result) in &outcomes {
            results.insert(
                name.clone(),
                serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
            );
        }
        let incident = condition::evaluate_condition(
            self.config.condition.clone(),
            serde_json::Value::Object(results),
        )
        .await
        .with_context(|| format!("endpoints: {}", summarize(&outcomes)))?;

        if incident {
            bail!("condition signalled an incident: {}", summarize(&outcomes));
        }
        Ok(())
    }
}

/// Validate an endpoint response against its configuration
fn evaluate_response(
    endpoint: &HttpEndpoint,
    status: u16,
    body: &str,
    duration_ms: u64,
) -> EndpointResult {
    let status_ok = if endpoint.expected_status != 0 {
        status == endpoint.expected_status
    } else {
        (200..300).contains(&status)
    };

    let response = Some(truncate(body, RESPONSE_CAPTURE_LIMIT).to_string());

    if !status_ok {
        return EndpointResult {
            success: false,
            value: None,
            error: Some(format!("HTTP {status}: {}", truncate(body, ERROR_BODY_LIMIT))),
            response,
            duration_ms,
        };
    }

    if endpoint.json_path.is_empty() {
        return EndpointResult {
            success: true,
            value: None,
            error: None,
            response,
            duration_ms,
        };
    }

    let extracted = serde_json::from_str::<serde_json::Value>(body)
        .map_err(|e| format!("response is not JSON: {e}"))
        .and_then(|value| extract_json_path(&value, &endpoint.json_path));

    match extracted {
        Ok(value) => EndpointResult {
            success: true,
            value: Some(value),
            error: None,
            response,
            duration_ms,
        },
        Err(e) => EndpointResult {
            success: false,
            value: None,
            error: Some(e),
            response,
            duration_ms,
        },
    }
}

/// Walk a dotted path through a JSON value
///
/// Object segments are keys; integer segments index arrays.
fn extract_json_path(value: &serde_json::Value, path: &str) -> Result<serde_json::Value, String> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(format!("empty segment in json path {path:?}"));
        }
        current = match current {
            serde_json::Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            serde_json::Value::Object(map) => map.get(segment),
            _ => None,
        }
        .ok_or_else(|| format!("json path segment {segment:?} not found"))?;
    }
    Ok(current.clone())
}

/// One line per endpoint for composite error messages
fn summarize(outcomes: &[(String, EndpointResult)]) -> String {
    outcomes
        .iter()
        .map(|(name, result)| match &result.error {
            Some(error) => format!("{name}: {error} ({}ms)", result.duration_ms),
            None => format!("{name}: ok ({}ms)", result.duration_ms),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// Tests
// ============================================================================
