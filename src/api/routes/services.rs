//! Service CRUD, checks and statistics endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::types::{ListResponse, MessageResponse};
use crate::api::ApiState;
use crate::model::{
    CreateUpdateServiceRequest, Incident, IncidentFilter, Page, Protocol, ServiceFilter,
    ServiceOrder, ServiceStats, ServiceStatus, ServiceWithState,
};

/// Default lookback for per-service statistics, in days
const DEFAULT_STATS_DAYS: i64 = 30;

/// Query parameters for GET /api/v1/services
#[derive(Debug, Default, Deserialize)]
pub struct ServiceListQuery {
    name: Option<String>,
    /// Comma-separated, any-of semantics
    tags: Option<String>,
    status: Option<String>,
    is_enabled: Option<bool>,
    protocol: Option<String>,
    order_by: Option<String>,
    page: Option<u64>,
    page_size: Option<u64>,
}

impl ServiceListQuery {
    fn into_filter(self) -> Result<ServiceFilter, ApiError> {
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| {
                ServiceStatus::parse(s)
                    .ok_or_else(|| ApiError::InvalidRequest(format!("unknown status {s:?}")))
            })
            .transpose()?;

        let protocol = self
            .protocol
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| {
                Protocol::parse(s)
                    .ok_or_else(|| ApiError::InvalidRequest(format!("unknown protocol {s:?}")))
            })
            .transpose()?;

        let tags = self
            .tags
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(ServiceFilter {
            name: self.name.filter(|n| !n.is_empty()),
            protocol,
            is_enabled: self.is_enabled,
            status,
            tags,
            order_by: self
                .order_by
                .as_deref()
                .map(ServiceOrder::parse)
                .unwrap_or_default(),
            page: Page::new(self.page, self.page_size),
        })
    }
}

/// GET /api/v1/services
pub async fn list_services(
    State(state): State<ApiState>,
    Query(query): Query<ServiceListQuery>,
) -> ApiResult<Json<ListResponse<ServiceWithState>>> {
    let filter = query.into_filter()?;
    let (items, count) = state.store.find_services(&filter).await?;
    Ok(Json(ListResponse { items, count }))
}

/// POST /api/v1/services
pub async fn create_service(
    State(state): State<ApiState>,
    Json(req): Json<CreateUpdateServiceRequest>,
) -> ApiResult<(StatusCode, Json<ServiceWithState>)> {
    let created = state.monitor.add_service(&req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/services/{id}
pub async fn get_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServiceWithState>> {
    let service = state.store.get_service(&id).await?;
    Ok(Json(service))
}

/// PUT /api/v1/services/{id}
pub async fn update_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<CreateUpdateServiceRequest>,
) -> ApiResult<Json<ServiceWithState>> {
    let updated = state.monitor.update_service(&id, &req).await?;
    Ok(Json(updated))
}

/// DELETE /api/v1/services/{id}
pub async fn delete_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.monitor.delete_service(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/services/{id}/check
pub async fn trigger_check(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.monitor.trigger_check(&id).await?;
    Ok(Json(MessageResponse::new("check triggered")))
}

/// POST /api/v1/services/{id}/resolve
pub async fn resolve_incidents(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let resolved = state.monitor.force_resolve_incidents(&id).await?;
    Ok(Json(MessageResponse::new(format!(
        "resolved {} incidents",
        resolved.len()
    ))))
}

/// Query parameters for GET /api/v1/services/{id}/stats
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    days: Option<i64>,
}

/// GET /api/v1/services/{id}/stats
pub async fn get_service_stats(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<ServiceStats>> {
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    if days < 1 {
        return Err(ApiError::InvalidRequest(
            "days must be at least 1".to_string(),
        ));
    }

    let since = Utc::now() - Duration::days(days);
    let stats = state.store.service_stats(&id, since).await?;
    Ok(Json(stats))
}

/// Query parameters for incident listings
#[derive(Debug, Default, Deserialize)]
pub struct IncidentListQuery {
    pub resolved: Option<bool>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// GET /api/v1/services/{id}/incidents
pub async fn list_service_incidents(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<IncidentListQuery>,
) -> ApiResult<Json<ListResponse<Incident>>> {
    // 404 for unknown services rather than an empty listing
    state.store.get_service(&id).await?;

    let filter = IncidentFilter {
        service_id: Some(id),
        resolved: query.resolved,
        search: None,
        start_time: query.start_time,
        end_time: query.end_time,
        page: Page::new(query.page, query.page_size),
    };
    let (items, count) = state.store.find_incidents(&filter).await?;
    Ok(Json(ListResponse { items, count }))
}

/// DELETE /api/v1/services/{id}/incidents/{incidentId}
pub async fn delete_service_incident(
    State(state): State<ApiState>,
    Path((id, incident_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let incident = state.store.get_incident(&incident_id).await?;
    if incident.service_id != id {
        return Err(ApiError::NotFound(format!(
            "incident {incident_id} does not belong to service {id}"
        )));
    }

    state.store.delete_incident(&incident_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
