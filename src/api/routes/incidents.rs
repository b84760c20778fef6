//! Cross-service incident endpoints

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::types::ListResponse;
use crate::api::ApiState;
use crate::model::{Incident, IncidentFilter, Page};

/// Query parameters for GET /api/v1/incidents
#[derive(Debug, Default, Deserialize)]
pub struct GlobalIncidentQuery {
    /// Substring of the incident error, or an exact service id
    search: Option<String>,
    resolved: Option<bool>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    page: Option<u64>,
    page_size: Option<u64>,
}

/// GET /api/v1/incidents
pub async fn list_incidents(
    State(state): State<ApiState>,
    Query(query): Query<GlobalIncidentQuery>,
) -> ApiResult<Json<ListResponse<Incident>>> {
    let filter = IncidentFilter {
        service_id: None,
        resolved: query.resolved,
        search: query.search.filter(|s| !s.is_empty()),
        start_time: query.start_time,
        end_time: query.end_time,
        page: Page::new(query.page, query.page_size),
    };

    let (items, count) = state.store.find_incidents(&filter).await?;
    Ok(Json(ListResponse { items, count }))
}
