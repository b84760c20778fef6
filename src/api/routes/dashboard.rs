//! Dashboard aggregate and tag endpoints

use std::collections::HashMap;

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiResult;
use crate::api::ApiState;
use crate::broadcaster;
use crate::model::DashboardStats;

/// GET /api/v1/dashboard/stats
pub async fn dashboard_stats(State(state): State<ApiState>) -> ApiResult<Json<DashboardStats>> {
    let stats = broadcaster::dashboard_stats(state.store.as_ref()).await?;
    Ok(Json(stats))
}

/// GET /api/v1/tags
pub async fn list_tags(State(state): State<ApiState>) -> ApiResult<Json<Vec<String>>> {
    let tags = state.store.all_tags().await?;
    Ok(Json(tags))
}

/// GET /api/v1/tags/count
pub async fn tags_with_count(
    State(state): State<ApiState>,
) -> ApiResult<Json<HashMap<String, u64>>> {
    let counts = state.store.tags_with_count().await?;
    Ok(Json(counts))
}
