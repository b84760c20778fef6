//! REST API and WebSocket surface
//!
//! JSON over HTTP under `/api/v1`, plus a WebSocket endpoint pushing the
//! broadcaster's typed frames to connected UIs.
//!
//! ## Endpoints
//!
//! - `GET    /api/v1/health` - liveness
//! - `GET    /api/v1/services` - list/filter services
//! - `POST   /api/v1/services` - create service
//! - `GET    /api/v1/services/{id}` - fetch one service
//! - `PUT    /api/v1/services/{id}` - update service
//! - `DELETE /api/v1/services/{id}` - delete service
//! - `POST   /api/v1/services/{id}/check` - immediate check
//! - `POST   /api/v1/services/{id}/resolve` - force-resolve incidents
//! - `GET    /api/v1/services/{id}/stats` - per-service statistics
//! - `GET    /api/v1/services/{id}/incidents` - incidents of a service
//! - `DELETE /api/v1/services/{id}/incidents/{incidentId}` - delete one
//! - `GET    /api/v1/incidents` - incidents across services
//! - `GET    /api/v1/dashboard/stats` - dashboard aggregate
//! - `GET    /api/v1/tags`, `GET /api/v1/tags/count`
//! - `GET    /api/v1/ws` - WebSocket upgrade
//!
//! Error bodies are `{"error": "<message>"}`; 400 bad input, 404 not
//! found, 409 conflict, 500 internal.

pub mod error;
pub mod routes;
pub mod types;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{ApiError, ApiResult};
pub use types::{HealthResponse, ListResponse, MessageResponse};

use crate::broadcaster::Broadcaster;
use crate::monitor::MonitorService;
use crate::store::Store;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Store for read paths
    pub store: Arc<dyn Store>,

    /// Monitor for mutations (publishes lifecycle events)
    pub monitor: Arc<MonitorService>,

    /// Broadcaster feeding WebSocket subscribers
    pub broadcaster: Arc<Broadcaster>,
}

/// Build the router with all routes and middleware
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route(
            "/api/v1/services",
            get(routes::services::list_services).post(routes::services::create_service),
        )
        .route(
            "/api/v1/services/:id",
            get(routes::services::get_service)
                .put(routes::services::update_service)
                .delete(routes::services::delete_service),
        )
        .route(
            "/api/v1/services/:id/check",
            post(routes::services::trigger_check),
        )
        .route(
            "/api/v1/services/:id/resolve",
            post(routes::services::resolve_incidents),
        )
        .route(
            "/api/v1/services/:id/stats",
            get(routes::services::get_service_stats),
        )
        .route(
            "/api/v1/services/:id/incidents",
            get(routes::services::list_service_incidents),
        )
        .route(
            "/api/v1/services/:id/incidents/:incident_id",
            delete(routes::services::delete_service_incident),
        )
        .route("/api/v1/incidents", get(routes::incidents::list_incidents))
        .route(
            "/api/v1/dashboard/stats",
            get(routes::dashboard::dashboard_stats),
        )
        .route("/api/v1/tags", get(routes::dashboard::list_tags))
        .route("/api/v1/tags/count", get(routes::dashboard::tags_with_count))
        .route("/api/v1/ws", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Bind and serve the API in a background task
///
/// Returns the bound local address.
pub async fn spawn_api_server(
    bind_addr: SocketAddr,
    enable_cors: bool,
    state: ApiState,
) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", bind_addr);

    let app = router(state, enable_cors);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    info!("API server listening on {}", addr);
    Ok(addr)
}
