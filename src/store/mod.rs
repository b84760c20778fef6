//! Persistence layer for services, state and incidents
//!
//! This module provides a trait-based abstraction over the backing
//! database. The interface deals purely in domain types; no SQL leaks
//! past it.
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded single-file database
//! - **In-Memory**: no persistence, for tests and throwaway setups
//!
//! ## Concurrency
//!
//! All operations are reentrant. The SQLite backend retries transient
//! "database is locked" errors internally with bounded exponential
//! backoff before surfacing them.

pub mod error;
pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{
    CreateUpdateServiceRequest, Incident, IncidentFilter, ServiceFilter, ServiceState,
    ServiceStats, ServiceWithState,
};

/// Trait for persistent service/incident stores
///
/// Implementations must be `Send + Sync`; they are shared across the
/// scheduler, the monitor and the API handlers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a service together with its initial state row, atomically
    ///
    /// Assigns the id and timestamps. The initial state is `unknown` with
    /// `next_check = now + interval`. Fails with `InvalidInput` when the
    /// request does not validate against its protocol.
    async fn create_service(
        &self,
        req: &CreateUpdateServiceRequest,
    ) -> StoreResult<ServiceWithState>;

    /// Fetch a service joined with its state and incident counts
    async fn get_service(&self, id: &str) -> StoreResult<ServiceWithState>;

    /// List services matching the filter
    ///
    /// Returns the page of items and the total match count independent of
    /// pagination.
    async fn find_services(
        &self,
        filter: &ServiceFilter,
    ) -> StoreResult<(Vec<ServiceWithState>, u64)>;

    /// Replace the mutable fields of a service and bump `updated_at`
    ///
    /// Does not touch the state row.
    async fn update_service(
        &self,
        id: &str,
        req: &CreateUpdateServiceRequest,
    ) -> StoreResult<ServiceWithState>;

    /// Delete a service with its incidents and state, transactionally
    async fn delete_service(&self, id: &str) -> StoreResult<()>;

    /// Whole-row replacement of a service's state
    async fn update_service_state(&self, state: &ServiceState) -> StoreResult<()>;

    async fn save_incident(&self, incident: &Incident) -> StoreResult<()>;

    async fn update_incident(&self, incident: &Incident) -> StoreResult<()>;

    async fn delete_incident(&self, id: &str) -> StoreResult<()>;

    async fn get_incident(&self, id: &str) -> StoreResult<Incident>;

    /// List incidents matching the filter, newest first
    async fn find_incidents(&self, filter: &IncidentFilter) -> StoreResult<(Vec<Incident>, u64)>;

    /// Atomically resolve every unresolved incident of a service
    ///
    /// Sets `end_time = now` and `duration = now - start_time` on each.
    /// Returns the incidents that transitioned; calling again immediately
    /// returns an empty list.
    async fn resolve_all_incidents(&self, service_id: &str) -> StoreResult<Vec<Incident>>;

    /// Compute per-service statistics since the given instant
    async fn service_stats(
        &self,
        service_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<ServiceStats>;

    /// All distinct tags across services, sorted
    async fn all_tags(&self) -> StoreResult<Vec<String>>;

    /// Tag -> number of services carrying it
    async fn tags_with_count(&self) -> StoreResult<HashMap<String, u64>>;

    /// Release backend resources
    async fn close(&self) -> StoreResult<()>;
}
