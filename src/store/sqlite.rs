//! SQLite store implementation
//!
//! This module provides a SQLite-based implementation of the [`Store`]
//! trait.
//!
//! ## Features
//!
//! - **Embedded**: no separate database server required
//! - **WAL mode**: better concurrency for reads during writes
//! - **Connection pooling**: efficient resource usage
//! - **Migrations**: automatic schema versioning with sqlx
//! - **Busy retry**: transient lock contention is retried internally with
//!   bounded exponential backoff before surfacing
//!
//! ## Limitations
//!
//! - **Concurrency**: limited concurrent writes; adequate for the write
//!   rates a single monitoring node produces
//! - **Distributed**: single-machine only

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

use super::error::{StoreError, StoreResult};
use super::Store;
use crate::model::{
    CreateUpdateServiceRequest, Incident, IncidentFilter, Protocol, Service, ServiceConfig,
    ServiceFilter, ServiceOrder, ServiceState, ServiceStats, ServiceStatus, ServiceWithState,
};

/// Initial delay before retrying a busy operation
const BUSY_RETRY_BASE: Duration = Duration::from_millis(10);

/// Maximum attempts for a busy operation (including the first)
const BUSY_RETRY_ATTEMPTS: u32 = 5;

/// Shared SELECT joining services with their state and incident counts
const SERVICE_SELECT: &str = r#"
SELECT s.id, s.name, s.protocol, s.interval_secs, s.timeout_secs, s.retries,
       s.tags, s.config, s.is_enabled, s.created_at, s.updated_at,
       st.status, st.last_check, st.next_check, st.last_error,
       st.consecutive_fails, st.consecutive_success, st.total_checks, st.response_time_ms,
       (SELECT COUNT(*) FROM incidents i WHERE i.service_id = s.id) AS incident_count,
       (SELECT COUNT(*) FROM incidents i WHERE i.service_id = s.id AND i.resolved = 0) AS active_incident_count
FROM services s
JOIN service_states st ON st.service_id = s.id
"#;

/// SQLite-backed store
///
/// Stores services, state and incidents in a local single-file database.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Create a new SQLite store
    ///
    /// Creates the database file if missing, runs migrations and
    /// configures SQLite for concurrent access (WAL mode, busy timeout).
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    // ========================================================================
    // Internal single-shot operations (wrapped by busy retry)
    // ========================================================================

    async fn insert_service(
        &self,
        id: &str,
        req: &CreateUpdateServiceRequest,
        config: &ServiceConfig,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let tags = req.normalized_tags();
        let tags_json = serde_json::to_string(&tags)?;
        let config_json = serde_json::to_string(config)?;
        let now_millis = Self::millis(&now);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO services
                (id, name, protocol, interval_secs, timeout_secs, retries,
                 tags, config, is_enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&req.name)
        .bind(req.protocol.as_str())
        .bind(req.interval as i64)
        .bind(req.timeout as i64)
        .bind(req.retries as i64)
        .bind(tags_json)
        .bind(config_json)
        .bind(req.is_enabled as i64)
        .bind(now_millis)
        .bind(now_millis)
        .execute(&mut *tx)
        .await?;

        let next_check = Self::millis(&(now + chrono::Duration::seconds(req.interval as i64)));
        sqlx::query(
            "INSERT INTO service_states (service_id, status, next_check) VALUES (?, 'unknown', ?)",
        )
        .bind(id)
        .bind(next_check)
        .execute(&mut *tx)
        .await?;

        for tag in &tags {
            sqlx::query("INSERT INTO service_tags (service_id, tag) VALUES (?, ?)")
                .bind(id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn exec_update_service(
        &self,
        id: &str,
        req: &CreateUpdateServiceRequest,
        config: &ServiceConfig,
    ) -> StoreResult<()> {
        let tags = req.normalized_tags();
        let tags_json = serde_json::to_string(&tags)?;
        let config_json = serde_json::to_string(config)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE services
            SET name = ?, protocol = ?, interval_secs = ?, timeout_secs = ?,
                retries = ?, tags = ?, config = ?, is_enabled = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&req.name)
        .bind(req.protocol.as_str())
        .bind(req.interval as i64)
        .bind(req.timeout as i64)
        .bind(req.retries as i64)
        .bind(tags_json)
        .bind(config_json)
        .bind(req.is_enabled as i64)
        .bind(Self::millis(&Utc::now()))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("service {id}")));
        }

        sqlx::query("DELETE FROM service_tags WHERE service_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for tag in &tags {
            sqlx::query("INSERT INTO service_tags (service_id, tag) VALUES (?, ?)")
                .bind(id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn exec_delete_service(&self, id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM incidents WHERE service_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM service_tags WHERE service_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM service_states WHERE service_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("service {id}")));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn exec_update_state(&self, state: &ServiceState) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE service_states
            SET status = ?, last_check = ?, next_check = ?, last_error = ?,
                consecutive_fails = ?, consecutive_success = ?, total_checks = ?,
                response_time_ms = ?
            WHERE service_id = ?
            "#,
        )
        .bind(state.status.as_str())
        .bind(state.last_check.as_ref().map(Self::millis))
        .bind(state.next_check.as_ref().map(Self::millis))
        .bind(&state.last_error)
        .bind(state.consecutive_fails as i64)
        .bind(state.consecutive_success as i64)
        .bind(state.total_checks as i64)
        .bind(state.response_time_ms.map(|v| v as i64))
        .bind(&state.service_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "service state {}",
                state.service_id
            )));
        }
        Ok(())
    }

    async fn exec_save_incident(&self, incident: &Incident) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO incidents (id, service_id, start_time, end_time, error, duration_ns, resolved)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&incident.id)
        .bind(&incident.service_id)
        .bind(Self::millis(&incident.start_time))
        .bind(incident.end_time.as_ref().map(Self::millis))
        .bind(&incident.error)
        .bind(incident.duration)
        .bind(incident.resolved as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exec_update_incident(&self, incident: &Incident) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET service_id = ?, start_time = ?, end_time = ?, error = ?,
                duration_ns = ?, resolved = ?
            WHERE id = ?
            "#,
        )
        .bind(&incident.service_id)
        .bind(Self::millis(&incident.start_time))
        .bind(incident.end_time.as_ref().map(Self::millis))
        .bind(&incident.error)
        .bind(incident.duration)
        .bind(incident.resolved as i64)
        .bind(&incident.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("incident {}", incident.id)));
        }
        Ok(())
    }

    async fn exec_delete_incident(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM incidents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("incident {id}")));
        }
        Ok(())
    }

    async fn exec_resolve_all(&self, service_id: &str) -> StoreResult<Vec<Incident>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT id, service_id, start_time, end_time, error, duration_ns, resolved
             FROM incidents WHERE service_id = ? AND resolved = 0",
        )
        .bind(service_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut resolved = Vec::with_capacity(rows.len());
        for row in rows {
            let mut incident = incident_from_row(&row)?;
            incident.resolve(now);

            sqlx::query(
                "UPDATE incidents SET end_time = ?, duration_ns = ?, resolved = 1 WHERE id = ?",
            )
            .bind(incident.end_time.as_ref().map(Self::millis))
            .bind(incident.duration)
            .bind(&incident.id)
            .execute(&mut *tx)
            .await?;

            resolved.push(incident);
        }

        tx.commit().await?;
        Ok(resolved)
    }
}

/// Retry an operation on transient busy errors with exponential backoff
async fn retry_busy<T, F, Fut>(op: &str, mut run: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match run().await {
            Err(err) if err.is_busy() && attempt < BUSY_RETRY_ATTEMPTS => {
                let delay = BUSY_RETRY_BASE * 2u32.pow(attempt - 1);
                warn!(
                    "{op} hit busy database (attempt {attempt}/{BUSY_RETRY_ATTEMPTS}), retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn service_from_row(row: &SqliteRow) -> StoreResult<Service> {
    let protocol_str: String = row.get("protocol");
    let protocol = Protocol::parse(&protocol_str)
        .ok_or_else(|| StoreError::Serialization(format!("unknown protocol {protocol_str:?}")))?;

    let tags_json: String = row.get("tags");
    let tags: Vec<String> = serde_json::from_str(&tags_json)?;

    let config_json: String = row.get("config");
    let config_value: serde_json::Value = serde_json::from_str(&config_json)?;
    let config =
        ServiceConfig::from_value(protocol, &config_value).map_err(StoreError::Serialization)?;

    Ok(Service {
        id: row.get("id"),
        name: row.get("name"),
        protocol,
        interval: row.get::<i64, _>("interval_secs") as u64,
        timeout: row.get::<i64, _>("timeout_secs") as u64,
        retries: row.get::<i64, _>("retries") as u32,
        tags,
        config,
        is_enabled: row.get::<i64, _>("is_enabled") != 0,
        created_at: SqliteStore::from_millis(row.get("created_at")),
        updated_at: SqliteStore::from_millis(row.get("updated_at")),
    })
}

fn state_from_row(service_id: &str, row: &SqliteRow) -> StoreResult<ServiceState> {
    let status_str: String = row.get("status");
    let status = ServiceStatus::parse(&status_str).unwrap_or(ServiceStatus::Unknown);

    Ok(ServiceState {
        service_id: service_id.to_string(),
        status,
        last_check: row
            .get::<Option<i64>, _>("last_check")
            .map(SqliteStore::from_millis),
        next_check: row
            .get::<Option<i64>, _>("next_check")
            .map(SqliteStore::from_millis),
        last_error: row.get("last_error"),
        consecutive_fails: row.get::<i64, _>("consecutive_fails") as u32,
        consecutive_success: row.get::<i64, _>("consecutive_success") as u32,
        total_checks: row.get::<i64, _>("total_checks") as u64,
        response_time_ms: row
            .get::<Option<i64>, _>("response_time_ms")
            .map(|v| v as u64),
    })
}

fn with_state_from_row(row: &SqliteRow) -> StoreResult<ServiceWithState> {
    let service = service_from_row(row)?;
    let state = state_from_row(&service.id, row)?;

    Ok(ServiceWithState {
        service,
        state,
        incident_count: row.get::<i64, _>("incident_count") as u64,
        active_incident_count: row.get::<i64, _>("active_incident_count") as u64,
    })
}

fn incident_from_row(row: &SqliteRow) -> StoreResult<Incident> {
    Ok(Incident {
        id: row.get("id"),
        service_id: row.get("service_id"),
        start_time: SqliteStore::from_millis(row.get("start_time")),
        end_time: row
            .get::<Option<i64>, _>("end_time")
            .map(SqliteStore::from_millis),
        error: row.get("error"),
        duration: row.get("duration_ns"),
        resolved: row.get::<i64, _>("resolved") != 0,
    })
}

// ============================================================================
// Filter binding
// ============================================================================

fn service_filter_clause(filter: &ServiceFilter) -> String {
    let mut conditions: Vec<String> = Vec::new();

    if filter.name.is_some() {
        conditions.push("s.name LIKE ?".to_string());
    }
    if filter.protocol.is_some() {
        conditions.push("s.protocol = ?".to_string());
    }
    if filter.is_enabled.is_some() {
        conditions.push("s.is_enabled = ?".to_string());
    }
    if filter.status.is_some() {
        conditions.push("st.status = ?".to_string());
    }
    if !filter.tags.is_empty() {
        let placeholders = vec!["?"; filter.tags.len()].join(", ");
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM service_tags t WHERE t.service_id = s.id AND t.tag IN ({placeholders}))"
        ));
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn bind_service_filter<'q>(
    mut q: Query<'q, Sqlite, SqliteArguments<'q>>,
    filter: &'q ServiceFilter,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    if let Some(name) = &filter.name {
        q = q.bind(format!("%{name}%"));
    }
    if let Some(protocol) = filter.protocol {
        q = q.bind(protocol.as_str());
    }
    if let Some(enabled) = filter.is_enabled {
        q = q.bind(enabled as i64);
    }
    if let Some(status) = filter.status {
        q = q.bind(status.as_str());
    }
    for tag in &filter.tags {
        q = q.bind(tag.as_str());
    }
    q
}

fn incident_filter_clause(filter: &IncidentFilter) -> String {
    let mut conditions: Vec<String> = Vec::new();

    if filter.service_id.is_some() {
        conditions.push("service_id = ?".to_string());
    }
    if filter.resolved.is_some() {
        conditions.push("resolved = ?".to_string());
    }
    if filter.search.is_some() {
        conditions.push("(error LIKE ? OR service_id = ?)".to_string());
    }
    if filter.start_time.is_some() {
        conditions.push("start_time >= ?".to_string());
    }
    if filter.end_time.is_some() {
        conditions.push("start_time <= ?".to_string());
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn bind_incident_filter<'q>(
    mut q: Query<'q, Sqlite, SqliteArguments<'q>>,
    filter: &'q IncidentFilter,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    if let Some(service_id) = &filter.service_id {
        q = q.bind(service_id.as_str());
    }
    if let Some(resolved) = filter.resolved {
        q = q.bind(resolved as i64);
    }
    if let Some(search) = &filter.search {
        q = q.bind(format!("%{search}%"));
        q = q.bind(search.as_str());
    }
    if let Some(start) = &filter.start_time {
        q = q.bind(SqliteStore::millis(start));
    }
    if let Some(end) = &filter.end_time {
        q = q.bind(SqliteStore::millis(end));
    }
    q
}

fn order_direction(order: ServiceOrder) -> &'static str {
    match order {
        ServiceOrder::Name | ServiceOrder::Protocol => "ASC",
        ServiceOrder::CreatedAt | ServiceOrder::UpdatedAt => "DESC",
    }
}

// ============================================================================
// Store impl
// ============================================================================

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_service(
        &self,
        req: &CreateUpdateServiceRequest,
    ) -> StoreResult<ServiceWithState> {
        let config = req.validate().map_err(StoreError::InvalidInput)?;
        let id = Ulid::new().to_string();
        let now = Utc::now();

        retry_busy("create_service", || {
            self.insert_service(&id, req, &config, now)
        })
        .await?;

        debug!("created service {id}");
        self.get_service(&id).await
    }

    #[instrument(skip(self))]
    async fn get_service(&self, id: &str) -> StoreResult<ServiceWithState> {
        let sql = format!("{SERVICE_SELECT} WHERE s.id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => with_state_from_row(&row),
            None => Err(StoreError::NotFound(format!("service {id}"))),
        }
    }

    #[instrument(skip(self, filter))]
    async fn find_services(
        &self,
        filter: &ServiceFilter,
    ) -> StoreResult<(Vec<ServiceWithState>, u64)> {
        let where_clause = service_filter_clause(filter);

        let count_sql = format!(
            "SELECT COUNT(*) FROM services s JOIN service_states st ON st.service_id = s.id{where_clause}"
        );
        let count_row = bind_service_filter(sqlx::query(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = count_row.get(0);

        let page_sql = format!(
            "{SERVICE_SELECT}{where_clause} ORDER BY s.{} {} LIMIT ? OFFSET ?",
            filter.order_by.column(),
            order_direction(filter.order_by),
        );
        let rows = bind_service_filter(sqlx::query(&page_sql), filter)
            .bind(filter.page.limit() as i64)
            .bind(filter.page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(with_state_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        debug!("service query matched {total} rows, returning {}", items.len());
        Ok((items, total as u64))
    }

    #[instrument(skip(self, req))]
    async fn update_service(
        &self,
        id: &str,
        req: &CreateUpdateServiceRequest,
    ) -> StoreResult<ServiceWithState> {
        let config = req.validate().map_err(StoreError::InvalidInput)?;

        retry_busy("update_service", || {
            self.exec_update_service(id, req, &config)
        })
        .await?;

        self.get_service(id).await
    }

    #[instrument(skip(self))]
    async fn delete_service(&self, id: &str) -> StoreResult<()> {
        retry_busy("delete_service", || self.exec_delete_service(id)).await?;
        debug!("deleted service {id}");
        Ok(())
    }

    #[instrument(skip(self, state), fields(service_id = %state.service_id))]
    async fn update_service_state(&self, state: &ServiceState) -> StoreResult<()> {
        retry_busy("update_service_state", || self.exec_update_state(state)).await
    }

    #[instrument(skip(self, incident), fields(incident_id = %incident.id))]
    async fn save_incident(&self, incident: &Incident) -> StoreResult<()> {
        retry_busy("save_incident", || self.exec_save_incident(incident)).await
    }

    #[instrument(skip(self, incident), fields(incident_id = %incident.id))]
    async fn update_incident(&self, incident: &Incident) -> StoreResult<()> {
        retry_busy("update_incident", || self.exec_update_incident(incident)).await
    }

    #[instrument(skip(self))]
    async fn delete_incident(&self, id: &str) -> StoreResult<()> {
        retry_busy("delete_incident", || self.exec_delete_incident(id)).await
    }

    #[instrument(skip(self))]
    async fn get_incident(&self, id: &str) -> StoreResult<Incident> {
        let row = sqlx::query(
            "SELECT id, service_id, start_time, end_time, error, duration_ns, resolved
             FROM incidents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => incident_from_row(&row),
            None => Err(StoreError::NotFound(format!("incident {id}"))),
        }
    }

    #[instrument(skip(self, filter))]
    async fn find_incidents(&self, filter: &IncidentFilter) -> StoreResult<(Vec<Incident>, u64)> {
        let where_clause = incident_filter_clause(filter);

        let count_sql = format!("SELECT COUNT(*) FROM incidents{where_clause}");
        let count_row = bind_incident_filter(sqlx::query(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = count_row.get(0);

        let page_sql = format!(
            "SELECT id, service_id, start_time, end_time, error, duration_ns, resolved
             FROM incidents{where_clause} ORDER BY start_time DESC LIMIT ? OFFSET ?"
        );
        let rows = bind_incident_filter(sqlx::query(&page_sql), filter)
            .bind(filter.page.limit() as i64)
            .bind(filter.page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(incident_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok((items, total as u64))
    }

    #[instrument(skip(self))]
    async fn resolve_all_incidents(&self, service_id: &str) -> StoreResult<Vec<Incident>> {
        let resolved = retry_busy("resolve_all_incidents", || {
            self.exec_resolve_all(service_id)
        })
        .await?;

        if !resolved.is_empty() {
            debug!("resolved {} incidents for {service_id}", resolved.len());
        }
        Ok(resolved)
    }

    #[instrument(skip(self))]
    async fn service_stats(
        &self,
        service_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<ServiceStats> {
        let state_row = sqlx::query("SELECT response_time_ms FROM service_states WHERE service_id = ?")
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(state_row) = state_row else {
            return Err(StoreError::NotFound(format!("service {service_id}")));
        };
        let avg_response_time_ms = state_row
            .get::<Option<i64>, _>("response_time_ms")
            .map(|v| v as u64);

        let now = Utc::now();
        let since_millis = Self::millis(&since);

        let count_row = sqlx::query(
            "SELECT COUNT(*) FROM incidents WHERE service_id = ? AND start_time >= ?",
        )
        .bind(service_id)
        .bind(since_millis)
        .fetch_one(&self.pool)
        .await?;
        let total_incidents: i64 = count_row.get(0);

        // Incidents overlapping the window, including ones opened before it.
        let rows = sqlx::query(
            "SELECT id, service_id, start_time, end_time, error, duration_ns, resolved
             FROM incidents
             WHERE service_id = ? AND (resolved = 0 OR end_time >= ?)",
        )
        .bind(service_id)
        .bind(since_millis)
        .fetch_all(&self.pool)
        .await?;

        let mut downtime_ms: i64 = 0;
        for row in &rows {
            let incident = incident_from_row(row)?;
            let window_start = incident.start_time.max(since);
            let window_end = incident.end_time.unwrap_or(now).min(now);
            if window_end > window_start {
                downtime_ms += (window_end - window_start).num_milliseconds();
            }
        }

        let period_ms = (now - since).num_milliseconds();
        let uptime_percentage = if period_ms > 0 {
            ((1.0 - downtime_ms as f64 / period_ms as f64) * 100.0).clamp(0.0, 100.0)
        } else {
            100.0
        };

        Ok(ServiceStats {
            service_id: service_id.to_string(),
            since,
            total_incidents: total_incidents as u64,
            total_downtime_seconds: downtime_ms / 1000,
            uptime_percentage,
            avg_response_time_ms,
        })
    }

    #[instrument(skip(self))]
    async fn all_tags(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT tag FROM service_tags ORDER BY tag")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("tag")).collect())
    }

    #[instrument(skip(self))]
    async fn tags_with_count(&self) -> StoreResult<HashMap<String, u64>> {
        let rows = sqlx::query("SELECT tag, COUNT(*) AS n FROM service_tags GROUP BY tag")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("tag"), row.get::<i64, _>("n") as u64))
            .collect())
    }

    async fn close(&self) -> StoreResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
