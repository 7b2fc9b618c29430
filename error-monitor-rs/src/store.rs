//! # Dedup Store
//!
//! Persistent keyed storage that merges repeated occurrences of the same
//! fingerprint within a rolling window into one record, and serves the
//! read-only query surface used by the reporting UI.
//!
//! Two backends: an in-memory map for tests and development, and
//! PostgreSQL for production. The merge-or-insert check-then-act is NOT
//! atomic at this layer; the ingestion pipeline's single flush worker is
//! the serialization point that makes it race-free.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::fingerprint::Fingerprint;
use crate::types::{
    CauseInfo, Classification, ErrorCategory, LogEvent, LogRecord, MonitorError, Result, Severity,
};

use crate::config::StorageConfig;

/// Insert payload for a fresh record
#[derive(Debug, Clone)]
pub struct NewLogRecord {
    pub fingerprint: Fingerprint,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub context_snapshot: serde_json::Map<String, serde_json::Value>,
    pub cause_snapshot: Option<CauseInfo>,
    pub endpoint: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewLogRecord {
    /// Builds the insert payload for an event's first occurrence
    pub fn from_event(
        event: &LogEvent,
        classification: &Classification,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            fingerprint,
            category: classification.category,
            severity: classification.severity,
            message: event.message.clone(),
            context_snapshot: event.context.clone(),
            cause_snapshot: event.cause.clone(),
            endpoint: event.endpoint.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// Filters for the paginated query surface
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub category: Option<ErrorCategory>,
    pub severity: Option<Severity>,
    /// Inclusive lower bound on `last_seen`
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `last_seen`
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive free-text search over the representative message
    pub search: Option<String>,
    pub page_size: usize,
    pub offset: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            category: None,
            severity: None,
            from: None,
            until: None,
            search: None,
            page_size: 50,
            offset: 0,
        }
    }
}

/// One page of query results
#[derive(Debug, Clone)]
pub struct LogPage {
    pub records: Vec<LogRecord>,
    /// Total matching records, not just this page
    pub total: u64,
    pub offset: usize,
    pub page_size: usize,
}

/// Aggregate stats for the reporting UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStats {
    pub total: u64,
    pub critical_count: u64,
    pub warning_count: u64,
    pub info_count: u64,
    pub unique_fingerprints: u64,
    pub most_common_category: Option<ErrorCategory>,
    pub count_in_last_24h: u64,
}

/// Storage contract for the dedup store
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Initialize the storage backend (create tables, indexes)
    async fn initialize(&self) -> Result<()>;

    /// Check if the storage backend is healthy
    async fn is_healthy(&self) -> bool;

    /// Finds the open record for a fingerprint: the most recent record
    /// whose `last_seen` is at or after `window_start`
    async fn find_open(
        &self,
        fingerprint: &Fingerprint,
        window_start: DateTime<Utc>,
    ) -> Result<Option<LogRecord>>;

    /// Inserts a fresh record with `occurrence_count = 1`
    async fn insert(&self, new: NewLogRecord) -> Result<LogRecord>;

    /// Merges one more occurrence into an existing record: increments
    /// the count and advances `last_seen`
    async fn record_occurrence(&self, id: Uuid, seen_at: DateTime<Utc>) -> Result<()>;

    /// Lookup by storage-assigned id
    async fn get(&self, id: Uuid) -> Result<Option<LogRecord>>;

    /// All records for one fingerprint, most recent first
    async fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Vec<LogRecord>>;

    /// Paginated, filtered listing, most recent first
    async fn query(&self, query: &LogQuery) -> Result<LogPage>;

    /// Aggregate stats over the whole store
    async fn stats(&self) -> Result<LogStats>;
}

/// In-memory store for testing and development
pub struct InMemoryLogStore {
    records: RwLock<HashMap<Uuid, LogRecord>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn initialize(&self) -> Result<()> {
        info!("in-memory log store initialized");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn find_open(
        &self,
        fingerprint: &Fingerprint,
        window_start: DateTime<Utc>,
    ) -> Result<Option<LogRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| &r.fingerprint == fingerprint && r.last_seen >= window_start)
            .max_by_key(|r| r.last_seen)
            .cloned())
    }

    async fn insert(&self, new: NewLogRecord) -> Result<LogRecord> {
        let now = Utc::now();
        let record = LogRecord {
            id: Uuid::new_v4(),
            fingerprint: new.fingerprint,
            category: new.category,
            severity: new.severity,
            message: new.message,
            context_snapshot: new.context_snapshot,
            cause_snapshot: new.cause_snapshot,
            endpoint: new.endpoint,
            occurrence_count: 1,
            first_seen: new.timestamp,
            last_seen: new.timestamp,
            created_at: now,
            updated_at: now,
        };

        let mut records = self.records.write().await;
        records.insert(record.id, record.clone());
        debug!(id = %record.id, fingerprint = %record.fingerprint, "inserted log record");
        Ok(record)
    }

    async fn record_occurrence(&self, id: Uuid, seen_at: DateTime<Utc>) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| MonitorError::Storage(format!("record {} not found", id)))?;

        record.occurrence_count += 1;
        if seen_at > record.last_seen {
            record.last_seen = seen_at;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<LogRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Vec<LogRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<LogRecord> = records
            .values()
            .filter(|r| &r.fingerprint == fingerprint)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(matching)
    }

    async fn query(&self, query: &LogQuery) -> Result<LogPage> {
        let records = self.records.read().await;
        let search = query.search.as_ref().map(|s| s.to_lowercase());

        let mut matching: Vec<LogRecord> = records
            .values()
            .filter(|r| query.category.map_or(true, |c| r.category == c))
            .filter(|r| query.severity.map_or(true, |s| r.severity == s))
            .filter(|r| query.from.map_or(true, |t| r.last_seen >= t))
            .filter(|r| query.until.map_or(true, |t| r.last_seen <= t))
            .filter(|r| {
                search
                    .as_deref()
                    .map_or(true, |s| r.message.to_lowercase().contains(s))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

        let total = matching.len() as u64;
        let start = query.offset.min(matching.len());
        let end = (query.offset + query.page_size).min(matching.len());

        Ok(LogPage {
            records: matching[start..end].to_vec(),
            total,
            offset: query.offset,
            page_size: query.page_size,
        })
    }

    async fn stats(&self) -> Result<LogStats> {
        let records = self.records.read().await;
        let day_ago = Utc::now() - chrono::Duration::hours(24);

        let mut stats = LogStats {
            total: records.len() as u64,
            critical_count: 0,
            warning_count: 0,
            info_count: 0,
            unique_fingerprints: 0,
            most_common_category: None,
            count_in_last_24h: 0,
        };

        let mut fingerprints = std::collections::HashSet::new();
        let mut by_category: HashMap<ErrorCategory, u64> = HashMap::new();

        for record in records.values() {
            match record.severity {
                Severity::Critical => stats.critical_count += 1,
                Severity::Warning => stats.warning_count += 1,
                Severity::Info => stats.info_count += 1,
            }
            fingerprints.insert(record.fingerprint.clone());
            *by_category.entry(record.category).or_insert(0) += 1;
            if record.last_seen >= day_ago {
                stats.count_in_last_24h += 1;
            }
        }

        stats.unique_fingerprints = fingerprints.len() as u64;
        // ties break toward the lexicographically-first category name,
        // matching the SQL backend's ORDER BY
        stats.most_common_category = by_category
            .into_iter()
            .max_by_key(|(category, count)| (*count, std::cmp::Reverse(category.as_str())))
            .map(|(category, _)| category);

        Ok(stats)
    }
}

/// PostgreSQL store
pub struct PostgresLogStore {
    pool: PgPool,
}

impl PostgresLogStore {
    /// Connects to the database; call `initialize` before first use
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &PgRow) -> Result<LogRecord> {
    let fingerprint: String = row.try_get("fingerprint")?;
    let category: String = row.try_get("category")?;
    let severity: String = row.try_get("severity")?;
    let context: serde_json::Value = row.try_get("context")?;
    let cause: Option<serde_json::Value> = row.try_get("cause")?;

    Ok(LogRecord {
        id: row.try_get("id")?,
        fingerprint: Fingerprint::from(fingerprint),
        category: category.parse()?,
        severity: severity.parse()?,
        message: row.try_get("message")?,
        context_snapshot: context.as_object().cloned().unwrap_or_default(),
        cause_snapshot: cause.map(serde_json::from_value).transpose()?,
        endpoint: row.try_get("endpoint")?,
        occurrence_count: row.try_get::<i64, _>("occurrence_count")? as u32,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_filters(builder: &mut QueryBuilder<Postgres>, query: &LogQuery) {
    builder.push(" WHERE TRUE");
    if let Some(category) = query.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(severity) = query.severity {
        builder.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(from) = query.from {
        builder.push(" AND last_seen >= ").push_bind(from);
    }
    if let Some(until) = query.until {
        builder.push(" AND last_seen <= ").push_bind(until);
    }
    if let Some(search) = &query.search {
        builder
            .push(" AND message ILIKE ")
            .push_bind(format!("%{}%", search));
    }
}

#[async_trait]
impl LogStore for PostgresLogStore {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS log_records (
                id UUID PRIMARY KEY,
                fingerprint VARCHAR(16) NOT NULL,
                category TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                context JSONB NOT NULL DEFAULT '{}'::jsonb,
                cause JSONB,
                endpoint TEXT,
                occurrence_count BIGINT NOT NULL DEFAULT 1,
                first_seen TIMESTAMPTZ NOT NULL,
                last_seen TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_log_records_fingerprint ON log_records (fingerprint)",
            "CREATE INDEX IF NOT EXISTS idx_log_records_last_seen ON log_records (last_seen)",
            "CREATE INDEX IF NOT EXISTS idx_log_records_category ON log_records (category)",
            "CREATE INDEX IF NOT EXISTS idx_log_records_severity ON log_records (severity)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!("postgres log store initialized");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn find_open(
        &self,
        fingerprint: &Fingerprint,
        window_start: DateTime<Utc>,
    ) -> Result<Option<LogRecord>> {
        let row = sqlx::query(
            "SELECT * FROM log_records
             WHERE fingerprint = $1 AND last_seen >= $2
             ORDER BY last_seen DESC LIMIT 1",
        )
        .bind(fingerprint.as_str())
        .bind(window_start)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, new: NewLogRecord) -> Result<LogRecord> {
        let now = Utc::now();
        let record = LogRecord {
            id: Uuid::new_v4(),
            fingerprint: new.fingerprint,
            category: new.category,
            severity: new.severity,
            message: new.message,
            context_snapshot: new.context_snapshot,
            cause_snapshot: new.cause_snapshot,
            endpoint: new.endpoint,
            occurrence_count: 1,
            first_seen: new.timestamp,
            last_seen: new.timestamp,
            created_at: now,
            updated_at: now,
        };

        let cause_json = record
            .cause_snapshot
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            "INSERT INTO log_records
             (id, fingerprint, category, severity, message, context, cause, endpoint,
              occurrence_count, first_seen, last_seen, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(record.id)
        .bind(record.fingerprint.as_str())
        .bind(record.category.as_str())
        .bind(record.severity.as_str())
        .bind(&record.message)
        .bind(serde_json::Value::Object(record.context_snapshot.clone()))
        .bind(cause_json)
        .bind(record.endpoint.as_deref())
        .bind(record.occurrence_count as i64)
        .bind(record.first_seen)
        .bind(record.last_seen)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(id = %record.id, fingerprint = %record.fingerprint, "inserted log record");
        Ok(record)
    }

    async fn record_occurrence(&self, id: Uuid, seen_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE log_records
             SET occurrence_count = occurrence_count + 1,
                 last_seen = GREATEST(last_seen, $2),
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MonitorError::Storage(format!("record {} not found", id)));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<LogRecord>> {
        let row = sqlx::query("SELECT * FROM log_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Vec<LogRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM log_records WHERE fingerprint = $1 ORDER BY last_seen DESC",
        )
        .bind(fingerprint.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn query(&self, query: &LogQuery) -> Result<LogPage> {
        let mut count_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM log_records");
        push_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM log_records");
        push_filters(&mut builder, query);
        builder.push(" ORDER BY last_seen DESC LIMIT ");
        builder.push_bind(query.page_size as i64);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>>>()?;

        Ok(LogPage {
            records,
            total: total as u64,
            offset: query.offset,
            page_size: query.page_size,
        })
    }

    async fn stats(&self) -> Result<LogStats> {
        let (total, unique): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(DISTINCT fingerprint) FROM log_records")
                .fetch_one(&self.pool)
                .await?;

        let severity_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT severity, COUNT(*) FROM log_records GROUP BY severity")
                .fetch_all(&self.pool)
                .await?;

        let top_category: Option<(String,)> = sqlx::query_as(
            "SELECT category FROM log_records
             GROUP BY category ORDER BY COUNT(*) DESC, category ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let (count_in_last_24h,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM log_records WHERE last_seen >= NOW() - INTERVAL '24 hours'",
        )
        .fetch_one(&self.pool)
        .await?;

        let mut stats = LogStats {
            total: total as u64,
            critical_count: 0,
            warning_count: 0,
            info_count: 0,
            unique_fingerprints: unique as u64,
            most_common_category: top_category
                .map(|(name,)| name.parse())
                .transpose()?,
            count_in_last_24h: count_in_last_24h as u64,
        };

        for (severity, count) in severity_rows {
            match severity.parse::<Severity>()? {
                Severity::Critical => stats.critical_count = count as u64,
                Severity::Warning => stats.warning_count = count as u64,
                Severity::Info => stats.info_count = count as u64,
            }
        }

        Ok(stats)
    }
}

/// Create a log store backend based on configuration
pub async fn create_log_store(config: &StorageConfig) -> Result<Arc<dyn LogStore>> {
    match config.backend.as_str() {
        "memory" | "in-memory" => {
            info!("using in-memory log store");
            Ok(Arc::new(InMemoryLogStore::new()))
        }
        "postgres" | "postgresql" => {
            let url = config.connection_string.as_ref().ok_or_else(|| {
                MonitorError::Initialization(
                    "postgres backend requires a connection string".to_string(),
                )
            })?;
            info!("using postgres log store");
            Ok(Arc::new(PostgresLogStore::connect(url).await?))
        }
        other => Err(MonitorError::Initialization(format!(
            "unknown storage backend: {}",
            other
        ))),
    }
}
