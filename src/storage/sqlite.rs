//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `MetricRepository` trait.
//!
//! ## Features
//!
//! - **Merge in SQL**: counter addition and gauge overwrite happen inside the
//!   `UPDATE`/upsert statements, so concurrent writers to one row cannot race
//! - **Atomic batches**: `update_batch` runs in one transaction
//! - **Retry**: connection-class failures are retried on a fixed schedule
//! - **Migrations**: automatic, idempotent schema setup with sqlx
//! - **WAL mode**: readers are not blocked by writers
//!
//! ## Limitations
//!
//! - **Concurrency**: SQLite serializes writers; `busy_timeout` absorbs short
//!   lock contention before it surfaces as a retryable error
//! - **Distributed**: Single-machine only

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{BatchSemantics, MetricRepository};
use super::error::{StorageError, StorageResult};
use super::metric::{MetricKind, MetricPoint};
use crate::retry::RetryPolicy;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SELECT_ALL: &str = "SELECT name, kind, delta, value FROM metrics ORDER BY name";

const SELECT_ONE: &str = "SELECT name, kind, delta, value FROM metrics WHERE name = ?";

const INSERT: &str = "INSERT INTO metrics (name, kind, delta, value) VALUES (?, ?, ?, ?)";

const UPDATE: &str = r#"
    UPDATE metrics SET delta = delta + ?, value = ?
    WHERE name = ? AND kind = ?
    RETURNING name, kind, delta, value
"#;

// a kind mismatch skips the update and reports zero affected rows
const UPSERT: &str = r#"
    INSERT INTO metrics (name, kind, delta, value)
    VALUES (?, ?, ?, ?)
    ON CONFLICT (name) DO UPDATE SET
        delta = metrics.delta + excluded.delta,
        value = excluded.value
    WHERE metrics.kind = excluded.kind
"#;

/// SQLite storage backend
///
/// This backend is the system of record when configured: every operation
/// goes straight to the database and nothing is cached in process.
#[derive(Debug)]
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    retry: RetryPolicy,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Open a connection pool, creating the database file if needed
    /// 2. Verify connectivity
    /// 3. Run migrations to create tables
    ///
    /// Each step retries connection-class failures with `retry`.
    ///
    /// ## Arguments
    ///
    /// * `dsn` - A `sqlite:` URL (e.g. `sqlite://metrics.db`, `sqlite::memory:`)
    ///   or a plain file path
    /// * `retry` - Backoff schedule for transient failures
    #[instrument(skip_all)]
    pub async fn new(dsn: &str, retry: RetryPolicy) -> StorageResult<Self> {
        if dsn.trim().is_empty() {
            return Err(StorageError::EmptyConfiguration);
        }

        info!("initializing SQLite backend at: {}", dsn);

        let options = connect_options(dsn)?;

        // every connection to :memory: gets its own database, so keep exactly one
        let in_memory = dsn.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = retry
            .run("connect", || {
                let pool_options = pool_options.clone();
                let options = options.clone();
                async move {
                    pool_options
                        .connect_with(options)
                        .await
                        .map_err(StorageError::from)
                }
            })
            .await?;

        info!("SQLite connection pool created");

        let backend = Self { pool, retry };
        backend.retry.run("ping", || backend.ping()).await?;

        debug!("running database migrations");
        let pool = &backend.pool;
        backend
            .retry
            .run("migrate", move || async move {
                MIGRATOR.run(pool).await.map_err(StorageError::from)
            })
            .await?;

        info!("database migrations complete");

        Ok(backend)
    }

    async fn fetch_all_once(&self) -> StorageResult<Vec<SqliteRow>> {
        let rows = sqlx::query(SELECT_ALL).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn fetch_one_once(&self, name: &str) -> StorageResult<Option<SqliteRow>> {
        let row = sqlx::query(SELECT_ONE)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn insert_once(&self, point: &MetricPoint) -> StorageResult<()> {
        sqlx::query(INSERT)
            .bind(&point.name)
            .bind(point.kind().as_str())
            .bind(point.delta())
            .bind(point.gauge_value())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_once(&self, point: &MetricPoint) -> StorageResult<Option<SqliteRow>> {
        let row = sqlx::query(UPDATE)
            .bind(point.delta())
            .bind(point.gauge_value())
            .bind(&point.name)
            .bind(point.kind().as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn upsert_batch_once(&self, points: &[MetricPoint]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        for point in points {
            let result = sqlx::query(UPSERT)
                .bind(&point.name)
                .bind(point.kind().as_str())
                .bind(point.delta())
                .bind(point.gauge_value())
                .execute(&mut *tx)
                .await?;

            // returning drops `tx`, which rolls the batch back
            if result.rows_affected() == 0 {
                return Err(StorageError::InvalidMetric(format!(
                    "{}: stored with a type other than {}",
                    point.name,
                    point.kind()
                )));
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

fn connect_options(dsn: &str) -> StorageResult<SqliteConnectOptions> {
    let options = if dsn.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(dsn)
            .map_err(|e| StorageError::InvalidConfig(format!("invalid dsn {dsn}: {e}")))?
    } else {
        SqliteConnectOptions::new().filename(dsn)
    };

    Ok(options
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal) // WAL mode for better concurrency
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5)))
}

/// Map a row with nullable value columns back to a point
///
/// A row with neither column set is `InvalidMetric`, never a zero value.
fn point_from_row(row: &SqliteRow) -> StorageResult<MetricPoint> {
    let name: String = row.try_get("name")?;
    let kind: String = row.try_get("kind")?;
    let delta: Option<i64> = row.try_get("delta")?;
    let value: Option<f64> = row.try_get("value")?;

    MetricPoint::from_columns(name, MetricKind::from_str(&kind)?, delta, value)
}

#[async_trait]
impl MetricRepository for SqliteBackend {
    #[instrument(skip(self))]
    async fn all(&self) -> StorageResult<Vec<MetricPoint>> {
        let rows = self.retry.run("all", || self.fetch_all_once()).await?;
        rows.iter().map(point_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> StorageResult<MetricPoint> {
        let row = self
            .retry
            .run("get", || self.fetch_one_once(name))
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        point_from_row(&row)
    }

    #[instrument(skip_all, fields(name = %point.name))]
    async fn create(&self, point: MetricPoint) -> StorageResult<MetricPoint> {
        point.validate()?;

        let incoming = &point;
        match self.retry.run("create", || self.insert_once(incoming)).await {
            Err(StorageError::AlreadyExists(_)) => {
                return Err(StorageError::AlreadyExists(point.name));
            }
            result => result?,
        }
        debug!("created {} metric", point.kind());

        // read back the canonical stored row
        self.get(&point.name).await
    }

    #[instrument(skip_all, fields(name = %point.name))]
    async fn update(&self, point: MetricPoint) -> StorageResult<MetricPoint> {
        point.validate()?;

        let incoming = &point;
        match self.retry.run("update", || self.update_once(incoming)).await? {
            Some(row) => point_from_row(&row),
            None => {
                // either absent (NotFound propagates) or stored with the other kind
                let existing = self.get(&point.name).await?;
                Err(StorageError::InvalidMetric(format!(
                    "{}: stored as {}, got {}",
                    point.name,
                    existing.kind(),
                    point.kind()
                )))
            }
        }
    }

    #[instrument(skip(self, points), fields(count = points.len()))]
    async fn update_batch(&self, points: Vec<MetricPoint>) -> StorageResult<()> {
        if points.is_empty() {
            return Ok(());
        }

        for point in &points {
            point.validate()?;
        }

        debug!("upserting {} metrics into SQLite", points.len());

        let batch = points.as_slice();
        self.retry
            .run("update_batch", || self.upsert_batch_once(batch))
            .await?;

        debug!("batch upsert complete");
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }

    fn batch_semantics(&self) -> BatchSemantics {
        BatchSemantics::Atomic
    }
}
