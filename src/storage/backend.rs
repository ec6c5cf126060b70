//! Repository trait definition
//!
//! This module defines the core `MetricRepository` trait that all
//! storage implementations must implement.

use async_trait::async_trait;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::metric::MetricPoint;

/// How a backend applies `update_batch` when one point fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSemantics {
    /// All points commit or none do
    Atomic,

    /// Each point commits on its own; points before the failing one stay
    /// committed, points after it are not applied
    PerPoint,
}

/// Trait for metric stores
///
/// All backends (in-memory, SQLite) implement this trait and must agree on
/// the merge rules of [`super::metric::merge`]: counters add, gauges
/// overwrite, and a stored point's kind never changes.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across request
/// handlers.
///
/// ## Cancellation
///
/// Dropping a returned future cancels the operation. Backends must leave
/// their state as it was before the call, or fully applied, never half-way
/// through a single point.
///
/// ## Error Handling
///
/// `NotFound` and `AlreadyExists` are expected signals for create-vs-update
/// decisions. Transient connection failures are retried inside the backend
/// and only surface once retries are exhausted.
#[async_trait]
pub trait MetricRepository: Send + Sync {
    /// Every stored point, in no particular order
    async fn all(&self) -> StorageResult<Vec<MetricPoint>>;

    /// Fetch one point by name, `NotFound` if absent
    async fn get(&self, name: &str) -> StorageResult<MetricPoint>;

    /// Store a new point verbatim, `AlreadyExists` if the name is taken
    async fn create(&self, point: MetricPoint) -> StorageResult<MetricPoint>;

    /// Merge `point` into the stored point of the same name
    ///
    /// Returns the merged point. `NotFound` if absent, `InvalidMetric` if
    /// the kinds differ.
    async fn update(&self, point: MetricPoint) -> StorageResult<MetricPoint>;

    /// Create-or-merge every point of the batch
    ///
    /// Whether a failure rolls back the whole batch is reported by
    /// [`MetricRepository::batch_semantics`].
    async fn update_batch(&self, points: Vec<MetricPoint>) -> StorageResult<()>;

    /// Liveness/connectivity probe
    async fn ping(&self) -> StorageResult<()>;

    /// Release resources; calling it twice is fine
    async fn close(&self) -> StorageResult<()>;

    fn batch_semantics(&self) -> BatchSemantics;

    /// Create the point if absent, otherwise merge it
    ///
    /// This is the single-point ingestion path. A create that loses a race
    /// against a concurrent writer falls back to an update.
    async fn upsert(&self, point: MetricPoint) -> StorageResult<MetricPoint> {
        match self.get(&point.name).await {
            Ok(_) => self.update(point).await,
            Err(StorageError::NotFound(_)) => match self.create(point.clone()).await {
                Err(StorageError::AlreadyExists(_)) => {
                    debug!("{} created concurrently, merging instead", point.name);
                    self.update(point).await
                }
                result => result,
            },
            Err(err) => Err(err),
        }
    }
}
