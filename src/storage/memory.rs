//! In-memory storage backend
//!
//! Keeps the current value of every metric in a table guarded by a single
//! read/write lock: readers run concurrently, writers exclude everyone.
//!
//! ## Persistence
//!
//! The table can be mirrored into a [`SnapshotFile`]:
//! - **Synchronous**: after every successful mutation, before other writers
//!   get the lock, so snapshots land in mutation order
//! - **Periodic**: a background task dumps the table on every tick
//!
//! Snapshot failures are logged and never fail the mutation that
//! triggered them. `close()` stops the background task and saves once more.
//!
//! ## Batches
//!
//! `update_batch` holds the write lock for the whole batch and applies
//! points in order. A failing point stops the batch; earlier points stay
//! committed ([`BatchSemantics::PerPoint`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use super::backend::{BatchSemantics, MetricRepository};
use super::error::{StorageError, StorageResult};
use super::metric::{MetricPoint, merge};
use super::snapshot::SnapshotFile;

type Table = HashMap<String, MetricPoint>;

/// When the table is mirrored into its snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Save after every mutation
    Synchronous,

    /// Save the whole table on a timer
    Every(Duration),
}

impl FlushPolicy {
    /// `0` means synchronous, anything else is a period in seconds
    pub fn from_store_interval(seconds: u64) -> Self {
        match seconds {
            0 => FlushPolicy::Synchronous,
            secs => FlushPolicy::Every(Duration::from_secs(secs)),
        }
    }
}

struct Flusher {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// In-memory storage backend
pub struct MemoryBackend {
    table: Arc<RwLock<Table>>,

    /// Optional snapshot mirror and how it is kept up to date
    snapshot: Option<(Arc<SnapshotFile>, FlushPolicy)>,

    flusher: Mutex<Option<Flusher>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend without persistence
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(HashMap::new())),
            snapshot: None,
            flusher: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Mirror this backend into `snapshot`
    ///
    /// With a periodic policy this spawns the flush task, so it must be
    /// called from within a Tokio runtime. Restore the snapshot (if wanted)
    /// before calling this, otherwise the first flush overwrites it.
    pub fn with_snapshot(mut self, snapshot: SnapshotFile, policy: FlushPolicy) -> Self {
        let policy = match policy {
            FlushPolicy::Every(period) if period.is_zero() => FlushPolicy::Synchronous,
            policy => policy,
        };
        let snapshot = Arc::new(snapshot);

        if let FlushPolicy::Every(period) = policy {
            let (shutdown, shutdown_rx) = oneshot::channel();
            let handle = tokio::spawn(run_flusher(
                self.table.clone(),
                snapshot.clone(),
                period,
                shutdown_rx,
            ));
            self.flusher = Mutex::new(Some(Flusher { shutdown, handle }));
        }

        info!(
            "in-memory backend mirrored to {} ({:?})",
            snapshot.path().display(),
            policy
        );
        self.snapshot = Some((snapshot, policy));
        self
    }

    /// Number of stored metrics
    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.is_empty()
    }

    /// Save synchronously if configured, while still excluding other writers
    async fn after_mutation(&self, table: RwLockWriteGuard<'_, Table>) {
        let Some((snapshot, FlushPolicy::Synchronous)) = &self.snapshot else {
            return;
        };

        let table = table.downgrade();
        let points: Vec<MetricPoint> = table.values().cloned().collect();
        if let Err(err) = snapshot.write_points(&points).await {
            warn!("failed to save snapshot: {}", err);
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Create or merge one point into an already locked table
fn upsert_locked(table: &mut Table, point: MetricPoint) -> StorageResult<()> {
    point.validate()?;

    let stored = match table.get(&point.name) {
        Some(existing) => merge(existing, &point)?,
        None => point,
    };
    table.insert(stored.name.clone(), stored);
    Ok(())
}

async fn run_flusher(
    table: Arc<RwLock<Table>>,
    snapshot: Arc<SnapshotFile>,
    period: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = time::interval(period);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                debug!("saving current state");
                let points: Vec<MetricPoint> = table.read().await.values().cloned().collect();
                if let Err(err) = snapshot.write_points(&points).await {
                    error!("failed to save data to {}: {}", snapshot.path().display(), err);
                }
            }
            _ = &mut shutdown => break,
        }
    }

    debug!("snapshot flusher stopped");
}

#[async_trait]
impl MetricRepository for MemoryBackend {
    async fn all(&self) -> StorageResult<Vec<MetricPoint>> {
        let table = self.table.read().await;
        Ok(table.values().cloned().collect())
    }

    async fn get(&self, name: &str) -> StorageResult<MetricPoint> {
        let table = self.table.read().await;
        table
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    #[instrument(skip_all, fields(name = %point.name))]
    async fn create(&self, point: MetricPoint) -> StorageResult<MetricPoint> {
        point.validate()?;

        let mut table = self.table.write().await;
        if table.contains_key(&point.name) {
            return Err(StorageError::AlreadyExists(point.name));
        }
        table.insert(point.name.clone(), point.clone());
        debug!("created {} metric", point.kind());

        self.after_mutation(table).await;
        Ok(point)
    }

    #[instrument(skip_all, fields(name = %point.name))]
    async fn update(&self, point: MetricPoint) -> StorageResult<MetricPoint> {
        point.validate()?;

        let mut table = self.table.write().await;
        let existing = table
            .get(&point.name)
            .ok_or_else(|| StorageError::NotFound(point.name.clone()))?;
        let merged = merge(existing, &point)?;
        table.insert(merged.name.clone(), merged.clone());

        self.after_mutation(table).await;
        Ok(merged)
    }

    #[instrument(skip_all, fields(count = points.len()))]
    async fn update_batch(&self, points: Vec<MetricPoint>) -> StorageResult<()> {
        if points.is_empty() {
            return Ok(());
        }

        let mut table = self.table.write().await;
        let total = points.len();
        let mut applied = 0;
        let mut result = Ok(());

        for point in points {
            if let Err(err) = upsert_locked(&mut table, point) {
                result = Err(err);
                break;
            }
            applied += 1;
        }

        if applied < total {
            debug!("batch stopped after {} of {} metrics", applied, total);
        }
        if applied > 0 {
            self.after_mutation(table).await;
        }
        result
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("closing in-memory backend");

        if let Some(flusher) = self.flusher.lock().await.take() {
            let _ = flusher.shutdown.send(());
            if let Err(err) = flusher.handle.await {
                error!("snapshot flusher panicked: {}", err);
            }
        }

        if let Some((snapshot, _)) = &self.snapshot {
            snapshot.save(self).await?;
        }
        Ok(())
    }

    fn batch_semantics(&self) -> BatchSemantics {
        BatchSemantics::PerPoint
    }
}
