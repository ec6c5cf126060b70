//! Storage backends for metric points
//!
//! This module provides a trait-based abstraction over the stores a
//! collector can keep its metrics in.
//!
//! ## Design
//!
//! - **Trait-based**: `MetricRepository` allows swapping implementations
//! - **Async**: All operations are async and cancel when dropped
//! - **One merge algebra**: counters add, gauges overwrite, in every backend
//!
//! ## Backends
//!
//! - **In-Memory**: table behind a read/write lock, optionally mirrored to a
//!   snapshot file
//! - **SQLite**: transactional store, merge pushed into SQL, atomic batches
//!
//! ## Usage
//!
//! ```no_run
//! use metrics_hub::config::StorageConfig;
//! use metrics_hub::storage::{self, MetricPoint};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repo = storage::open(&StorageConfig::Memory).await?;
//!     repo.upsert(MetricPoint::counter("requests", 1)).await?;
//!     repo.close().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod metric;
pub mod snapshot;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::{error, info};

pub use backend::{BatchSemantics, MetricRepository};
pub use error::{StorageError, StorageResult};
pub use memory::{FlushPolicy, MemoryBackend};
pub use metric::{MetricKind, MetricPoint, MetricValue, merge};
pub use snapshot::SnapshotFile;

use crate::config::StorageConfig;

/// Build the backend selected by `config`
///
/// For the snapshot backend with `restore` set, the snapshot is loaded
/// before the backend is returned. A missing snapshot file is a cold start;
/// any other restore failure is logged and the store starts from whatever
/// was loaded.
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn MetricRepository>> {
    match config {
        StorageConfig::Memory => {
            info!("using in-memory storage without persistence");
            Ok(Arc::new(MemoryBackend::new()))
        }
        StorageConfig::Snapshot {
            path,
            store_interval,
            restore,
        } => {
            let backend = MemoryBackend::new();
            let snapshot = SnapshotFile::new(path);

            if *restore {
                match snapshot.load(&backend).await {
                    Ok(_) => {}
                    Err(err) if err.is_missing_file() => {
                        info!("no snapshot at {}, starting empty", path.display());
                    }
                    Err(err) => {
                        error!("can't restore data from {}: {}", path.display(), err);
                    }
                }
            }

            let policy = FlushPolicy::from_store_interval(*store_interval);
            Ok(Arc::new(backend.with_snapshot(snapshot, policy)))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { dsn, retry_unit_ms } => {
            let retry = crate::retry::RetryPolicy::from_unit(std::time::Duration::from_millis(
                *retry_unit_ms,
            ));
            let backend = sqlite::SqliteBackend::new(dsn, retry).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::InvalidConfig(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
