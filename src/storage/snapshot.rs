//! File snapshots of a whole store
//!
//! A snapshot is a JSON array of points in the wire shape, written whole on
//! save and read whole on load. It is used to rehydrate the in-memory
//! backend at startup and to persist it while running.
//!
//! Saves go to a sibling `*.tmp` file that is synced and then renamed over
//! the snapshot, so an interrupted save leaves the previous snapshot intact.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::backend::MetricRepository;
use super::error::StorageResult;
use super::metric::MetricPoint;

/// Snapshot file on disk
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,

    /// Serializes writers of the temporary file
    write_lock: Mutex<()>,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Dump every point of `repo`, replacing the previous snapshot
    ///
    /// Returns the number of points written.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self, repo: &dyn MetricRepository) -> StorageResult<usize> {
        let points = repo.all().await?;
        self.write_points(&points).await
    }

    /// Replay the snapshot into `repo` through `create`
    ///
    /// Must run before `repo` serves traffic. A missing file surfaces as an
    /// I/O error (see [`super::StorageError::is_missing_file`]); the caller
    /// decides whether that means cold start.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self, repo: &dyn MetricRepository) -> StorageResult<usize> {
        let points = self.read_points().await?;
        let count = points.len();

        for point in points {
            repo.create(point).await?;
        }

        info!("restored {} metrics from snapshot", count);
        Ok(count)
    }

    pub async fn write_points(&self, points: &[MetricPoint]) -> StorageResult<usize> {
        let data = serde_json::to_vec(points)?;
        let temp_path = self.temp_path();

        let _guard = self.write_lock.lock().await;

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!("saved {} metrics to {}", points.len(), self.path.display());
        Ok(points.len())
    }

    pub async fn read_points(&self) -> StorageResult<Vec<MetricPoint>> {
        let data = tokio::fs::read(&self.path).await?;
        let points: Vec<MetricPoint> = serde_json::from_slice(&data)?;
        Ok(points)
    }
}
