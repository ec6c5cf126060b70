//! Helper functions for integration tests

#![allow(dead_code)]

use metrics_hub::config::StorageConfig;
use metrics_hub::storage::{self, MetricRepository};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A backend under test; the temp dir must outlive it
pub type TestBackend = (TempDir, Arc<dyn MetricRepository>);

pub fn snapshot_config(dir: &TempDir, store_interval: u64) -> StorageConfig {
    StorageConfig::Snapshot {
        path: snapshot_path(dir),
        store_interval,
        restore: true,
    }
}

pub fn snapshot_path(dir: &TempDir) -> PathBuf {
    dir.path().join("metrics-db.json")
}

pub async fn memory_backend() -> TestBackend {
    let dir = tempfile::tempdir().unwrap();
    let repo = storage::open(&StorageConfig::Memory).await.unwrap();
    (dir, repo)
}

pub async fn snapshot_backend() -> TestBackend {
    let dir = tempfile::tempdir().unwrap();
    let repo = storage::open(&snapshot_config(&dir, 0)).await.unwrap();
    (dir, repo)
}

#[cfg(feature = "storage-sqlite")]
pub async fn sqlite_backend() -> TestBackend {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::Sqlite {
        dsn: dir.path().join("metrics.db").display().to_string(),
        retry_unit_ms: 10,
    };
    let repo = storage::open(&config).await.unwrap();
    (dir, repo)
}

/// One of every backend, labelled for assertion messages
pub async fn all_backends() -> Vec<(&'static str, TestBackend)> {
    #[allow(unused_mut)]
    let mut backends = vec![
        ("memory", memory_backend().await),
        ("snapshot", snapshot_backend().await),
    ];
    #[cfg(feature = "storage-sqlite")]
    backends.push(("sqlite", sqlite_backend().await));
    backends
}
