//! Integration tests for snapshot persistence
//!
//! These tests verify that:
//! - A closed snapshot backend can be restored from its file
//! - Synchronous flushing keeps the file current after each write
//! - Periodic flushing writes on its own schedule and on close
//! - Restore can be turned off

use metrics_hub::config::StorageConfig;
use metrics_hub::storage::{self, MetricPoint, SnapshotFile};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tempfile::tempdir;

use crate::helpers::*;

fn sorted(mut points: Vec<MetricPoint>) -> Vec<MetricPoint> {
    points.sort_by(|a, b| a.name.cmp(&b.name));
    points
}

#[tokio::test]
async fn test_restore_after_close() {
    let dir = tempdir().unwrap();
    let config = snapshot_config(&dir, 300);

    let repo = storage::open(&config).await.unwrap();
    repo.upsert(MetricPoint::counter("requests", 5)).await.unwrap();
    repo.upsert(MetricPoint::counter("requests", 3)).await.unwrap();
    repo.upsert(MetricPoint::gauge("temp", 37.1)).await.unwrap();
    repo.close().await.unwrap();
    drop(repo);

    let repo = storage::open(&config).await.unwrap();
    assert_eq!(
        sorted(repo.all().await.unwrap()),
        vec![
            MetricPoint::counter("requests", 8),
            MetricPoint::gauge("temp", 37.1),
        ]
    );

    // restored counters keep accumulating
    repo.update(MetricPoint::counter("requests", 2)).await.unwrap();
    assert_eq!(repo.get("requests").await.unwrap().delta(), Some(10));
    repo.close().await.unwrap();
}

#[tokio::test]
async fn test_synchronous_flush_tracks_every_write() {
    let dir = tempdir().unwrap();
    let repo = storage::open(&snapshot_config(&dir, 0)).await.unwrap();
    let file = SnapshotFile::new(snapshot_path(&dir));

    repo.create(MetricPoint::counter("a", 1)).await.unwrap();
    assert_eq!(file.read_points().await.unwrap(), vec![MetricPoint::counter("a", 1)]);

    repo.update(MetricPoint::counter("a", 4)).await.unwrap();
    assert_eq!(file.read_points().await.unwrap(), vec![MetricPoint::counter("a", 5)]);

    repo.update_batch(vec![MetricPoint::gauge("b", 0.5)])
        .await
        .unwrap();
    assert_eq!(
        sorted(file.read_points().await.unwrap()),
        vec![MetricPoint::counter("a", 5), MetricPoint::gauge("b", 0.5)]
    );
}

#[tokio::test]
async fn test_periodic_flush_writes_on_close() {
    let dir = tempdir().unwrap();
    let repo = storage::open(&snapshot_config(&dir, 3600)).await.unwrap();
    repo.create(MetricPoint::gauge("load", 0.75)).await.unwrap();

    repo.close().await.unwrap();

    let file = SnapshotFile::new(snapshot_path(&dir));
    assert_eq!(
        file.read_points().await.unwrap(),
        vec![MetricPoint::gauge("load", 0.75)]
    );
}

#[tokio::test]
async fn test_periodic_flush_ticks() {
    let dir = tempdir().unwrap();
    let repo = storage::open(&snapshot_config(&dir, 1)).await.unwrap();
    repo.create(MetricPoint::counter("ticks", 1)).await.unwrap();

    let file = SnapshotFile::new(snapshot_path(&dir));
    let mut flushed = Vec::new();
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(points) = file.read_points().await {
            flushed = points;
            break;
        }
    }
    assert_eq!(flushed, vec![MetricPoint::counter("ticks", 1)]);
    repo.close().await.unwrap();
}

#[tokio::test]
async fn test_restore_disabled_starts_empty() {
    let dir = tempdir().unwrap();
    let path = snapshot_path(&dir);
    SnapshotFile::new(&path)
        .write_points(&[MetricPoint::counter("old", 1)])
        .await
        .unwrap();

    let config = StorageConfig::Snapshot {
        path,
        store_interval: 0,
        restore: false,
    };
    let repo = storage::open(&config).await.unwrap();
    assert!(repo.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_snapshot_is_not_fatal() {
    let dir = tempdir().unwrap();
    tokio::fs::write(snapshot_path(&dir), b"not json").await.unwrap();

    let repo = storage::open(&snapshot_config(&dir, 0)).await.unwrap();
    assert!(repo.all().await.unwrap().is_empty());

    // the next write replaces the broken file
    repo.create(MetricPoint::counter("fresh", 1)).await.unwrap();
    let file = SnapshotFile::new(snapshot_path(&dir));
    assert_eq!(file.read_points().await.unwrap(), vec![MetricPoint::counter("fresh", 1)]);
}
