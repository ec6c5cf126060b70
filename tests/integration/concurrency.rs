//! Concurrency and race condition tests
//!
//! These tests verify that:
//! - Concurrent counter updates never lose a delta
//! - Concurrent upserts of a new name create it exactly once
//! - Concurrent batches interleave without corrupting totals

use futures::future::join_all;
use metrics_hub::storage::MetricPoint;
use pretty_assertions::assert_eq;

use crate::helpers::*;

const WRITERS: i64 = 20;

#[tokio::test]
async fn test_concurrent_updates_no_lost_deltas() {
    for (label, (_dir, repo)) in all_backends().await {
        repo.create(MetricPoint::counter("hits", 0)).await.unwrap();

        let tasks = (1..=WRITERS).map(|i| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.update(MetricPoint::counter("hits", i)).await })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let expected = WRITERS * (WRITERS + 1) / 2;
        assert_eq!(repo.get("hits").await.unwrap().delta(), Some(expected), "{label}");
    }
}

#[tokio::test]
async fn test_concurrent_upserts_create_once() {
    for (label, (_dir, repo)) in all_backends().await {
        let tasks = (0..WRITERS).map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.upsert(MetricPoint::counter("fresh", 1)).await })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(repo.all().await.unwrap().len(), 1, "{label}");
        assert_eq!(repo.get("fresh").await.unwrap().delta(), Some(WRITERS), "{label}");
    }
}

#[tokio::test]
async fn test_concurrent_batches() {
    for (label, (_dir, repo)) in all_backends().await {
        let tasks = (0..WRITERS).map(|i| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.update_batch(vec![
                    MetricPoint::counter("total", 1),
                    MetricPoint::gauge("last", i as f64),
                ])
                .await
            })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(repo.get("total").await.unwrap().delta(), Some(WRITERS), "{label}");
        let last = repo.get("last").await.unwrap().gauge_value().unwrap();
        assert!((0.0..WRITERS as f64).contains(&last), "{label}: {last}");
    }
}

#[tokio::test]
async fn test_readers_during_writes() {
    for (label, (_dir, repo)) in all_backends().await {
        repo.create(MetricPoint::counter("c", 0)).await.unwrap();

        let writers = (0..WRITERS).map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.update(MetricPoint::counter("c", 1)).await.map(|_| ()) })
        });
        let readers = (0..WRITERS).map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.get("c").await.map(|_| ()) })
        });
        for result in join_all(writers.chain(readers)).await {
            result.unwrap().unwrap();
        }

        assert_eq!(repo.get("c").await.unwrap().delta(), Some(WRITERS), "{label}");
    }
}
