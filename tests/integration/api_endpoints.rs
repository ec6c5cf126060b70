//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Single and batch ingestion merge like the repository does
//! - Storage errors map to the right status codes
//! - Malformed bodies are rejected before reaching storage

use axum::http::StatusCode;
use metrics_hub::api::{ApiConfig, ApiState, spawn_api_server};
use metrics_hub::storage::{MetricPoint, MetricRepository};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::helpers::*;

// Helper to create test API server
async fn spawn_test_api(repo: Arc<dyn MetricRepository>) -> SocketAddr {
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
    };
    spawn_api_server(config, ApiState::new(repo)).await.unwrap()
}

#[tokio::test]
async fn test_update_and_value() {
    let (_dir, repo) = memory_backend().await;
    let addr = spawn_test_api(repo).await;
    let client = reqwest::Client::new();

    for delta in [5, 3] {
        let response = client
            .post(format!("http://{}/update", addr))
            .json(&json!({"id": "requests", "type": "counter", "delta": delta}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), StatusCode::OK.as_u16());
    }

    let response = client
        .get(format!("http://{}/value/requests", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::OK.as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"id": "requests", "type": "counter", "delta": 8}));
}

#[tokio::test]
async fn test_batch_then_list() {
    let (_dir, repo) = snapshot_backend().await;
    let addr = spawn_test_api(repo).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/updates", addr))
        .json(&json!([
            {"id": "a", "type": "counter", "delta": 1},
            {"id": "b", "type": "gauge", "value": 2.0}
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::OK.as_u16());

    let points: Vec<MetricPoint> = client
        .get(format!("http://{}/", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        points,
        vec![MetricPoint::counter("a", 1), MetricPoint::gauge("b", 2.0)]
    );
}

#[tokio::test]
async fn test_missing_value_is_404() {
    let (_dir, repo) = memory_backend().await;
    let addr = spawn_test_api(repo).await;

    let response = reqwest::get(format!("http://{}/value/missing", addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::NOT_FOUND.as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_kind_mismatch_is_400() {
    let (_dir, repo) = memory_backend().await;
    repo.create(MetricPoint::gauge("temp", 36.6)).await.unwrap();
    let addr = spawn_test_api(repo.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/update", addr))
        .json(&json!({"id": "temp", "type": "counter", "delta": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::BAD_REQUEST.as_u16());
    assert_eq!(repo.get("temp").await.unwrap().gauge_value(), Some(36.6));
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let (_dir, repo) = memory_backend().await;
    let addr = spawn_test_api(repo.clone()).await;
    let client = reqwest::Client::new();

    // counter without a delta
    let response = client
        .post(format!("http://{}/update", addr))
        .json(&json!({"id": "c", "type": "counter"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::BAD_REQUEST.as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    // unknown kind
    let response = client
        .post(format!("http://{}/update", addr))
        .json(&json!({"id": "c", "type": "histogram", "value": 1.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::BAD_REQUEST.as_u16());

    // not JSON at all, on the batch route
    let response = client
        .post(format!("http://{}/updates", addr))
        .header("content-type", "application/json")
        .body("[{")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::BAD_REQUEST.as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    assert!(repo.all().await.unwrap().is_empty());
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_sqlite_batch_rolls_back_over_http() {
    let (_dir, repo) = sqlite_backend().await;
    repo.create(MetricPoint::gauge("clash", 1.0)).await.unwrap();
    let addr = spawn_test_api(repo.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/updates", addr))
        .json(&json!([
            {"id": "fresh", "type": "counter", "delta": 1},
            {"id": "clash", "type": "counter", "delta": 1}
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::BAD_REQUEST.as_u16());
    assert!(repo.get("fresh").await.is_err());
}

#[tokio::test]
async fn test_ping() {
    let (_dir, repo) = memory_backend().await;
    let addr = spawn_test_api(repo).await;

    let response = reqwest::get(format!("http://{}/ping", addr)).await.unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::OK.as_u16());
}
