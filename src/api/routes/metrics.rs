//! Metric ingestion and query endpoints

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::debug;

use crate::api::{error::ApiResult, state::ApiState};
use crate::storage::MetricPoint;

/// GET /
///
/// Every stored metric, ordered by name
pub async fn list_metrics(State(state): State<ApiState>) -> ApiResult<Json<Vec<MetricPoint>>> {
    let mut points = state.repo.all().await?;
    points.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(points))
}

/// GET /value/:name
pub async fn get_metric(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<MetricPoint>> {
    let point = state.repo.get(&name).await?;
    Ok(Json(point))
}

/// POST /update
///
/// Creates the metric on first sight, merges it afterwards. Returns the
/// stored point. Bodies that do not decode to a point are a 400.
pub async fn update_metric(
    State(state): State<ApiState>,
    payload: Result<Json<MetricPoint>, JsonRejection>,
) -> ApiResult<Json<MetricPoint>> {
    let Json(point) = payload?;
    debug!("update for {}", point.name);
    let stored = state.repo.upsert(point).await?;
    Ok(Json(stored))
}

/// POST /updates
pub async fn update_metrics(
    State(state): State<ApiState>,
    payload: Result<Json<Vec<MetricPoint>>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(points) = payload?;
    debug!("batch update with {} metrics", points.len());
    state.repo.update_batch(points).await?;
    Ok(StatusCode::OK)
}
