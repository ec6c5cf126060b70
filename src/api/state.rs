//! API shared state

use std::sync::Arc;

use crate::storage::MetricRepository;

/// State shared by all handlers
#[derive(Clone)]
pub struct ApiState {
    pub repo: Arc<dyn MetricRepository>,
}

impl ApiState {
    pub fn new(repo: Arc<dyn MetricRepository>) -> Self {
        Self { repo }
    }
}
