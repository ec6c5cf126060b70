//! Bounded retry with a fixed backoff schedule
//!
//! Operations that fail with a transient error are retried after each delay
//! in the schedule; the default schedule waits one time unit, then three,
//! before giving up. Errors that are not transient are returned immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::storage::StorageError;

/// Errors that can tell whether another attempt may succeed
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        StorageError::is_transient(self)
    }
}

/// Delays between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Wait `unit`, then `3 * unit`
    pub fn from_unit(unit: Duration) -> Self {
        Self {
            delays: vec![unit, unit * 3],
        }
    }

    /// Fail on the first error
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Run `op` until it succeeds, fails permanently or the schedule runs out
    ///
    /// `label` only shows up in logs. Dropping the returned future cancels
    /// any pending sleep or attempt.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };

        for (attempt, delay) in self.delays.iter().enumerate() {
            warn!(
                "{label}: transient failure ({err}), retrying in {:?} (attempt {} of {})",
                delay,
                attempt + 1,
                self.delays.len()
            );
            tokio::time::sleep(*delay).await;

            match op().await {
                Ok(value) => {
                    debug!("{label}: succeeded after {} retries", attempt + 1);
                    return Ok(value);
                }
                Err(next) if !next.is_transient() => return Err(next),
                Err(next) => err = next,
            }
        }

        Err(err)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_unit(Duration::from_secs(1))
    }
}
