//! Request deadlines
//!
//! A deadline is fixed when the request enters the pipeline and bounds every
//! external call made on its behalf, together with that call's own timeout.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::errors::{RagError, Result};

/// Optional absolute deadline for one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline; calls are bounded only by their own timeouts
    pub fn none() -> Self {
        Self { at: None }
    }

    /// Deadline `duration` from now
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Some(Instant::now() + duration),
        }
    }

    /// Deadline from an optional millisecond budget
    pub fn from_millis(ms: Option<u64>) -> Self {
        ms.map(|ms| Self::after(Duration::from_millis(ms)))
            .unwrap_or_default()
    }

    /// Time left; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().map_or(false, |left| left.is_zero())
    }

    /// The tighter of `limit` and the time left
    pub fn budget(&self, limit: Duration) -> Duration {
        match self.remaining() {
            Some(left) => left.min(limit),
            None => limit,
        }
    }

    /// Run `fut` bounded by `limit` and this deadline
    ///
    /// Expiry of the call's own limit maps to `Timeout`, expiry of the
    /// request deadline to `DeadlineExceeded`.
    pub async fn bound<F, T>(&self, limit: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_expired() {
            return Err(RagError::DeadlineExceeded);
        }

        let budget = self.budget(limit);
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) if self.is_expired() => Err(RagError::DeadlineExceeded),
            Err(_) => Err(RagError::Timeout {
                duration_ms: budget.as_millis() as u64,
            }),
        }
    }
}
