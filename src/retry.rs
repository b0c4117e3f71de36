//! Retry manager with fixed backoff
//!
//! Bounded retry strategy for transient failures of external calls:
//! - Max attempts: 3 (first call included)
//! - Backoff: fixed delay between attempts
//! - Total wait: ≤ backoff × (attempts - 1), further capped by the deadline

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::debug;

use crate::capabilities::Deadline;
use crate::errors::{RagError, Result};
use crate::telemetry::{PipelineEvent, TelemetryCollector};

/// Maximum number of attempts, first call included
pub const MAX_ATTEMPTS: u32 = 3;

/// Fixed delay between attempts
const BACKOFF_MS: u64 = 500;

/// Retry manager with fixed backoff
#[derive(Clone)]
pub struct RetryManager {
    /// Maximum attempts
    max_attempts: u32,

    /// Delay between attempts in milliseconds
    backoff_ms: u64,

    /// Label used in logs and telemetry
    operation: String,

    telemetry: Option<TelemetryCollector>,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryManager {
    /// Create new retry manager with default settings
    pub fn new() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_ms: BACKOFF_MS,
            operation: "external call".to_string(),
            telemetry: None,
        }
    }

    /// Create retry manager with custom settings
    pub fn with_config(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ms,
            ..Self::new()
        }
    }

    /// Label retries of this manager in logs and telemetry
    pub fn for_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Report every retry to `telemetry`
    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Execute operation with retry logic
    ///
    /// Stops early on non-retryable errors and when the backoff would run
    /// past `deadline`.
    pub async fn execute_with_retry<F, Fut, T>(&self, deadline: &Deadline, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !self.is_retryable(&e) {
                        return Err(e);
                    }

                    attempt += 1;

                    if attempt >= self.max_attempts {
                        return Err(RagError::Generic(format!(
                            "Max retries exceeded after {} attempts: {}",
                            attempt, e
                        )));
                    }

                    let delay = self.backoff();
                    if deadline.remaining().map_or(false, |left| left <= delay) {
                        return Err(RagError::DeadlineExceeded);
                    }

                    debug!(operation = %self.operation, attempt, error = %e, "retrying after transient failure");
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record(PipelineEvent::RetryAttempt {
                            operation: self.operation.clone(),
                            attempt,
                            timestamp: Instant::now(),
                        });
                    }

                    sleep(delay).await;
                }
            }
        }
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Calculate total maximum wait time
    pub fn max_total_wait_time(&self) -> Duration {
        Duration::from_millis(self.backoff_ms * u64::from(self.max_attempts.saturating_sub(1)))
    }

    /// Check if error is retryable
    fn is_retryable(&self, error: &RagError) -> bool {
        match error {
            // Retryable errors (transient)
            RagError::Timeout { .. } => true,
            RagError::HttpError(_) => true,
            RagError::RetrieverUnavailable { .. } => true,
            RagError::EmbeddingUnavailable(_) => true,
            RagError::ModelError(_) => true,

            // Non-retryable errors (permanent or out of time)
            RagError::DeadlineExceeded => false,
            RagError::ConfigError(_) => false,
            RagError::SerializationError(_) => false,
            RagError::ChunkStoreUnavailable(_) => false,

            // Generic errors: retry by default
            RagError::Generic(_) => true,

            // Other errors: don't retry
            _ => false,
        }
    }

    /// Get max attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
