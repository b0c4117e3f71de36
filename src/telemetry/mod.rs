//! Telemetry for the retrieval pipeline
//!
//! Degradation (a retriever going down, a rerank tier falling through, a
//! context being truncated) is reported here and in `tracing` logs, never in
//! the values the pipeline returns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::rag::reranking::RerankTier;

/// Maximum events retained before the oldest are dropped
const MAX_EVENTS: usize = 1024;

/// Telemetry event types
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    // Retrieval events
    RetrievalCompleted {
        retriever: String,
        hits: usize,
        duration_ms: u64,
        timestamp: Instant,
    },
    RetrieverDegraded {
        retriever: String,
        reason: String,
        timestamp: Instant,
    },
    IndexRebuilt {
        chunks: usize,
        duration_ms: u64,
        timestamp: Instant,
    },

    // Rerank events
    RerankTierFailed {
        tier: RerankTier,
        reason: String,
        timestamp: Instant,
    },
    RerankTierServed {
        tier: RerankTier,
        candidates: usize,
        timestamp: Instant,
    },
    RetryAttempt {
        operation: String,
        attempt: u32,
        timestamp: Instant,
    },

    // Assembly events
    ContextTruncated {
        chunk_id: String,
        timestamp: Instant,
    },
    DeadlineExpired {
        stage: String,
        timestamp: Instant,
    },
}

/// Telemetry statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub retrievals: usize,
    pub degraded_retrievals: usize,
    pub index_rebuilds: usize,
    pub rerank_tier_failures: usize,
    pub served_by_remote: usize,
    pub served_by_local: usize,
    pub served_by_rules: usize,
    pub retry_attempts: usize,
    pub truncations: usize,
    pub deadline_expirations: usize,
    pub last_rerank_tier: Option<RerankTier>,
}

/// Telemetry collector
#[derive(Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<VecDeque<PipelineEvent>>>,
    stats: Arc<Mutex<PipelineStats>>,
    start_time: Instant,
}

impl TelemetryCollector {
    /// Create a new telemetry collector
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_EVENTS))),
            stats: Arc::new(Mutex::new(PipelineStats::default())),
            start_time: Instant::now(),
        }
    }

    /// Record an event
    pub fn record(&self, event: PipelineEvent) {
        {
            let mut stats = lock(&self.stats);
            match &event {
                PipelineEvent::RetrievalCompleted { .. } => {
                    stats.retrievals += 1;
                }
                PipelineEvent::RetrieverDegraded { .. } => {
                    stats.degraded_retrievals += 1;
                }
                PipelineEvent::IndexRebuilt { .. } => {
                    stats.index_rebuilds += 1;
                }
                PipelineEvent::RerankTierFailed { .. } => {
                    stats.rerank_tier_failures += 1;
                }
                PipelineEvent::RerankTierServed { tier, .. } => {
                    match tier {
                        RerankTier::Remote => stats.served_by_remote += 1,
                        RerankTier::LocalCrossEncoder => stats.served_by_local += 1,
                        RerankTier::RuleBased => stats.served_by_rules += 1,
                    }
                    stats.last_rerank_tier = Some(*tier);
                }
                PipelineEvent::RetryAttempt { .. } => {
                    stats.retry_attempts += 1;
                }
                PipelineEvent::ContextTruncated { .. } => {
                    stats.truncations += 1;
                }
                PipelineEvent::DeadlineExpired { .. } => {
                    stats.deadline_expirations += 1;
                }
            }
        }

        let mut events = lock(&self.events);
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Get current statistics
    pub fn get_stats(&self) -> PipelineStats {
        lock(&self.stats).clone()
    }

    /// Tier that served the most recent rerank
    pub fn last_rerank_tier(&self) -> Option<RerankTier> {
        lock(&self.stats).last_rerank_tier
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }

    /// Get recent events (last n)
    pub fn recent_events(&self, n: usize) -> Vec<PipelineEvent> {
        let events = lock(&self.events);
        let start = events.len().saturating_sub(n);
        events.iter().skip(start).cloned().collect()
    }

    /// Share of retrievals that ran on every configured signal
    pub fn retrieval_health(&self) -> f64 {
        let stats = lock(&self.stats);
        if stats.retrievals == 0 {
            1.0
        } else {
            let healthy = stats.retrievals.saturating_sub(stats.degraded_retrievals);
            healthy as f64 / stats.retrievals as f64
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Install a global fmt subscriber
///
/// `RUST_LOG` takes precedence over `default_level`. Calling this twice is
/// harmless; the second install is ignored.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_creation() {
        let collector = TelemetryCollector::new();
        assert_eq!(collector.event_count(), 0);
        assert!(collector.last_rerank_tier().is_none());
        assert_eq!(collector.retrieval_health(), 1.0);
    }

    #[test]
    fn test_record_tier_served() {
        let collector = TelemetryCollector::new();
        collector.record(PipelineEvent::RerankTierServed {
            tier: RerankTier::Remote,
            candidates: 4,
            timestamp: Instant::now(),
        });
        collector.record(PipelineEvent::RerankTierServed {
            tier: RerankTier::RuleBased,
            candidates: 4,
            timestamp: Instant::now(),
        });

        let stats = collector.get_stats();
        assert_eq!(stats.served_by_remote, 1);
        assert_eq!(stats.served_by_rules, 1);
        assert_eq!(collector.last_rerank_tier(), Some(RerankTier::RuleBased));
    }

    #[test]
    fn test_retrieval_health() {
        let collector = TelemetryCollector::new();
        for _ in 0..4 {
            collector.record(PipelineEvent::RetrievalCompleted {
                retriever: "hybrid".to_string(),
                hits: 3,
                duration_ms: 1,
                timestamp: Instant::now(),
            });
        }
        collector.record(PipelineEvent::RetrieverDegraded {
            retriever: "vector".to_string(),
            reason: "timeout".to_string(),
            timestamp: Instant::now(),
        });

        assert!((collector.retrieval_health() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_recent_events() {
        let collector = TelemetryCollector::new();
        for i in 0..10 {
            collector.record(PipelineEvent::ContextTruncated {
                chunk_id: format!("chunk{}", i),
                timestamp: Instant::now(),
            });
        }

        let recent = collector.recent_events(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(collector.get_stats().truncations, 10);
    }

    #[test]
    fn test_event_log_is_bounded() {
        let collector = TelemetryCollector::new();
        for i in 0..(MAX_EVENTS + 10) {
            collector.record(PipelineEvent::RetryAttempt {
                operation: "rerank".to_string(),
                attempt: i as u32,
                timestamp: Instant::now(),
            });
        }
        assert_eq!(collector.event_count(), MAX_EVENTS);
        assert_eq!(collector.get_stats().retry_attempts, MAX_EVENTS + 10);

        let oldest = collector.recent_events(MAX_EVENTS);
        assert!(matches!(oldest[0], PipelineEvent::RetryAttempt { attempt: 10, .. }));
        let newest = collector.recent_events(1);
        assert!(matches!(
            newest[0],
            PipelineEvent::RetryAttempt { attempt, .. } if attempt as usize == MAX_EVENTS + 9
        ));
    }

    #[test]
    fn test_clones_share_state() {
        let collector = TelemetryCollector::new();
        let clone = collector.clone();
        clone.record(PipelineEvent::DeadlineExpired {
            stage: "rerank".to_string(),
            timestamp: Instant::now(),
        });
        assert_eq!(collector.get_stats().deadline_expirations, 1);
    }
}
