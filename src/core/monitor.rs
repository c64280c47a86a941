//! Sync and rollback telemetry.
//!
//! One aggregator instance is shared by the coordinator, the executor and the point
//! manager. Every method takes the lock for a short, non-blocking section, so status
//! queries never hold up writers.

use crate::models::config::MonitorConfig;
use crate::models::status::{
    ErrorSummary, MonitorSnapshot, PerformanceSummary, RollbackMetrics, SyncStatus,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct PassSample {
    at: Instant,
    committed: usize,
    failed: usize,
    latency_ms_total: f64,
}

#[derive(Debug, Default)]
struct MonitorState {
    is_active: bool,
    last_sync: Option<DateTime<Utc>>,
    queue_depth: usize,
    error_count: u64,
    /// Front is the most recent.
    recent_errors: VecDeque<String>,
    samples: VecDeque<PassSample>,
    successful_rollbacks: u64,
    failed_rollbacks: u64,
    rollback_time_total_ms: f64,
    total_points: usize,
    memory_usage: usize,
    last_cleanup: Option<DateTime<Utc>>,
}

/// Error, performance and rollback counters.
pub struct SynchronizationMonitor {
    error_capacity: usize,
    window: Duration,
    state: Mutex<MonitorState>,
}

impl SynchronizationMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            error_capacity: config.error_capacity.max(1),
            window: config.window(),
            state: Mutex::new(MonitorState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to the recent-errors ring and bump the error counter.
    pub fn record_error(&self, message: impl Into<String>) {
        let mut state = self.state();
        state.error_count += 1;
        state.recent_errors.push_front(message.into());
        state.recent_errors.truncate(self.error_capacity);
    }

    /// Explicit reset of the error counter and ring.
    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.error_count = 0;
        state.recent_errors.clear();
    }

    pub fn set_active(&self, active: bool) {
        self.state().is_active = active;
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.state().queue_depth = depth;
    }

    /// A batch committed. `latencies` are enqueue-to-commit times per item.
    pub fn record_commit(&self, latencies: &[Duration]) {
        let now = Instant::now();
        let mut state = self.state();
        state.last_sync = Some(Utc::now());
        state.samples.push_back(PassSample {
            at: now,
            committed: latencies.len(),
            failed: 0,
            latency_ms_total: latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum(),
        });
        prune(&mut state.samples, now, self.window);
    }

    /// A batch failed and was not committed.
    pub fn record_failure(&self, items: usize) {
        let now = Instant::now();
        let mut state = self.state();
        state.samples.push_back(PassSample {
            at: now,
            committed: 0,
            failed: items,
            latency_ms_total: 0.0,
        });
        prune(&mut state.samples, now, self.window);
    }

    /// Outcome of a finished rollback operation.
    pub fn record_rollback(&self, success: bool, duration_ms: Option<f64>) {
        let mut state = self.state();
        if success {
            state.successful_rollbacks += 1;
        } else {
            state.failed_rollbacks += 1;
        }
        state.rollback_time_total_ms += duration_ms.unwrap_or(0.0);
    }

    /// Stored point count and bytes, refreshed by the point manager.
    pub fn set_point_gauges(&self, total_points: usize, memory_usage: usize) {
        let mut state = self.state();
        state.total_points = total_points;
        state.memory_usage = memory_usage;
    }

    pub fn record_cleanup(&self, at: DateTime<Utc>) {
        self.state().last_cleanup = Some(at);
    }

    /// Current sync status.
    pub fn status(&self) -> SyncStatus {
        let now = Instant::now();
        let mut state = self.state();
        prune(&mut state.samples, now, self.window);

        let window_secs = self.window.as_secs_f64();
        let committed: usize = state.samples.iter().map(|s| s.committed).sum();
        let failed: usize = state.samples.iter().map(|s| s.failed).sum();
        let latency_total: f64 = state.samples.iter().map(|s| s.latency_ms_total).sum();
        let passes_ok = state.samples.iter().filter(|s| s.failed == 0).count();
        let passes = state.samples.len();

        SyncStatus {
            is_active: state.is_active,
            last_sync: state.last_sync,
            queue_depth: state.queue_depth,
            processing_rate: (committed + failed) as f64 / window_secs,
            errors: ErrorSummary {
                count: state.error_count,
                recent: state.recent_errors.iter().cloned().collect(),
            },
            performance: PerformanceSummary {
                sync_latency: if committed == 0 {
                    0.0
                } else {
                    latency_total / committed as f64
                },
                throughput: committed as f64 / window_secs,
                success_rate: if passes == 0 {
                    1.0
                } else {
                    passes_ok as f64 / passes as f64
                },
            },
        }
    }

    /// Counters and current window figures, for persisting between processes.
    pub fn snapshot(&self) -> MonitorSnapshot {
        let status = self.status();
        let state = self.state();
        MonitorSnapshot {
            recorded_at: Utc::now(),
            last_sync: state.last_sync,
            error_count: state.error_count,
            recent_errors: state.recent_errors.iter().cloned().collect(),
            successful_rollbacks: state.successful_rollbacks,
            failed_rollbacks: state.failed_rollbacks,
            rollback_time_total_ms: state.rollback_time_total_ms,
            last_cleanup: state.last_cleanup,
            processing_rate: status.processing_rate,
            performance: status.performance,
        }
    }

    /// Load counters saved by [`snapshot`](Self::snapshot). Window samples and
    /// point gauges are left as they are.
    pub fn seed(&self, saved: &MonitorSnapshot) {
        let mut state = self.state();
        state.last_sync = saved.last_sync;
        state.error_count = saved.error_count;
        state.recent_errors = saved
            .recent_errors
            .iter()
            .take(self.error_capacity)
            .cloned()
            .collect();
        state.successful_rollbacks = saved.successful_rollbacks;
        state.failed_rollbacks = saved.failed_rollbacks;
        state.rollback_time_total_ms = saved.rollback_time_total_ms;
        state.last_cleanup = saved.last_cleanup;
    }

    /// Rollback counters.
    pub fn metrics(&self) -> RollbackMetrics {
        let state = self.state();
        let finished = state.successful_rollbacks + state.failed_rollbacks;
        RollbackMetrics {
            total_rollback_points: state.total_points,
            successful_rollbacks: state.successful_rollbacks,
            failed_rollbacks: state.failed_rollbacks,
            average_rollback_time: if finished == 0 {
                0.0
            } else {
                state.rollback_time_total_ms / finished as f64
            },
            memory_usage: state.memory_usage,
            last_cleanup: state.last_cleanup,
        }
    }
}

fn prune(samples: &mut VecDeque<PassSample>, now: Instant, window: Duration) {
    while samples
        .front()
        .is_some_and(|s| now.duration_since(s.at) > window)
    {
        samples.pop_front();
    }
}
