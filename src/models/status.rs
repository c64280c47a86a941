//! Sync status and rollback metrics, computed on demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response body of the `sync-status` query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_active: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub queue_depth: usize,
    /// Items handled per second over the rolling window.
    pub processing_rate: f64,
    pub errors: ErrorSummary,
    pub performance: PerformanceSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub count: u64,
    /// Most recent first.
    pub recent: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    /// Mean enqueue-to-commit latency in milliseconds.
    pub sync_latency: f64,
    /// Committed items per second.
    pub throughput: f64,
    /// Committed passes over all passes, 0.0-1.0.
    pub success_rate: f64,
}

/// Rollback subsystem counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackMetrics {
    pub total_rollback_points: usize,
    pub successful_rollbacks: u64,
    pub failed_rollbacks: u64,
    /// Milliseconds.
    pub average_rollback_time: f64,
    /// Bytes held by stored snapshots.
    pub memory_usage: usize,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Monitor counters carried between processes.
///
/// Rolling-window figures cannot be rebuilt from counters, so they are kept as
/// they stood at `recorded_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub recorded_at: DateTime<Utc>,
    pub last_sync: Option<DateTime<Utc>>,
    pub error_count: u64,
    /// Most recent first.
    pub recent_errors: Vec<String>,
    pub successful_rollbacks: u64,
    pub failed_rollbacks: u64,
    pub rollback_time_total_ms: f64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub processing_rate: f64,
    pub performance: PerformanceSummary,
}
