//! Rollback operation data model and its lifecycle rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Scope of a rollback operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Restore every captured value.
    Full,
    /// Restore only some snapshot types.
    Partial,
    /// Restore only some paths.
    Selective,
    /// Compute conflicts, apply nothing.
    DryRun,
}

impl FromStr for OperationType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(OperationType::Full),
            "partial" => Ok(OperationType::Partial),
            "selective" => Ok(OperationType::Selective),
            "dry_run" | "dry-run" => Ok(OperationType::DryRun),
            _ => Err(crate::Error::other(format!("Unknown operation type: {}", s))),
        }
    }
}

/// How aggressively a rollback applies its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackStrategy {
    Immediate,
    Gradual,
    Safe,
    Force,
}

impl RollbackStrategy {
    /// Whether cancellation is honoured only before the first write.
    pub fn is_irrevocable(&self) -> bool {
        matches!(self, RollbackStrategy::Immediate | RollbackStrategy::Force)
    }
}

impl fmt::Display for RollbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RollbackStrategy::Immediate => "immediate",
            RollbackStrategy::Gradual => "gradual",
            RollbackStrategy::Safe => "safe",
            RollbackStrategy::Force => "force",
        };
        f.write_str(s)
    }
}

impl FromStr for RollbackStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(RollbackStrategy::Immediate),
            "gradual" => Ok(RollbackStrategy::Gradual),
            "safe" => Ok(RollbackStrategy::Safe),
            "force" => Ok(RollbackStrategy::Force),
            _ => Err(crate::Error::other(format!("Unknown rollback strategy: {}", s))),
        }
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// Forward-only transition table.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        matches!(
            (self, next),
            (OperationStatus::Pending, OperationStatus::InProgress)
                | (OperationStatus::InProgress, OperationStatus::Completed)
                | (OperationStatus::InProgress, OperationStatus::Failed)
                | (OperationStatus::InProgress, OperationStatus::Cancelled)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Severity of an operation log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One line of an operation's diagnostic log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl RollbackLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            path: None,
            context: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// A single rollback, driven by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub target_rollback_point_id: String,
    pub status: OperationStatus,
    /// Percentage of entries processed, 0-100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub strategy: RollbackStrategy,
    pub log: Vec<RollbackLogEntry>,
}

impl RollbackOperation {
    /// Create a pending operation.
    pub fn new(
        target_rollback_point_id: impl Into<String>,
        operation_type: OperationType,
        strategy: RollbackStrategy,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_type,
            target_rollback_point_id: target_rollback_point_id.into(),
            status: OperationStatus::Pending,
            progress: 0,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            strategy,
            log: Vec::new(),
        }
    }

    /// Move to `next`, refusing backward or out-of-table transitions.
    pub fn transition(&mut self, next: OperationStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Raise progress. Lower values are ignored.
    pub fn set_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(100));
    }

    pub fn push_log(&mut self, entry: RollbackLogEntry) {
        self.log.push(entry);
    }

    /// Transition to `completed` at 100%.
    pub fn complete(&mut self) -> crate::Result<()> {
        self.transition(OperationStatus::Completed)?;
        self.set_progress(100);
        Ok(())
    }

    /// Transition to `failed` with `error` populated. Progress is left where it stopped.
    pub fn fail(&mut self, error: impl Into<String>) -> crate::Result<()> {
        let error = error.into();
        self.transition(OperationStatus::Failed)?;
        self.push_log(RollbackLogEntry::new(LogLevel::Error, error.clone()));
        self.error = Some(error);
        Ok(())
    }

    pub fn cancel(&mut self) -> crate::Result<()> {
        self.transition(OperationStatus::Cancelled)?;
        self.push_log(RollbackLogEntry::new(LogLevel::Warn, "cancelled"));
        Ok(())
    }

    /// Wall time from start to completion, if finished.
    pub fn duration_ms(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0)
    }
}

/// Percentage of `processed` out of `total`, 100 for an empty plan.
pub fn progress_for(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed.min(total) * 100) / total) as u8
}
