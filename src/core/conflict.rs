//! Conflict detection and resolution.
//!
//! Before a restore entry is applied, the live value is re-read and compared with
//! the value the restore plan assumed. A disagreement is a conflict, settled by one
//! of a small closed set of strategies. The only extension points are a merge
//! function and a channel for deferred (ask-user) decisions.

use crate::core::adapter::StoreAdapters;
use crate::core::diff::shape_of;
use crate::models::conflict::{ConflictType, ConflictStrategy, Decision, Resolution, RollbackConflict};
use crate::models::diff::{DiffEntry, DiffOperation};
use crate::models::operation::{LogLevel, RollbackLogEntry};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Merge of `(current, rollback)` into the value to write.
pub type MergeFn =
    Arc<dyn Fn(Option<&Value>, Option<&Value>) -> std::result::Result<Option<Value>, String> + Send + Sync>;

/// A conflict waiting for an external decision.
#[derive(Debug)]
pub struct DecisionRequest {
    pub operation_id: String,
    pub conflict: RollbackConflict,
    pub reply: oneshot::Sender<Decision>,
}

/// Detects and resolves restore conflicts.
pub struct ConflictResolver {
    adapters: StoreAdapters,
    merge: Option<MergeFn>,
    decisions: Option<mpsc::Sender<DecisionRequest>>,
    decision_timeout: Duration,
}

impl ConflictResolver {
    pub fn new(adapters: StoreAdapters, decision_timeout: Duration) -> Self {
        Self {
            adapters,
            merge: None,
            decisions: None,
            decision_timeout,
        }
    }

    /// Install the merge function used by [`ConflictStrategy::Merge`].
    pub fn with_merge(mut self, merge: MergeFn) -> Self {
        self.merge = Some(merge);
        self
    }

    /// Route ask-user conflicts to `tx`.
    pub fn with_decisions(mut self, tx: mpsc::Sender<DecisionRequest>) -> Self {
        self.decisions = Some(tx);
        self
    }

    /// Conflicts of every entry, in order.
    pub async fn detect(&self, entries: &[DiffEntry]) -> Result<Vec<RollbackConflict>> {
        let mut conflicts = Vec::new();
        for entry in entries {
            if let Some(conflict) = self.detect_entry(entry).await? {
                conflicts.push(conflict);
            }
        }
        Ok(conflicts)
    }

    /// Re-read live state for one entry and compare it with the assumed value.
    ///
    /// Creates are not checked. Moves are checked at their source path, and a
    /// destination that is already occupied is a dependency conflict.
    pub async fn detect_entry(&self, entry: &DiffEntry) -> Result<Option<RollbackConflict>> {
        let source_path = match entry.operation {
            DiffOperation::Create => return Ok(None),
            DiffOperation::Update | DiffOperation::Delete => entry.path.as_str(),
            DiffOperation::Move => entry.moved_from().unwrap_or(entry.path.as_str()),
        };

        let live = match self.read(entry, source_path).await? {
            Ok(value) => value,
            Err(denied) => return Ok(Some(denied)),
        };
        if let Some(conflict_type) = classify(&entry.old_value, &live) {
            return Ok(Some(RollbackConflict {
                path: source_path.to_string(),
                kind: entry.kind,
                conflict_type,
                current_value: live,
                rollback_value: entry.new_value.clone(),
                context: Some(json!({ "expected": entry.old_value, "operation": entry.operation })),
            }));
        }

        if entry.operation == DiffOperation::Move {
            let occupant = match self.read(entry, &entry.path).await? {
                Ok(value) => value,
                Err(denied) => return Ok(Some(denied)),
            };
            if occupant.is_some() {
                return Ok(Some(RollbackConflict {
                    path: entry.path.clone(),
                    kind: entry.kind,
                    conflict_type: ConflictType::DependencyConflict,
                    current_value: occupant,
                    rollback_value: entry.new_value.clone(),
                    context: Some(json!({ "reason": "move destination occupied", "from": source_path })),
                }));
            }
        }
        Ok(None)
    }

    /// Read `path`, turning a permission failure into a conflict.
    async fn read(
        &self,
        entry: &DiffEntry,
        path: &str,
    ) -> Result<std::result::Result<Option<Value>, RollbackConflict>> {
        let adapter = self.adapters.for_kind(entry.kind)?;
        match adapter.read(path).await {
            Ok(value) => Ok(Ok(value)),
            Err(crate::Error::PermissionDenied(reason)) => Ok(Err(RollbackConflict {
                path: path.to_string(),
                kind: entry.kind,
                conflict_type: ConflictType::PermissionDenied,
                current_value: None,
                rollback_value: entry.new_value.clone(),
                context: Some(json!({ "reason": reason })),
            })),
            Err(e) => Err(e),
        }
    }

    /// Settle one conflict under `strategy`, appending one log entry unless deferred.
    pub fn resolve(
        &self,
        conflict: &RollbackConflict,
        strategy: ConflictStrategy,
        log: &mut Vec<RollbackLogEntry>,
    ) -> Resolution {
        match strategy {
            ConflictStrategy::Abort => {
                log.push(conflict_log(LogLevel::Error, conflict, "abort"));
                Resolution::Abort
            }
            ConflictStrategy::Skip => {
                tracing::warn!(path = %conflict.path, kind = %conflict.conflict_type, "conflict skipped");
                log.push(conflict_log(LogLevel::Warn, conflict, "skip"));
                Resolution::Skip
            }
            ConflictStrategy::Overwrite => {
                log.push(conflict_log(LogLevel::Info, conflict, "overwrite"));
                Resolution::Apply(conflict.rollback_value.clone())
            }
            ConflictStrategy::Merge => {
                let Some(merge) = self.merge.as_ref() else {
                    log.push(conflict_log(LogLevel::Error, conflict, "merge unavailable, abort"));
                    return Resolution::Abort;
                };
                match merge(conflict.current_value.as_ref(), conflict.rollback_value.as_ref()) {
                    Ok(merged) => {
                        log.push(
                            conflict_log(LogLevel::Info, conflict, "merge")
                                .with_context(json!({ "merged": merged })),
                        );
                        Resolution::Apply(merged)
                    }
                    Err(e) => {
                        tracing::warn!(path = %conflict.path, "merge function failed: {}", e);
                        log.push(
                            conflict_log(LogLevel::Error, conflict, "merge failed, abort")
                                .with_context(json!({ "error": e })),
                        );
                        Resolution::Abort
                    }
                }
            }
            ConflictStrategy::AskUser => Resolution::Deferred,
        }
    }

    /// Wait for an external decision on a deferred conflict.
    ///
    /// No channel, a closed channel or the timeout all resolve to abort.
    pub async fn await_decision(
        &self,
        operation_id: &str,
        conflict: &RollbackConflict,
        log: &mut Vec<RollbackLogEntry>,
    ) -> Resolution {
        let decision = match self.request_decision(operation_id, conflict).await {
            Some(decision) => decision,
            None => {
                tracing::warn!(path = %conflict.path, "no decision received, aborting");
                log.push(conflict_log(LogLevel::Error, conflict, "no decision, abort"));
                return Resolution::Abort;
            }
        };

        match decision {
            Decision::Overwrite => {
                log.push(conflict_log(LogLevel::Info, conflict, "user: overwrite"));
                Resolution::Apply(conflict.rollback_value.clone())
            }
            Decision::Skip => {
                log.push(conflict_log(LogLevel::Warn, conflict, "user: skip"));
                Resolution::Skip
            }
            Decision::Abort => {
                log.push(conflict_log(LogLevel::Error, conflict, "user: abort"));
                Resolution::Abort
            }
            Decision::Use(value) => {
                log.push(
                    conflict_log(LogLevel::Info, conflict, "user: use value")
                        .with_context(json!({ "value": value })),
                );
                Resolution::Apply(value)
            }
        }
    }

    async fn request_decision(&self, operation_id: &str, conflict: &RollbackConflict) -> Option<Decision> {
        let tx = self.decisions.as_ref()?;
        let (reply, rx) = oneshot::channel();
        let request = DecisionRequest {
            operation_id: operation_id.to_string(),
            conflict: conflict.clone(),
            reply,
        };

        let exchange = async {
            tx.send(request).await.ok()?;
            rx.await.ok()
        };
        tokio::time::timeout(self.decision_timeout, exchange)
            .await
            .ok()
            .flatten()
    }
}

/// Conflict type between the assumed and live values, `None` when they agree.
fn classify(expected: &Option<Value>, live: &Option<Value>) -> Option<ConflictType> {
    match (expected, live) {
        (expected, live) if expected == live => None,
        (_, None) => Some(ConflictType::MissingTarget),
        (Some(expected), Some(live)) if shape_of(expected) != shape_of(live) => {
            Some(ConflictType::TypeMismatch)
        }
        _ => Some(ConflictType::ValueMismatch),
    }
}

fn conflict_log(level: LogLevel, conflict: &RollbackConflict, resolution: &str) -> RollbackLogEntry {
    RollbackLogEntry::new(
        level,
        format!("{} at {}: {}", conflict.conflict_type, conflict.path, resolution),
    )
    .with_path(conflict.path.clone())
    .with_context(json!({
        "type": conflict.conflict_type,
        "currentValue": conflict.current_value,
        "rollbackValue": conflict.rollback_value,
    }))
}
