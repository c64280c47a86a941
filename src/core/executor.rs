//! Rollback operation executor.
//!
//! Restores a rollback point through the operation lifecycle:
//! - Plans the restore as a diff from the assumed live state to the point
//! - Re-checks every entry against live state and settles conflicts
//! - Applies entries according to the rollback strategy
//!
//! Operations are kept in an in-memory registry. At most one non-terminal operation
//! may target a given rollback point.

use crate::core::conflict::ConflictResolver;
use crate::core::diff;
use crate::core::events::{EventBus, EventTopic};
use crate::core::monitor::SynchronizationMonitor;
use crate::core::rollback::RollbackPointManager;
use crate::models::conflict::{ConflictStrategy, Resolution, RollbackConflict};
use crate::models::diff::DiffEntry;
use crate::models::operation::{
    progress_for, LogLevel, OperationStatus, OperationType, RollbackLogEntry, RollbackOperation,
    RollbackStrategy,
};
use crate::models::rollback::{PointRecord, SnapshotKey, SnapshotType};
use crate::Result;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// State a restore plan assumes is live.
#[derive(Debug, Clone, Default)]
pub enum Baseline {
    /// Read the live values when the operation is started.
    #[default]
    Live,
    /// Values captured by another rollback point.
    Point(String),
    /// Caller-known values. Keys missing from the map are assumed absent.
    Values(HashMap<SnapshotKey, Option<Value>>),
}

/// Parameters of one restore.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub operation_type: OperationType,
    pub strategy: RollbackStrategy,
    pub conflict_strategy: ConflictStrategy,
    pub baseline: Baseline,
    /// Snapshot types restored by a partial operation.
    pub kinds: Vec<SnapshotType>,
    /// Paths restored by a selective operation.
    pub paths: Vec<String>,
}

impl Default for RestoreRequest {
    fn default() -> Self {
        Self {
            operation_type: OperationType::Full,
            strategy: RollbackStrategy::Safe,
            conflict_strategy: ConflictStrategy::Abort,
            baseline: Baseline::Live,
            kinds: Vec::new(),
            paths: Vec::new(),
        }
    }
}

impl RestoreRequest {
    pub fn new(strategy: RollbackStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn with_conflict_strategy(mut self, conflict_strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = conflict_strategy;
        self
    }

    pub fn with_baseline(mut self, baseline: Baseline) -> Self {
        self.baseline = baseline;
        self
    }

    /// Restore only entries of the given snapshot types.
    pub fn partial(mut self, kinds: Vec<SnapshotType>) -> Self {
        self.operation_type = OperationType::Partial;
        self.kinds = kinds;
        self
    }

    /// Restore only entries at the given paths.
    pub fn selective(mut self, paths: Vec<String>) -> Self {
        self.operation_type = OperationType::Selective;
        self.paths = paths;
        self
    }

    /// Detect and log conflicts without applying anything.
    pub fn dry_run(mut self) -> Self {
        self.operation_type = OperationType::DryRun;
        self
    }

    fn includes(&self, entry: &DiffEntry) -> bool {
        match self.operation_type {
            OperationType::Full | OperationType::DryRun => true,
            OperationType::Partial => self.kinds.contains(&entry.kind),
            OperationType::Selective => self
                .paths
                .iter()
                .any(|p| *p == entry.path || entry.moved_from() == Some(p.as_str())),
        }
    }
}

struct Plan {
    request: RestoreRequest,
    entries: Vec<DiffEntry>,
}

struct OperationSlot {
    operation: RollbackOperation,
    /// Present until the operation is executed.
    plan: Option<Plan>,
    cancel: CancellationToken,
}

/// Why an operation stopped before completing.
enum Halt {
    Cancelled,
    Conflict(Vec<RollbackConflict>),
    Failed(String),
}

enum Action {
    Write(Option<Value>),
    Skip,
}

#[derive(Debug, Default)]
struct RunStats {
    applied: usize,
    skipped: usize,
    conflicts: usize,
}

/// Executes rollback operations against the live stores.
pub struct RollbackOperationExecutor {
    manager: Arc<RollbackPointManager>,
    resolver: Arc<ConflictResolver>,
    events: EventBus,
    monitor: Arc<SynchronizationMonitor>,
    registry: Mutex<HashMap<String, OperationSlot>>,
}

impl RollbackOperationExecutor {
    pub fn new(
        manager: Arc<RollbackPointManager>,
        resolver: Arc<ConflictResolver>,
        events: EventBus,
        monitor: Arc<SynchronizationMonitor>,
    ) -> Self {
        Self {
            manager,
            resolver,
            events,
            monitor,
            registry: Mutex::new(HashMap::new()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, OperationSlot>> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plan a restore of `target_id` and register it as a pending operation.
    ///
    /// Missing, expired or corrupt points and unready stores are rejected before any
    /// operation record exists.
    pub async fn start(&self, target_id: &str, request: RestoreRequest) -> Result<String> {
        self.ensure_idle(target_id)?;
        self.manager.ensure_ready().await?;
        let record = self.manager.restore_source(target_id).await?;
        let entries = self.plan(&record, &request).await?;

        let operation = RollbackOperation::new(target_id, request.operation_type, request.strategy);
        let operation_id = operation.id.clone();
        {
            let mut registry = self.registry();
            if let Some(active) = active_on(&registry, target_id) {
                return Err(crate::Error::AlreadyActive(format!(
                    "rollback point {} is targeted by operation {}",
                    target_id, active
                )));
            }
            registry.insert(
                operation_id.clone(),
                OperationSlot {
                    operation,
                    plan: Some(Plan { request, entries }),
                    cancel: CancellationToken::new(),
                },
            );
        }

        tracing::info!(operation_id = %operation_id, target = target_id, "rollback operation registered");
        Ok(operation_id)
    }

    /// Run a pending operation to a terminal state.
    pub async fn execute(&self, operation_id: &str) -> Result<RollbackOperation> {
        let (mut op, plan, cancel) = {
            let mut registry = self.registry();
            let slot = registry
                .get_mut(operation_id)
                .ok_or_else(|| crate::Error::OperationNotFound(operation_id.to_string()))?;
            let plan = slot.plan.take().ok_or_else(|| crate::Error::InvalidTransition {
                from: slot.operation.status.to_string(),
                to: OperationStatus::InProgress.to_string(),
            })?;
            slot.operation.transition(OperationStatus::InProgress)?;
            (slot.operation.clone(), plan, slot.cancel.clone())
        };

        tracing::info!(
            "Executing rollback {} of point {} ({} entries, strategy {})",
            op.id,
            op.target_rollback_point_id,
            plan.entries.len(),
            op.strategy
        );
        self.events.emit(
            EventTopic::RollbackStarted,
            json!({
                "operationId": op.id,
                "targetRollbackPointId": op.target_rollback_point_id,
                "type": op.operation_type,
                "strategy": op.strategy,
                "entryCount": plan.entries.len(),
            }),
        );

        let outcome = self.run(&mut op, plan, &cancel).await;
        self.finish(op, outcome)
    }

    /// Start and execute in one call.
    pub async fn restore(&self, target_id: &str, request: RestoreRequest) -> Result<RollbackOperation> {
        let operation_id = self.start(target_id, request).await?;
        self.execute(&operation_id).await
    }

    /// Request cancellation. Returns `false` when the operation already finished.
    ///
    /// A pending operation is cancelled at once. A running one stops at its next
    /// cancellation point; immediate and force operations ignore the request once
    /// they have written.
    pub fn cancel(&self, operation_id: &str) -> Result<bool> {
        let mut registry = self.registry();
        let slot = registry
            .get_mut(operation_id)
            .ok_or_else(|| crate::Error::OperationNotFound(operation_id.to_string()))?;
        if slot.operation.status.is_terminal() {
            return Ok(false);
        }
        slot.cancel.cancel();

        if slot.plan.take().is_some() {
            slot.operation.transition(OperationStatus::InProgress)?;
            slot.operation.cancel()?;
            self.emit_cancelled(&slot.operation);
        }
        tracing::info!(operation_id, "rollback cancellation requested");
        Ok(true)
    }

    pub fn operation(&self, operation_id: &str) -> Option<RollbackOperation> {
        self.registry()
            .get(operation_id)
            .map(|slot| slot.operation.clone())
    }

    /// Every known operation, oldest first.
    pub fn operations(&self) -> Vec<RollbackOperation> {
        let mut operations: Vec<RollbackOperation> = self
            .registry()
            .values()
            .map(|slot| slot.operation.clone())
            .collect();
        operations.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        operations
    }

    /// Targets of non-terminal operations.
    pub fn active_targets(&self) -> HashSet<String> {
        self.registry()
            .values()
            .filter(|slot| !slot.operation.status.is_terminal())
            .map(|slot| slot.operation.target_rollback_point_id.clone())
            .collect()
    }

    fn ensure_idle(&self, target_id: &str) -> Result<()> {
        match active_on(&self.registry(), target_id) {
            Some(active) => Err(crate::Error::AlreadyActive(format!(
                "rollback point {} is targeted by operation {}",
                target_id, active
            ))),
            None => Ok(()),
        }
    }

    /// Diff from the baseline to the point, restricted to the point's keys.
    async fn plan(&self, record: &PointRecord, request: &RestoreRequest) -> Result<Vec<DiffEntry>> {
        let target = record.values();
        let keys: Vec<SnapshotKey> = target.iter().map(|(key, _)| key.clone()).collect();

        let baseline = match &request.baseline {
            Baseline::Live => self.manager.read_live(&keys).await?,
            Baseline::Point(id) => {
                let values: HashMap<SnapshotKey, Option<Value>> =
                    self.manager.load(id).await?.values().into_iter().collect();
                assumed(&keys, &values)
            }
            Baseline::Values(values) => assumed(&keys, values),
        };

        let mut entries: Vec<DiffEntry> = diff::compute(&baseline, &target)
            .into_iter()
            .filter(|entry| request.includes(entry))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn run(
        &self,
        op: &mut RollbackOperation,
        plan: Plan,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunStats, Halt> {
        let Plan { request, entries } = plan;
        let policy = if request.strategy == RollbackStrategy::Force {
            ConflictStrategy::Overwrite
        } else {
            request.conflict_strategy
        };

        if request.operation_type == OperationType::DryRun {
            return self.run_dry(op, &entries, policy).await;
        }
        match request.strategy {
            RollbackStrategy::Safe => self.run_safe(op, &entries, policy, cancel).await,
            strategy => self.run_direct(op, &entries, policy, strategy, cancel).await,
        }
    }

    /// Detect and resolve every entry, apply nothing.
    async fn run_dry(
        &self,
        op: &mut RollbackOperation,
        entries: &[DiffEntry],
        policy: ConflictStrategy,
    ) -> std::result::Result<RunStats, Halt> {
        let mut stats = RunStats::default();
        for (i, entry) in entries.iter().enumerate() {
            if let Some(conflict) = self.detect(op, entry).await? {
                stats.conflicts += 1;
                if self.resolver.resolve(&conflict, policy, &mut op.log) == Resolution::Deferred {
                    op.push_log(
                        RollbackLogEntry::new(
                            LogLevel::Info,
                            format!("{} at {}: awaits a decision", conflict.conflict_type, conflict.path),
                        )
                        .with_path(conflict.path.clone()),
                    );
                }
            }
            self.advance(op, i + 1, entries.len(), false);
        }
        Ok(stats)
    }

    /// Resolve every conflict up front, then apply. Any abort fails the operation
    /// before the first write.
    async fn run_safe(
        &self,
        op: &mut RollbackOperation,
        entries: &[DiffEntry],
        policy: ConflictStrategy,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunStats, Halt> {
        let mut detected = Vec::with_capacity(entries.len());
        for entry in entries {
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            detected.push(self.detect(op, entry).await?);
        }
        let all_conflicts: Vec<RollbackConflict> = detected.iter().flatten().cloned().collect();

        let mut stats = RunStats {
            conflicts: all_conflicts.len(),
            ..Default::default()
        };
        let mut actions = Vec::with_capacity(entries.len());
        for (entry, conflict) in entries.iter().zip(&detected) {
            let action = match conflict {
                None => Action::Write(entry.new_value.clone()),
                Some(conflict) => {
                    let resolution = self.settle(op, conflict, policy, cancel, true).await?;
                    action_for(resolution, conflict)
                        .map_err(|_| Halt::Conflict(all_conflicts.clone()))?
                }
            };
            actions.push(action);
        }

        for (i, (entry, action)) in entries.iter().zip(actions).enumerate() {
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            self.perform(op, entry, action, &mut stats).await?;
            self.advance(op, i + 1, entries.len(), true);
        }
        Ok(stats)
    }

    /// Check and apply entry by entry.
    async fn run_direct(
        &self,
        op: &mut RollbackOperation,
        entries: &[DiffEntry],
        policy: ConflictStrategy,
        strategy: RollbackStrategy,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunStats, Halt> {
        let gradual = !strategy.is_irrevocable();
        let mut stats = RunStats::default();
        let mut written = false;
        let mut cancel_ignored = false;

        for (i, entry) in entries.iter().enumerate() {
            let revocable = gradual || !written;
            if cancel.is_cancelled() {
                if revocable {
                    return Err(Halt::Cancelled);
                }
                if !cancel_ignored {
                    cancel_ignored = true;
                    tracing::warn!(operation_id = %op.id, "cancellation ignored after first write");
                    op.push_log(RollbackLogEntry::new(
                        LogLevel::Warn,
                        format!("cancellation ignored: {} rollback already writing", strategy),
                    ));
                }
            }

            let action = match self.detect(op, entry).await? {
                None => Action::Write(entry.new_value.clone()),
                Some(conflict) => {
                    stats.conflicts += 1;
                    let resolution = self.settle(op, &conflict, policy, cancel, revocable).await?;
                    action_for(resolution, &conflict)?
                }
            };
            if matches!(action, Action::Write(_)) {
                written = true;
            }
            self.perform(op, entry, action, &mut stats).await?;

            self.advance(op, i + 1, entries.len(), gradual);
            if gradual {
                tokio::task::yield_now().await;
            }
        }

        if !gradual {
            self.emit_progress(op, entries.len(), entries.len());
        }
        Ok(stats)
    }

    async fn detect(
        &self,
        op: &RollbackOperation,
        entry: &DiffEntry,
    ) -> std::result::Result<Option<RollbackConflict>, Halt> {
        let conflict = self
            .resolver
            .detect_entry(entry)
            .await
            .map_err(|e| Halt::Failed(format!("conflict check of {} failed: {}", entry.key(), e)))?;

        if let Some(conflict) = &conflict {
            tracing::warn!(
                operation_id = %op.id,
                path = %conflict.path,
                "{} conflict detected",
                conflict.conflict_type
            );
            self.events.emit(
                EventTopic::ConflictDetected,
                json!({ "operationId": op.id, "conflict": conflict }),
            );
        }
        Ok(conflict)
    }

    /// Resolve a conflict, waiting for a decision when the policy defers.
    async fn settle(
        &self,
        op: &mut RollbackOperation,
        conflict: &RollbackConflict,
        policy: ConflictStrategy,
        cancel: &CancellationToken,
        revocable: bool,
    ) -> std::result::Result<Resolution, Halt> {
        let resolution = self.resolver.resolve(conflict, policy, &mut op.log);
        if resolution != Resolution::Deferred {
            return Ok(resolution);
        }

        self.store(op);
        let operation_id = op.id.clone();
        let decision = self.resolver.await_decision(&operation_id, conflict, &mut op.log);
        if !revocable {
            return Ok(decision.await);
        }
        tokio::select! {
            resolution = decision => Ok(resolution),
            _ = cancel.cancelled() => Err(Halt::Cancelled),
        }
    }

    async fn perform(
        &self,
        op: &mut RollbackOperation,
        entry: &DiffEntry,
        action: Action,
        stats: &mut RunStats,
    ) -> std::result::Result<(), Halt> {
        let value = match action {
            Action::Skip => {
                stats.skipped += 1;
                return Ok(());
            }
            Action::Write(value) => value,
        };

        let adapters = self.manager.adapters();
        let written = async {
            adapters.write(&entry.key(), value).await?;
            if let Some(from) = entry.moved_from() {
                adapters.write(&SnapshotKey::new(entry.kind, from), None).await?;
            }
            Ok::<(), crate::Error>(())
        }
        .await;
        if let Err(e) = written {
            return Err(Halt::Failed(format!("write of {} failed: {}", entry.key(), e)));
        }

        stats.applied += 1;
        op.push_log(
            RollbackLogEntry::new(LogLevel::Info, format!("{} {}", entry.operation, entry.key()))
                .with_path(entry.path.clone()),
        );
        Ok(())
    }

    fn advance(&self, op: &mut RollbackOperation, processed: usize, total: usize, emit: bool) {
        op.set_progress(progress_for(processed, total));
        self.store(op);
        if emit {
            self.emit_progress(op, processed, total);
        }
    }

    fn emit_progress(&self, op: &RollbackOperation, processed: usize, total: usize) {
        self.events.emit(
            EventTopic::RollbackProgress,
            json!({
                "operationId": op.id,
                "progress": op.progress,
                "processed": processed,
                "total": total,
            }),
        );
    }

    fn emit_cancelled(&self, op: &RollbackOperation) {
        tracing::info!(operation_id = %op.id, progress = op.progress, "rollback cancelled");
        self.events.emit(
            EventTopic::RollbackCancelled,
            json!({ "operationId": op.id, "progress": op.progress }),
        );
    }

    /// Publish the current operation state to the registry.
    fn store(&self, op: &RollbackOperation) {
        if let Some(slot) = self.registry().get_mut(&op.id) {
            slot.operation = op.clone();
        }
    }

    fn finish(
        &self,
        mut op: RollbackOperation,
        outcome: std::result::Result<RunStats, Halt>,
    ) -> Result<RollbackOperation> {
        let counts = op.operation_type != OperationType::DryRun;
        let result = match outcome {
            Ok(stats) => {
                op.complete()?;
                if counts {
                    self.monitor.record_rollback(true, op.duration_ms());
                }
                tracing::info!(
                    "Rollback {} completed: {} applied, {} skipped, {} conflicts",
                    op.id,
                    stats.applied,
                    stats.skipped,
                    stats.conflicts
                );
                self.events.emit(
                    EventTopic::RollbackCompleted,
                    json!({
                        "operationId": op.id,
                        "targetRollbackPointId": op.target_rollback_point_id,
                        "applied": stats.applied,
                        "skipped": stats.skipped,
                        "conflicts": stats.conflicts,
                        "durationMs": op.duration_ms(),
                    }),
                );
                Ok(())
            }
            Err(Halt::Cancelled) => {
                op.cancel()?;
                self.emit_cancelled(&op);
                Ok(())
            }
            Err(Halt::Conflict(conflicts)) => {
                op.fail(format!("aborted by {} conflict(s)", conflicts.len()))?;
                Err(crate::Error::RollbackConflict {
                    operation_id: op.id.clone(),
                    conflicts,
                })
            }
            Err(Halt::Failed(reason)) => {
                op.fail(reason.clone())?;
                Err(crate::Error::RollbackFailed {
                    operation_id: op.id.clone(),
                    reason,
                })
            }
        };

        if let Err(e) = &result {
            if counts {
                self.monitor.record_rollback(false, op.duration_ms());
            }
            tracing::error!("Rollback {} failed: {}", op.id, e);
            self.events.emit(
                EventTopic::RollbackFailed,
                json!({
                    "operationId": op.id,
                    "targetRollbackPointId": op.target_rollback_point_id,
                    "error": op.error,
                }),
            );
        }

        self.store(&op);
        result.map(|_| op)
    }
}

fn active_on(registry: &HashMap<String, OperationSlot>, target_id: &str) -> Option<String> {
    registry
        .values()
        .find(|slot| {
            !slot.operation.status.is_terminal()
                && slot.operation.target_rollback_point_id == target_id
        })
        .map(|slot| slot.operation.id.clone())
}

fn assumed(
    keys: &[SnapshotKey],
    values: &HashMap<SnapshotKey, Option<Value>>,
) -> Vec<(SnapshotKey, Option<Value>)> {
    keys.iter()
        .map(|key| (key.clone(), values.get(key).cloned().flatten()))
        .collect()
}

fn action_for(
    resolution: Resolution,
    conflict: &RollbackConflict,
) -> std::result::Result<Action, Halt> {
    match resolution {
        Resolution::Apply(value) => Ok(Action::Write(value)),
        Resolution::Skip => Ok(Action::Skip),
        Resolution::Abort | Resolution::Deferred => Err(Halt::Conflict(vec![conflict.clone()])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapter::{MemoryStoreAdapter, StoreAdapters};
    use crate::core::events::drain;
    use crate::core::rollback::CaptureOptions;
    use crate::core::snapshot_store::MemorySnapshotStore;
    use crate::models::config::{MonitorConfig, RollbackConfig};
    use std::time::Duration;

    struct Fixture {
        graph: Arc<MemoryStoreAdapter>,
        manager: Arc<RollbackPointManager>,
        executor: RollbackOperationExecutor,
        events: EventBus,
        monitor: Arc<SynchronizationMonitor>,
    }

    fn fixture() -> Fixture {
        let graph = Arc::new(MemoryStoreAdapter::new("graph"));
        let adapters = StoreAdapters::single(graph.clone());
        let events = EventBus::new(256);
        let monitor = Arc::new(SynchronizationMonitor::new(&MonitorConfig::default()));
        let manager = Arc::new(RollbackPointManager::new(
            RollbackConfig::default(),
            Arc::new(MemorySnapshotStore::new()),
            adapters.clone(),
            events.clone(),
            monitor.clone(),
        ));
        let resolver = Arc::new(ConflictResolver::new(adapters, Duration::from_millis(100)));
        let executor = RollbackOperationExecutor::new(
            manager.clone(),
            resolver,
            events.clone(),
            monitor.clone(),
        );
        Fixture {
            graph,
            manager,
            executor,
            events,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_restore_after_external_change() {
        let f = fixture();
        f.graph.insert("E", json!("v1")).await;
        let point = f
            .manager
            .capture("before sync", &[SnapshotKey::entity("E")])
            .await
            .unwrap();

        f.graph.insert("E", json!("v2")).await;
        let diff = f.manager.diff_live(&point.id).await.unwrap();
        assert_eq!(diff.change_count, 1);

        let request = RestoreRequest::new(RollbackStrategy::Immediate)
            .with_conflict_strategy(ConflictStrategy::Overwrite);
        let op = f.executor.restore(&point.id, request).await.unwrap();

        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.progress, 100);
        assert_eq!(f.graph.get("E").await, Some(json!("v1")));
        assert_eq!(f.monitor.metrics().successful_rollbacks, 1);
    }

    #[tokio::test]
    async fn test_second_operation_on_same_target_is_rejected() {
        let f = fixture();
        f.graph.insert("E", json!(1)).await;
        let point = f.manager.capture("p", &[SnapshotKey::entity("E")]).await.unwrap();

        let first = f
            .executor
            .start(&point.id, RestoreRequest::default())
            .await
            .unwrap();
        let second = f.executor.start(&point.id, RestoreRequest::default()).await;
        assert!(matches!(second, Err(crate::Error::AlreadyActive(_))));
        assert!(f.executor.active_targets().contains(&point.id));

        f.executor.execute(&first).await.unwrap();
        assert!(f.executor.active_targets().is_empty());
        assert!(f.executor.start(&point.id, RestoreRequest::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_point_creates_no_operation() {
        let f = fixture();
        let options = CaptureOptions {
            ttl: Some(chrono::Duration::seconds(-1)),
            ..Default::default()
        };
        let point = f
            .manager
            .capture_with(&[SnapshotKey::entity("E")], options)
            .await
            .unwrap();

        let err = f
            .executor
            .restore(&point.id, RestoreRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::RollbackExpired { .. }));
        assert!(f.executor.operations().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_point_is_not_found() {
        let f = fixture();
        let err = f
            .executor
            .restore("missing", RestoreRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::RollbackNotFound(_)));
    }

    #[tokio::test]
    async fn test_safe_abort_applies_nothing() {
        let f = fixture();
        f.graph.insert("A", json!("a1")).await;
        f.graph.insert("B", json!("b1")).await;
        let point = f
            .manager
            .capture("p", &[SnapshotKey::entity("A"), SnapshotKey::entity("B")])
            .await
            .unwrap();

        f.graph.insert("A", json!("a2")).await;
        f.graph.insert("B", json!("b2")).await;

        // A matches its assumed value, B drifted from it.
        let mut expected = HashMap::new();
        expected.insert(SnapshotKey::entity("A"), Some(json!("a2")));
        expected.insert(SnapshotKey::entity("B"), Some(json!("b-assumed")));
        let request = RestoreRequest::new(RollbackStrategy::Safe)
            .with_baseline(Baseline::Values(expected));

        let err = f.executor.restore(&point.id, request).await.unwrap_err();
        let operation_id = match err {
            crate::Error::RollbackConflict {
                operation_id,
                conflicts,
            } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].path, "B");
                operation_id
            }
            other => panic!("expected RollbackConflict, got {:?}", other),
        };

        assert_eq!(f.graph.get("A").await, Some(json!("a2")));
        assert_eq!(f.graph.get("B").await, Some(json!("b2")));

        let op = f.executor.operation(&operation_id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.error.is_some());
        assert!(op.progress < 100);
        assert_eq!(f.monitor.metrics().failed_rollbacks, 1);
    }

    #[tokio::test]
    async fn test_gradual_progress_is_monotonic() {
        let f = fixture();
        let keys: Vec<SnapshotKey> = (0..4).map(|i| SnapshotKey::entity(format!("E{}", i))).collect();
        for key in &keys {
            f.graph.insert(key.path.clone(), json!("before")).await;
        }
        let point = f.manager.capture("p", &keys).await.unwrap();
        for key in &keys {
            f.graph.insert(key.path.clone(), json!("after")).await;
        }

        let mut rx = f.events.subscribe();
        let op = f
            .executor
            .restore(&point.id, RestoreRequest::new(RollbackStrategy::Gradual))
            .await
            .unwrap();
        assert_eq!(op.status, OperationStatus::Completed);

        let progress: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.topic == EventTopic::RollbackProgress)
            .filter_map(|e| e.payload["progress"].as_u64())
            .collect();
        assert_eq!(progress, vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_cancel_pending_operation() {
        let f = fixture();
        f.graph.insert("E", json!(1)).await;
        let point = f.manager.capture("p", &[SnapshotKey::entity("E")]).await.unwrap();
        f.graph.insert("E", json!(2)).await;

        let operation_id = f
            .executor
            .start(&point.id, RestoreRequest::new(RollbackStrategy::Gradual))
            .await
            .unwrap();
        assert!(f.executor.cancel(&operation_id).unwrap());

        let op = f.executor.operation(&operation_id).unwrap();
        assert_eq!(op.status, OperationStatus::Cancelled);
        assert_eq!(f.graph.get("E").await, Some(json!(2)));
        assert!(!f.executor.cancel(&operation_id).unwrap());
        assert!(f.executor.execute(&operation_id).await.is_err());
    }

    #[tokio::test]
    async fn test_dry_run_applies_nothing() {
        let f = fixture();
        f.graph.insert("E", json!("v1")).await;
        let point = f.manager.capture("p", &[SnapshotKey::entity("E")]).await.unwrap();
        f.graph.insert("E", json!("v2")).await;

        let op = f
            .executor
            .restore(&point.id, RestoreRequest::default().dry_run())
            .await
            .unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.progress, 100);
        assert_eq!(f.graph.get("E").await, Some(json!("v2")));
        assert_eq!(f.monitor.metrics().successful_rollbacks, 0);
    }

    #[tokio::test]
    async fn test_partial_and_selective_filters() {
        let f = fixture();
        let keys = vec![
            SnapshotKey::entity("E"),
            SnapshotKey::relationship("E->F"),
            SnapshotKey::file("src/lib.rs"),
        ];
        for key in &keys {
            f.graph.insert(key.path.clone(), json!("old")).await;
        }
        let point = f.manager.capture("p", &keys).await.unwrap();
        for key in &keys {
            f.graph.insert(key.path.clone(), json!("new")).await;
        }

        let request = RestoreRequest::new(RollbackStrategy::Immediate)
            .partial(vec![SnapshotType::Relationship]);
        f.executor.restore(&point.id, request).await.unwrap();
        assert_eq!(f.graph.get("E->F").await, Some(json!("old")));
        assert_eq!(f.graph.get("E").await, Some(json!("new")));

        let request = RestoreRequest::new(RollbackStrategy::Immediate)
            .selective(vec!["src/lib.rs".to_string()]);
        f.executor.restore(&point.id, request).await.unwrap();
        assert_eq!(f.graph.get("src/lib.rs").await, Some(json!("old")));
        assert_eq!(f.graph.get("E").await, Some(json!("new")));
    }

    #[tokio::test]
    async fn test_database_not_ready_refuses_to_start() {
        let f = fixture();
        f.graph.insert("E", json!(1)).await;
        let point = f.manager.capture("p", &[SnapshotKey::entity("E")]).await.unwrap();
        f.graph.set_ready(false);

        let err = f
            .executor
            .restore(&point.id, RestoreRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::DatabaseNotReady(_)));
        assert!(f.executor.operations().is_empty());
    }
}
