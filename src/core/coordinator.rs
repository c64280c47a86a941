//! Sync pass coordination.
//!
//! Pending changes wait in an arrival-ordered queue. A sync pass drains the queue
//! batch by batch:
//! - Capture a rollback point over the batch's keys
//! - Apply each change through its store adapter, retrying transient failures
//! - On a write that keeps failing, restore the batch's point
//!
//! Only one pass runs at a time. A second request is rejected, never queued.

use crate::core::events::{EventBus, EventTopic};
use crate::core::executor::{Baseline, RestoreRequest, RollbackOperationExecutor};
use crate::core::monitor::SynchronizationMonitor;
use crate::core::rollback::{CaptureOptions, RollbackPointManager};
use crate::models::change::{ChangeEvent, SyncOptions};
use crate::models::config::SyncConfig;
use crate::models::operation::{OperationStatus, RollbackStrategy};
use crate::models::rollback::SnapshotKey;
use crate::models::status::SyncStatus;
use crate::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct QueuedChange {
    change: ChangeEvent,
    enqueued_at: Instant,
}

/// Answer to a sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
    Accepted(String),
    AlreadyInProgress(String),
}

impl SyncTrigger {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SyncTrigger::Accepted(_))
    }

    pub fn message(&self) -> &str {
        match self {
            SyncTrigger::Accepted(message) | SyncTrigger::AlreadyInProgress(message) => message,
        }
    }
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub batches: usize,
    /// Changes committed.
    pub applied: usize,
    pub failed_batches: usize,
    /// Failed batches restored to their rollback point.
    pub rolled_back: usize,
    /// Rollback points captured by the pass.
    pub points: Vec<String>,
    /// Changes still queued when the pass ended.
    pub remaining: usize,
}

/// Clears the active flag when a pass ends, however it ends.
struct ActiveGuard {
    flag: Arc<AtomicBool>,
    monitor: Arc<SynchronizationMonitor>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.monitor.set_active(false);
    }
}

/// Drives sync passes over the pending change queue.
pub struct SynchronizationCoordinator {
    config: SyncConfig,
    manager: Arc<RollbackPointManager>,
    executor: Arc<RollbackOperationExecutor>,
    events: EventBus,
    monitor: Arc<SynchronizationMonitor>,
    queue: Mutex<VecDeque<QueuedChange>>,
    active: Arc<AtomicBool>,
    stop: AtomicBool,
}

impl SynchronizationCoordinator {
    pub fn new(
        config: SyncConfig,
        manager: Arc<RollbackPointManager>,
        executor: Arc<RollbackOperationExecutor>,
        events: EventBus,
        monitor: Arc<SynchronizationMonitor>,
    ) -> Self {
        Self {
            config,
            manager,
            executor,
            events,
            monitor,
            queue: Mutex::new(VecDeque::new()),
            active: Arc::new(AtomicBool::new(false)),
            stop: AtomicBool::new(false),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedChange>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a change to the queue.
    pub fn enqueue(&self, change: ChangeEvent) {
        self.enqueue_all(std::iter::once(change));
    }

    /// Append changes in iteration order.
    pub fn enqueue_all(&self, changes: impl IntoIterator<Item = ChangeEvent>) {
        let mut queue = self.queue();
        let now = Instant::now();
        queue.extend(changes.into_iter().map(|change| QueuedChange {
            change,
            enqueued_at: now,
        }));
        self.monitor.set_queue_depth(queue.len());
    }

    pub fn queue_depth(&self) -> usize {
        self.queue().len()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SyncStatus {
        self.monitor.status()
    }

    fn try_begin(&self) -> Option<ActiveGuard> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.stop.store(false, Ordering::SeqCst);
        self.monitor.set_active(true);
        Some(ActiveGuard {
            flag: self.active.clone(),
            monitor: self.monitor.clone(),
        })
    }

    /// Start a pass in the background.
    ///
    /// Rejected with a message containing "already in progress" while another pass
    /// runs. Unready stores are reported before anything is spawned.
    pub async fn start_sync(self: &Arc<Self>, options: SyncOptions) -> Result<SyncTrigger> {
        let Some(guard) = self.try_begin() else {
            tracing::info!("Sync request rejected: a pass is already running");
            return Ok(SyncTrigger::AlreadyInProgress(
                "Sync already in progress".to_string(),
            ));
        };
        if let Err(e) = self.manager.ensure_ready().await {
            self.report_failure(&e);
            return Err(e);
        }

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = coordinator.pass(options).await {
                tracing::error!("Sync pass failed: {}", e);
            }
        });
        Ok(SyncTrigger::Accepted(format!(
            "Sync started with {} queued change(s)",
            self.queue_depth()
        )))
    }

    /// Run a pass on the current task.
    pub async fn run_pass(&self, options: SyncOptions) -> Result<PassReport> {
        let _guard = self.try_begin().ok_or_else(|| {
            crate::Error::AlreadyActive("sync pass already in progress".to_string())
        })?;
        if let Err(e) = self.manager.ensure_ready().await {
            self.report_failure(&e);
            return Err(e);
        }
        self.pass(options).await
    }

    /// Ask the running pass to stop after its current batch. Returns whether a pass
    /// was running.
    pub fn stop_sync(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.stop.store(true, Ordering::SeqCst);
        tracing::info!("Sync stop requested");
        true
    }

    async fn pass(&self, options: SyncOptions) -> Result<PassReport> {
        self.events.emit(
            EventTopic::SyncStarted,
            json!({ "queueDepth": self.queue_depth(), "options": options }),
        );

        let mut report = PassReport::default();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!("Sync pass stopped after {} batch(es)", report.batches);
                break;
            }
            let batch = self.drain(&options);
            if batch.is_empty() {
                break;
            }
            report.batches += 1;
            if let Err(e) = self.run_batch(batch, &mut report).await {
                self.report_failure(&e);
                return Err(e);
            }
        }

        report.remaining = self.queue_depth();
        tracing::info!(
            "Sync pass finished: {} batch(es), {} applied, {} rolled back",
            report.batches,
            report.applied,
            report.rolled_back
        );
        self.events.emit(EventTopic::SyncCompleted, json!(report));
        Ok(report)
    }

    /// Take the next batch in arrival order. Excluded categories stay queued.
    fn drain(&self, options: &SyncOptions) -> Vec<QueuedChange> {
        let limit = if options.force {
            usize::MAX
        } else {
            self.config.batch_size.max(1)
        };

        let mut queue = self.queue();
        let mut batch = Vec::new();
        let mut kept = VecDeque::with_capacity(queue.len());
        while let Some(item) = queue.pop_front() {
            if batch.len() < limit && options.includes(item.change.category) {
                batch.push(item);
            } else {
                kept.push_back(item);
            }
        }
        *queue = kept;
        self.monitor.set_queue_depth(queue.len());
        batch
    }

    fn requeue_front(&self, batch: Vec<QueuedChange>) {
        let mut queue = self.queue();
        for item in batch.into_iter().rev() {
            queue.push_front(item);
        }
        self.monitor.set_queue_depth(queue.len());
    }

    async fn run_batch(&self, batch: Vec<QueuedChange>, report: &mut PassReport) -> Result<()> {
        let keys: Vec<SnapshotKey> = batch.iter().map(|item| item.change.key.clone()).collect();
        let mut metadata = BTreeMap::new();
        metadata.insert("changeCount".to_string(), json!(batch.len()));
        let options = CaptureOptions {
            name: Some(format!("sync-batch-{}", report.batches)),
            description: Some(format!("Before sync batch of {} change(s)", batch.len())),
            metadata,
            ..Default::default()
        };

        let point = match self.manager.capture_with(&keys, options).await {
            Ok(point) => point,
            Err(e) => {
                tracing::warn!("Capture failed, batch returned to queue: {}", e);
                self.requeue_front(batch);
                return Err(e);
            }
        };
        report.points.push(point.id.clone());

        let mut written: Vec<(SnapshotKey, Option<Value>)> = Vec::with_capacity(batch.len());
        for item in &batch {
            let change = &item.change;
            if let Err(e) = self.write_with_retry(change).await {
                let cause = format!("change {} on {} failed: {}", change.id, change.key, e);
                tracing::warn!("{}", cause);
                self.monitor.record_failure(batch.len());
                report.failed_batches += 1;

                self.roll_back(&point.id, &written, &cause).await?;
                report.rolled_back += 1;
                return Ok(());
            }
            written.push((change.key.clone(), change.mutation.target_value()));
        }

        let latencies: Vec<Duration> = batch.iter().map(|item| item.enqueued_at.elapsed()).collect();
        self.monitor.record_commit(&latencies);
        report.applied += batch.len();
        tracing::debug!(point_id = %point.id, changes = batch.len(), "sync batch committed");
        Ok(())
    }

    /// Restore `point_id`, assuming live state is the point overlaid with `written`.
    async fn roll_back(
        &self,
        point_id: &str,
        written: &[(SnapshotKey, Option<Value>)],
        cause: &str,
    ) -> Result<()> {
        let sync_failed = |rollback: String| crate::Error::SyncFailed {
            cause: cause.to_string(),
            rollback,
        };

        let record = self
            .manager
            .load(point_id)
            .await
            .map_err(|e| sync_failed(e.to_string()))?;
        let mut expected: HashMap<SnapshotKey, Option<Value>> = record.values().into_iter().collect();
        expected.extend(written.iter().cloned());

        let request = RestoreRequest::new(RollbackStrategy::Safe)
            .with_conflict_strategy(self.config.conflict_strategy)
            .with_baseline(Baseline::Values(expected));
        let op = self
            .executor
            .restore(point_id, request)
            .await
            .map_err(|e| sync_failed(e.to_string()))?;
        if op.status != OperationStatus::Completed {
            return Err(sync_failed(format!("rollback operation {} {}", op.id, op.status)));
        }

        tracing::info!("Sync batch rolled back to point {}", point_id);
        self.monitor
            .record_error(format!("sync batch rolled back to {}: {}", point_id, cause));
        Ok(())
    }

    async fn write_with_retry(&self, change: &ChangeEvent) -> Result<()> {
        let adapters = self.manager.adapters();
        let mut attempt = 0;
        loop {
            match adapters
                .write(&change.key, change.mutation.target_value())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.config.max_write_retries => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    tracing::debug!(
                        "Write of {} failed ({}), retry {} in {:?}",
                        change.key,
                        e,
                        attempt,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn report_failure(&self, error: &crate::Error) {
        self.monitor.record_error(error.to_string());
        self.events
            .emit(EventTopic::SyncFailed, json!({ "error": error.to_string() }));
    }
}
