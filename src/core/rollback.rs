//! Rollback point management.
//!
//! Captures checkpoints of affected keys before a mutating pass:
//! - Reads every affected key through its store adapter
//! - Wraps each value in a checksummed snapshot
//! - Persists the point and its snapshots in one store call
//!
//! Also computes diffs between points and evicts expired or surplus points.

use crate::core::adapter::StoreAdapters;
use crate::core::diff;
use crate::core::events::{EventBus, EventTopic};
use crate::core::monitor::SynchronizationMonitor;
use crate::core::snapshot_store::SnapshotStore;
use crate::models::config::RollbackConfig;
use crate::models::diff::RollbackDiff;
use crate::models::rollback::{PointRecord, RollbackPoint, Snapshot, SnapshotKey};
use crate::utils::hash;
use crate::Result;
use chrono::Utc;
use futures::future::try_join_all;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Descriptive fields of a new point.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub session_id: Option<String>,
    /// Overrides the configured TTL.
    pub ttl: Option<chrono::Duration>,
}

/// Outcome of one eviction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    /// Points that qualified but are targeted by a live operation.
    pub deferred: Vec<String>,
}

/// Owner of rollback points and their snapshots.
pub struct RollbackPointManager {
    config: RollbackConfig,
    store: Arc<dyn SnapshotStore>,
    adapters: StoreAdapters,
    events: EventBus,
    monitor: Arc<SynchronizationMonitor>,
    /// Serializes point creation and eviction.
    maintenance: Mutex<()>,
}

impl RollbackPointManager {
    pub fn new(
        config: RollbackConfig,
        store: Arc<dyn SnapshotStore>,
        adapters: StoreAdapters,
        events: EventBus,
        monitor: Arc<SynchronizationMonitor>,
    ) -> Self {
        Self {
            config,
            store,
            adapters,
            events,
            monitor,
            maintenance: Mutex::new(()),
        }
    }

    pub fn adapters(&self) -> &StoreAdapters {
        &self.adapters
    }

    pub fn config(&self) -> &RollbackConfig {
        &self.config
    }

    /// Fail with `DatabaseNotReady` when readiness is required and a store is down.
    pub async fn ensure_ready(&self) -> Result<()> {
        if self.config.require_database_ready {
            self.adapters.ensure_ready().await?;
        }
        Ok(())
    }

    /// Capture the current values of `keys` into a new point.
    pub async fn capture(&self, description: &str, keys: &[SnapshotKey]) -> Result<RollbackPoint> {
        self.capture_with(
            keys,
            CaptureOptions {
                description: Some(description.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Capture with explicit point fields.
    ///
    /// All-or-nothing: if any read fails, nothing is persisted and no point exists.
    pub async fn capture_with(
        &self,
        keys: &[SnapshotKey],
        options: CaptureOptions,
    ) -> Result<RollbackPoint> {
        self.ensure_ready().await?;

        let mut seen = HashSet::new();
        let keys: Vec<&SnapshotKey> = keys.iter().filter(|k| seen.insert(*k)).collect();

        let values = try_join_all(keys.iter().map(|key| async move {
            self.adapters.read(key).await.map_err(|e| {
                crate::Error::CaptureFailed(format!("read of {} failed: {}", key, e))
            })
        }))
        .await?;

        let point_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut snapshots = Vec::with_capacity(keys.len());
        for (key, data) in keys.iter().zip(values) {
            let size = hash::canonical_bytes(&data).len();
            if size > self.config.max_snapshot_size {
                return Err(crate::Error::CaptureFailed(format!(
                    "snapshot of {} is {} bytes (max {})",
                    key, size, self.config.max_snapshot_size
                )));
            }
            snapshots.push(Snapshot {
                id: Uuid::new_v4().to_string(),
                rollback_point_id: point_id.clone(),
                snapshot_type: key.kind,
                path: key.path.clone(),
                checksum: Some(hash::checksum(&data)),
                data,
                size,
                created_at: now,
            });
        }

        let ttl = options.ttl.or_else(|| self.config.default_ttl());
        let point = RollbackPoint {
            id: point_id.clone(),
            name: options
                .name
                .unwrap_or_else(|| format!("checkpoint-{}", now.format("%Y%m%d-%H%M%S"))),
            timestamp: now,
            description: options.description,
            metadata: options.metadata,
            session_id: options.session_id,
            expires_at: ttl.map(|ttl| now + ttl),
            snapshot_ids: snapshots.iter().map(|s| s.id.clone()).collect(),
            total_size: snapshots.iter().map(|s| s.size).sum(),
        };

        {
            let _guard = self.maintenance.lock().await;
            self.store
                .save_point(PointRecord {
                    point: point.clone(),
                    snapshots,
                })
                .await
                .map_err(|e| crate::Error::CaptureFailed(format!("persist failed: {}", e)))?;
        }

        tracing::info!(
            point_id = %point.id,
            snapshots = point.snapshot_ids.len(),
            bytes = point.total_size,
            "rollback point created"
        );
        self.events.emit(
            EventTopic::RollbackPointCreated,
            json!({
                "id": point.id,
                "name": point.name,
                "snapshotCount": point.snapshot_ids.len(),
                "expiresAt": point.expires_at,
            }),
        );
        self.refresh_gauges().await;
        Ok(point)
    }

    /// Load a point with its snapshots.
    pub async fn load(&self, id: &str) -> Result<PointRecord> {
        self.store
            .load_point(id)
            .await?
            .ok_or_else(|| crate::Error::RollbackNotFound(id.to_string()))
    }

    pub async fn get_point(&self, id: &str) -> Result<RollbackPoint> {
        Ok(self.load(id).await?.point)
    }

    /// All points, oldest first.
    pub async fn list_points(&self) -> Result<Vec<RollbackPoint>> {
        self.store.list_points().await
    }

    /// Load a point for use as a restore source.
    ///
    /// Rejects expired points and any snapshot whose checksum is missing or does not
    /// match its data.
    pub async fn restore_source(&self, id: &str) -> Result<PointRecord> {
        let record = self.load(id).await?;

        if let Some(expires_at) = record.point.expires_at {
            if record.point.is_expired() {
                return Err(crate::Error::RollbackExpired {
                    id: id.to_string(),
                    expired_at: expires_at.to_rfc3339(),
                });
            }
        }

        for snapshot in &record.snapshots {
            verify_snapshot(snapshot)?;
        }
        Ok(record)
    }

    /// Diff two stored points.
    pub async fn diff(&self, from_id: &str, to_id: &str) -> Result<RollbackDiff> {
        let from = self.load(from_id).await?;
        let to = if from_id == to_id {
            from.clone()
        } else {
            self.load(to_id).await?
        };
        let entries = diff::compute(&from.values(), &to.values());
        Ok(RollbackDiff::new(from_id, to_id, entries))
    }

    /// Diff a stored point against the live values of the same keys.
    pub async fn diff_live(&self, from_id: &str) -> Result<RollbackDiff> {
        let from = self.load(from_id).await?;
        let keys: Vec<SnapshotKey> = from.snapshots.iter().map(Snapshot::key).collect();
        let live = self.read_live(&keys).await?;
        let entries = diff::compute(&from.values(), &live);
        Ok(RollbackDiff::new(from_id, "live", entries))
    }

    /// Current values of `keys`, in order.
    pub async fn read_live(&self, keys: &[SnapshotKey]) -> Result<Vec<(SnapshotKey, Option<Value>)>> {
        let values = try_join_all(keys.iter().map(|key| self.adapters.read(key))).await?;
        Ok(keys.iter().cloned().zip(values).collect())
    }

    /// Delete a point and its snapshots.
    pub async fn delete_point(&self, id: &str) -> Result<bool> {
        let removed = {
            let _guard = self.maintenance.lock().await;
            self.store.delete_point(id).await?
        };
        if removed {
            self.refresh_gauges().await;
        }
        Ok(removed)
    }

    /// Remove expired points, then the oldest points beyond `max_rollback_points`.
    ///
    /// Points in `protected` are targeted by a live operation; they are left in place
    /// and reported as deferred.
    pub async fn evict(&self, protected: &HashSet<String>) -> Result<CleanupReport> {
        self.events.emit(EventTopic::CleanupStarted, json!({}));

        let mut report = CleanupReport::default();
        {
            let _guard = self.maintenance.lock().await;
            let now = Utc::now();
            let points = self.store.list_points().await?;

            let mut survivors = Vec::new();
            for point in points {
                if !point.is_expired_at(now) {
                    survivors.push(point);
                    continue;
                }
                if protected.contains(&point.id) {
                    report.deferred.push(point.id.clone());
                    survivors.push(point);
                    continue;
                }
                if self.store.delete_point(&point.id).await? {
                    tracing::debug!(point_id = %point.id, "expired rollback point removed");
                    self.events.emit(
                        EventTopic::RollbackPointExpired,
                        json!({ "id": point.id, "expiresAt": point.expires_at }),
                    );
                    report.removed.push(point.id);
                }
            }

            let excess = survivors
                .len()
                .saturating_sub(self.config.max_rollback_points);
            for point in survivors.iter().take(excess) {
                if protected.contains(&point.id) {
                    if !report.deferred.contains(&point.id) {
                        report.deferred.push(point.id.clone());
                    }
                    continue;
                }
                if self.store.delete_point(&point.id).await? {
                    tracing::debug!(point_id = %point.id, "surplus rollback point removed");
                    report.removed.push(point.id.clone());
                }
            }
        }

        if !report.deferred.is_empty() {
            tracing::info!(
                deferred = report.deferred.len(),
                "eviction deferred for points targeted by live operations"
            );
        }
        tracing::info!(removed = report.removed.len(), "rollback cleanup completed");
        self.events.emit(
            EventTopic::CleanupCompleted,
            json!({
                "removedCount": report.removed.len(),
                "deferredCount": report.deferred.len(),
            }),
        );
        self.monitor.record_cleanup(Utc::now());
        self.refresh_gauges().await;
        Ok(report)
    }

    /// Recompute the point count and byte gauges from the store.
    pub async fn refresh_gauges(&self) {
        match self.store.list_points().await {
            Ok(points) => {
                let bytes = points.iter().map(|p| p.total_size).sum();
                self.monitor.set_point_gauges(points.len(), bytes);
            }
            Err(e) => tracing::warn!("Failed to refresh rollback point gauges: {}", e),
        }
    }
}

/// Check a snapshot's checksum against its data.
pub fn verify_snapshot(snapshot: &Snapshot) -> Result<()> {
    let expected = snapshot
        .checksum
        .as_deref()
        .ok_or_else(|| crate::Error::Integrity {
            snapshot_id: snapshot.id.clone(),
            reason: "missing checksum".to_string(),
        })?;
    let actual = hash::checksum(&snapshot.data);
    if actual != expected {
        return Err(crate::Error::Integrity {
            snapshot_id: snapshot.id.clone(),
            reason: format!("checksum mismatch at {}", snapshot.path),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapter::MemoryStoreAdapter;
    use crate::core::snapshot_store::MemorySnapshotStore;
    use crate::models::config::MonitorConfig;
    use crate::models::diff::DiffOperation;

    fn manager(config: RollbackConfig) -> (RollbackPointManager, Arc<MemoryStoreAdapter>) {
        let graph = Arc::new(MemoryStoreAdapter::new("graph"));
        let manager = RollbackPointManager::new(
            config,
            Arc::new(MemorySnapshotStore::new()),
            StoreAdapters::single(graph.clone()),
            EventBus::new(64),
            Arc::new(SynchronizationMonitor::new(&MonitorConfig::default())),
        );
        (manager, graph)
    }

    #[tokio::test]
    async fn test_capture_records_values_and_checksums() {
        let (manager, graph) = manager(RollbackConfig::default());
        graph.insert("E", json!("v1")).await;

        let point = manager
            .capture("before batch", &[SnapshotKey::entity("E"), SnapshotKey::entity("F")])
            .await
            .unwrap();
        assert!(point.expires_at.is_some());

        let record = manager.load(&point.id).await.unwrap();
        assert_eq!(record.snapshots.len(), 2);
        assert_eq!(record.snapshots[0].data, Some(json!("v1")));
        assert_eq!(record.snapshots[1].data, None);
        assert!(record.snapshots.iter().all(|s| verify_snapshot(s).is_ok()));
        assert_eq!(record.point.snapshot_ids[0], record.snapshots[0].id);
    }

    #[tokio::test]
    async fn test_capture_deduplicates_keys() {
        let (manager, _graph) = manager(RollbackConfig::default());
        let key = SnapshotKey::entity("E");
        let point = manager.capture("dup", &[key.clone(), key]).await.unwrap();
        assert_eq!(point.snapshot_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_rejects_oversized_snapshot() {
        let (manager, graph) = manager(RollbackConfig {
            max_snapshot_size: 8,
            ..Default::default()
        });
        graph.insert("big", json!("this value is too long")).await;
        let err = manager
            .capture("big", &[SnapshotKey::entity("big")])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::CaptureFailed(_)));
        assert!(manager.list_points().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_diff_of_point_with_itself_is_empty() {
        let (manager, graph) = manager(RollbackConfig::default());
        graph.insert("E", json!({"v": 1})).await;
        let point = manager.capture("a", &[SnapshotKey::entity("E")]).await.unwrap();

        let diff = manager.diff(&point.id, &point.id).await.unwrap();
        assert_eq!(diff.change_count, 0);
    }

    #[tokio::test]
    async fn test_diff_unknown_point() {
        let (manager, _graph) = manager(RollbackConfig::default());
        let err = manager.diff("missing", "missing").await.unwrap_err();
        assert!(matches!(err, crate::Error::RollbackNotFound(_)));
    }

    #[tokio::test]
    async fn test_diff_between_points() {
        let (manager, graph) = manager(RollbackConfig::default());
        let keys = [SnapshotKey::entity("E")];
        graph.insert("E", json!("v1")).await;
        let first = manager.capture("first", &keys).await.unwrap();
        graph.insert("E", json!("v2")).await;
        let second = manager.capture("second", &keys).await.unwrap();

        let diff = manager.diff(&first.id, &second.id).await.unwrap();
        assert_eq!(diff.change_count, 1);
        assert_eq!(diff.entries[0].operation, DiffOperation::Update);
        assert_eq!(diff.entries[0].old_value, Some(json!("v1")));
        assert_eq!(diff.entries[0].new_value, Some(json!("v2")));
    }

    #[tokio::test]
    async fn test_restore_source_rejects_tampered_snapshot() {
        let (manager, graph) = manager(RollbackConfig::default());
        graph.insert("E", json!("v1")).await;
        let point = manager.capture("a", &[SnapshotKey::entity("E")]).await.unwrap();

        let mut record = manager.load(&point.id).await.unwrap();
        record.snapshots[0].data = Some(json!("tampered"));
        manager.store.save_point(record).await.unwrap();

        let err = manager.restore_source(&point.id).await.unwrap_err();
        assert!(matches!(err, crate::Error::Integrity { .. }));
    }

    #[tokio::test]
    async fn test_evict_removes_oldest_beyond_capacity() {
        let (manager, _graph) = manager(RollbackConfig {
            max_rollback_points: 2,
            ..Default::default()
        });
        let mut ids = Vec::new();
        for i in 0..4 {
            let point = manager
                .capture(&format!("p{}", i), &[SnapshotKey::entity("E")])
                .await
                .unwrap();
            ids.push(point.id);
        }

        let report = manager.evict(&HashSet::new()).await.unwrap();
        assert_eq!(report.removed.len(), 2);

        let remaining: HashSet<String> = manager
            .list_points()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&ids[3]));
        assert_eq!(manager.monitor.metrics().total_rollback_points, 2);
        assert!(manager.monitor.metrics().last_cleanup.is_some());
    }

    #[tokio::test]
    async fn test_evict_defers_protected_expired_point() {
        let (manager, _graph) = manager(RollbackConfig::default());
        let expired = manager
            .capture_with(
                &[SnapshotKey::entity("E")],
                CaptureOptions {
                    ttl: Some(chrono::Duration::seconds(-1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let protected: HashSet<String> = [expired.id.clone()].into_iter().collect();
        let report = manager.evict(&protected).await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.deferred, vec![expired.id.clone()]);

        let report = manager.evict(&HashSet::new()).await.unwrap();
        assert_eq!(report.removed, vec![expired.id]);
    }
}
