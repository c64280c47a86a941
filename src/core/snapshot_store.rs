//! Keyed storage for rollback points and their snapshots.

use crate::models::config::{Config, PersistenceType};
use crate::models::rollback::{PointRecord, RollbackPoint};
use crate::utils::fs as fs_utils;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence backend for rollback points.
///
/// A point and its snapshots are stored and deleted together.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Backend identifier for logs.
    fn backend_name(&self) -> &'static str;

    /// Store a point with its full snapshot set.
    async fn save_point(&self, record: PointRecord) -> Result<()>;

    /// Load a point with its snapshots, `None` when unknown.
    async fn load_point(&self, id: &str) -> Result<Option<PointRecord>>;

    /// All points, oldest first.
    async fn list_points(&self) -> Result<Vec<RollbackPoint>>;

    /// Delete a point and its snapshots. Returns whether it existed.
    async fn delete_point(&self, id: &str) -> Result<bool>;
}

/// Point records held in process memory.
#[derive(Default)]
pub struct MemorySnapshotStore {
    records: RwLock<HashMap<String, PointRecord>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn save_point(&self, record: PointRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.point.id.clone(), record);
        Ok(())
    }

    async fn load_point(&self, id: &str) -> Result<Option<PointRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list_points(&self) -> Result<Vec<RollbackPoint>> {
        let mut points: Vec<RollbackPoint> = self
            .records
            .read()
            .await
            .values()
            .map(|record| record.point.clone())
            .collect();
        sort_oldest_first(&mut points);
        Ok(points)
    }

    async fn delete_point(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}

/// One `<id>.json` file per point.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File of point `id`. Ids must be a single plain path component.
    fn point_path(&self, id: &str) -> Result<PathBuf> {
        let plain = !id.is_empty()
            && id != "."
            && !id.contains(['/', '\\'])
            && !id.contains("..");
        if !plain {
            return Err(crate::Error::InvalidPointId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn save_point(&self, record: PointRecord) -> Result<()> {
        let path = self.point_path(&record.point.id)?;
        fs_utils::write_json(&path, &record)?;
        tracing::debug!("Rollback point saved to {:?}", path);
        Ok(())
    }

    async fn load_point(&self, id: &str) -> Result<Option<PointRecord>> {
        let path = self.point_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs_utils::read_json(&path)?))
    }

    async fn list_points(&self) -> Result<Vec<RollbackPoint>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut points = Vec::new();
        for entry in fs::read_dir(&self.dir)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs_utils::read_json::<PointRecord>(&path) {
                Ok(record) => points.push(record.point),
                Err(e) => tracing::warn!("Skipping unreadable rollback point {:?}: {}", path, e),
            }
        }
        sort_oldest_first(&mut points);
        Ok(points)
    }

    async fn delete_point(&self, id: &str) -> Result<bool> {
        let path = self.point_path(id)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }
}

fn sort_oldest_first(points: &mut [RollbackPoint]) {
    points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}

/// Open the backend selected by `config.rollback`.
///
/// Redis and PostgreSQL stores are provided by the embedding application and
/// injected through the engine builder.
pub fn open_snapshot_store(config: &Config) -> Result<Arc<dyn SnapshotStore>> {
    if !config.rollback.enable_persistence {
        return Ok(Arc::new(MemorySnapshotStore::new()));
    }
    match config.rollback.persistence_type {
        PersistenceType::Memory => Ok(Arc::new(MemorySnapshotStore::new())),
        PersistenceType::File => Ok(Arc::new(FileSnapshotStore::new(config.rollback_dir()))),
        PersistenceType::Redis => Err(crate::Error::UnsupportedBackend("redis".to_string())),
        PersistenceType::Postgresql => {
            Err(crate::Error::UnsupportedBackend("postgresql".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rollback::{Snapshot, SnapshotType};
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn record(id: &str, age_secs: i64) -> PointRecord {
        let point = RollbackPoint {
            id: id.to_string(),
            name: id.to_string(),
            timestamp: Utc::now() - Duration::seconds(age_secs),
            description: None,
            metadata: BTreeMap::new(),
            session_id: None,
            expires_at: None,
            snapshot_ids: vec![format!("{}-s1", id)],
            total_size: 4,
        };
        let snapshot = Snapshot {
            id: format!("{}-s1", id),
            rollback_point_id: id.to_string(),
            snapshot_type: SnapshotType::Entity,
            path: "E".to_string(),
            data: Some(serde_json::json!("v1")),
            size: 4,
            created_at: point.timestamp,
            checksum: None,
        };
        PointRecord {
            point,
            snapshots: vec![snapshot],
        }
    }

    #[tokio::test]
    async fn test_memory_store_lists_oldest_first() {
        let store = MemorySnapshotStore::new();
        store.save_point(record("new", 1)).await.unwrap();
        store.save_point(record("old", 100)).await.unwrap();

        let ids: Vec<String> = store
            .list_points()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_delete_removes_snapshots_with_point() {
        let store = MemorySnapshotStore::new();
        store.save_point(record("rp", 1)).await.unwrap();
        assert!(store.delete_point("rp").await.unwrap());
        assert!(store.load_point("rp").await.unwrap().is_none());
        assert!(!store.delete_point("rp").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = FileSnapshotStore::new(temp_dir.path().join("rollback"));
        assert!(store.list_points().await.unwrap().is_empty());

        let saved = record("rp-file", 5);
        store.save_point(saved.clone()).await.unwrap();

        let loaded = store.load_point("rp-file").await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(store.list_points().await.unwrap().len(), 1);
        assert!(store.delete_point("rp-file").await.unwrap());
        assert!(store.load_point("rp-file").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_ids_outside_its_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = FileSnapshotStore::new(temp_dir.path().join("rollback"));
        std::fs::write(temp_dir.path().join("outside.json"), "{}").unwrap();

        for id in ["../outside", "..", "a/b", "a\\b", ""] {
            assert!(matches!(
                store.load_point(id).await,
                Err(crate::Error::InvalidPointId(_))
            ));
            assert!(matches!(
                store.delete_point(id).await,
                Err(crate::Error::InvalidPointId(_))
            ));
        }
        assert!(temp_dir.path().join("outside.json").exists());
        assert!(store.load_point("rp-1").await.unwrap().is_none());
    }

    #[test]
    fn test_open_store_rejects_external_backends() {
        let mut config = Config::default();
        config.rollback.enable_persistence = true;
        config.rollback.persistence_type = PersistenceType::Redis;
        assert!(matches!(
            open_snapshot_store(&config),
            Err(crate::Error::UnsupportedBackend(_))
        ));

        config.rollback.enable_persistence = false;
        assert_eq!(open_snapshot_store(&config).unwrap().backend_name(), "memory");
    }
}
