//! Store adapter contract.
//!
//! The engine never talks to the graph, vector or relational backends directly.
//! It reads current values and applies mutations through [`StoreAdapter`]s, routed
//! per snapshot type by [`StoreAdapters`].

use crate::models::rollback::{SnapshotKey, SnapshotType};
use crate::utils::fs as fs_utils;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Read/write access to one backing store.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Store name for logs and errors.
    fn name(&self) -> &str;

    /// Whether the backing store accepts reads and writes.
    async fn is_ready(&self) -> bool {
        true
    }

    /// Current value at `path`, `None` when absent.
    async fn read(&self, path: &str) -> Result<Option<Value>>;

    /// Set `path` to `value`. `None` deletes the key.
    async fn write(&self, path: &str, value: Option<Value>) -> Result<()>;
}

/// Routing table from snapshot type to adapter.
#[derive(Clone, Default)]
pub struct StoreAdapters {
    routes: HashMap<SnapshotType, Arc<dyn StoreAdapter>>,
    fallback: Option<Arc<dyn StoreAdapter>>,
}

impl StoreAdapters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every snapshot type to one adapter.
    pub fn single(adapter: Arc<dyn StoreAdapter>) -> Self {
        Self {
            routes: HashMap::new(),
            fallback: Some(adapter),
        }
    }

    /// Route `kind` to `adapter`.
    pub fn with(mut self, kind: SnapshotType, adapter: Arc<dyn StoreAdapter>) -> Self {
        self.routes.insert(kind, adapter);
        self
    }

    /// Route unlisted kinds to `adapter`.
    pub fn with_fallback(mut self, adapter: Arc<dyn StoreAdapter>) -> Self {
        self.fallback = Some(adapter);
        self
    }

    pub fn for_kind(&self, kind: SnapshotType) -> Result<&Arc<dyn StoreAdapter>> {
        self.routes
            .get(&kind)
            .or(self.fallback.as_ref())
            .ok_or_else(|| crate::Error::NoAdapter(kind.to_string()))
    }

    pub async fn read(&self, key: &SnapshotKey) -> Result<Option<Value>> {
        self.for_kind(key.kind)?.read(&key.path).await
    }

    pub async fn write(&self, key: &SnapshotKey, value: Option<Value>) -> Result<()> {
        self.for_kind(key.kind)?.write(&key.path, value).await
    }

    /// Distinct adapters, by name.
    pub fn adapters(&self) -> Vec<Arc<dyn StoreAdapter>> {
        let mut seen: BTreeMap<String, Arc<dyn StoreAdapter>> = BTreeMap::new();
        for adapter in self.routes.values().chain(self.fallback.iter()) {
            seen.entry(adapter.name().to_string())
                .or_insert_with(|| adapter.clone());
        }
        seen.into_values().collect()
    }

    /// Fail with `DatabaseNotReady` naming the first store that is not ready.
    pub async fn ensure_ready(&self) -> Result<()> {
        for adapter in self.adapters() {
            if !adapter.is_ready().await {
                tracing::warn!(store = adapter.name(), "store adapter not ready");
                return Err(crate::Error::DatabaseNotReady(adapter.name().to_string()));
            }
        }
        Ok(())
    }
}

/// In-process store, used for tests and embedding.
pub struct MemoryStoreAdapter {
    name: String,
    ready: AtomicBool,
    data: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStoreAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: AtomicBool::new(true),
            data: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Mutate the store behind the engine's back.
    pub async fn insert(&self, path: impl Into<String>, value: Value) {
        self.data.write().await.insert(path.into(), value);
    }

    pub async fn remove(&self, path: &str) -> Option<Value> {
        self.data.write().await.remove(path)
    }

    pub async fn get(&self, path: &str) -> Option<Value> {
        self.data.read().await.get(path).cloned()
    }
}

#[async_trait]
impl StoreAdapter for MemoryStoreAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn read(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.data.read().await.get(path).cloned())
    }

    async fn write(&self, path: &str, value: Option<Value>) -> Result<()> {
        let mut data = self.data.write().await;
        match value {
            Some(value) => {
                data.insert(path.to_string(), value);
            }
            None => {
                data.remove(path);
            }
        }
        Ok(())
    }
}

/// Store kept as one JSON object file, loaded lazily and rewritten atomically on
/// every write.
pub struct JsonFileStoreAdapter {
    name: String,
    path: PathBuf,
    data: Mutex<Option<BTreeMap<String, Value>>>,
}

impl JsonFileStoreAdapter {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            data: Mutex::new(None),
        }
    }

    /// Adapter for `<dir>/<name>.json`.
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self::new(name, dir.join(format!("{}.json", name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        fs_utils::read_json(&self.path).map_err(|e| crate::Error::StoreRead {
            store: self.name.clone(),
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl StoreAdapter for JsonFileStoreAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_ready(&self) -> bool {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                parent.is_dir() || std::fs::create_dir_all(parent).is_ok()
            }
            _ => true,
        }
    }

    async fn read(&self, path: &str) -> Result<Option<Value>> {
        let mut guard = self.data.lock().await;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        Ok(guard.as_ref().and_then(|data| data.get(path).cloned()))
    }

    async fn write(&self, path: &str, value: Option<Value>) -> Result<()> {
        let mut guard = self.data.lock().await;
        let mut data = match guard.take() {
            Some(data) => data,
            None => self.load()?,
        };
        match value {
            Some(value) => {
                data.insert(path.to_string(), value);
            }
            None => {
                data.remove(path);
            }
        }
        // On failure the cache stays empty and the next call reloads from disk.
        fs_utils::write_json(&self.path, &data).map_err(|e| crate::Error::StoreWrite {
            store: self.name.clone(),
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        *guard = Some(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_adapter_read_write_delete() {
        let store = MemoryStoreAdapter::new("graph");
        store.write("E", Some(json!("v1"))).await.unwrap();
        assert_eq!(store.read("E").await.unwrap(), Some(json!("v1")));

        store.write("E", None).await.unwrap();
        assert_eq!(store.read("E").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_routing_and_fallback() {
        let graph = Arc::new(MemoryStoreAdapter::new("graph"));
        let relational = Arc::new(MemoryStoreAdapter::new("relational"));
        let adapters = StoreAdapters::new()
            .with(SnapshotType::Entity, graph.clone())
            .with(SnapshotType::Relationship, graph.clone())
            .with_fallback(relational.clone());

        adapters
            .write(&SnapshotKey::entity("E"), Some(json!(1)))
            .await
            .unwrap();
        adapters
            .write(&SnapshotKey::file("a.rs"), Some(json!(2)))
            .await
            .unwrap();

        assert_eq!(graph.get("E").await, Some(json!(1)));
        assert_eq!(relational.get("a.rs").await, Some(json!(2)));
        assert_eq!(adapters.adapters().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_route_is_an_error() {
        let adapters = StoreAdapters::new();
        let err = adapters.read(&SnapshotKey::entity("E")).await.unwrap_err();
        assert!(matches!(err, crate::Error::NoAdapter(_)));
    }

    #[tokio::test]
    async fn test_ensure_ready_names_store() {
        let graph = Arc::new(MemoryStoreAdapter::new("graph"));
        graph.set_ready(false);
        let adapters = StoreAdapters::single(graph);
        match adapters.ensure_ready().await {
            Err(crate::Error::DatabaseNotReady(store)) => assert_eq!(store, "graph"),
            other => panic!("expected DatabaseNotReady, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_json_file_adapter_persists() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = JsonFileStoreAdapter::in_dir(temp_dir.path(), "vector");
        assert!(store.is_ready().await);
        store.write("doc:1", Some(json!([0.1, 0.2]))).await.unwrap();

        let reopened = JsonFileStoreAdapter::in_dir(temp_dir.path(), "vector");
        assert_eq!(reopened.read("doc:1").await.unwrap(), Some(json!([0.1, 0.2])));
        assert_eq!(reopened.read("doc:2").await.unwrap(), None);
    }
}
