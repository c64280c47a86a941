//! CLI command implementations.

pub mod points;
pub mod rollback;
pub mod status;
pub mod sync;

use crate::core::adapter::{JsonFileStoreAdapter, StoreAdapters};
use crate::core::engine::{Engine, EngineBuilder};
use crate::core::snapshot_store::FileSnapshotStore;
use crate::models::config::Config;
use crate::models::rollback::SnapshotType;
use crate::models::status::MonitorSnapshot;
use crate::utils::fs as fs_utils;
use crate::Result;
use std::sync::Arc;

/// Engine over the CLI stores, with monitor counters from earlier runs loaded.
pub fn open_engine(config: &Config) -> Result<Engine> {
    let engine = engine_builder(config).build()?;
    restore_monitor(config, &engine)?;
    Ok(engine)
}

/// Monitor counters saved by the last `sync` or `rollback`, if any.
pub fn load_monitor_state(config: &Config) -> Result<Option<MonitorSnapshot>> {
    let path = config.monitor_state_path();
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(fs_utils::read_json(&path)?))
}

/// Seed the engine's monitor from the saved counters.
pub fn restore_monitor(config: &Config, engine: &Engine) -> Result<()> {
    if let Some(saved) = load_monitor_state(config)? {
        engine.monitor().seed(&saved);
    }
    Ok(())
}

/// Save the engine's monitor counters for later runs.
pub fn save_monitor(config: &Config, engine: &Engine) -> Result<()> {
    fs_utils::write_json(&config.monitor_state_path(), &engine.monitor().snapshot())
}

/// Engine over the JSON stores in `data_dir/stores` and the file snapshot store.
///
/// Entities and relationships share the graph store, files have their own store
/// and every other snapshot type falls back to the state store.
pub fn engine_builder(config: &Config) -> EngineBuilder {
    let stores_dir = config.stores_dir();
    let graph = Arc::new(JsonFileStoreAdapter::in_dir(&stores_dir, "graph"));
    let files = Arc::new(JsonFileStoreAdapter::in_dir(&stores_dir, "files"));
    let state = Arc::new(JsonFileStoreAdapter::in_dir(&stores_dir, "state"));

    let adapters = StoreAdapters::new()
        .with(SnapshotType::Entity, graph.clone())
        .with(SnapshotType::Relationship, graph)
        .with(SnapshotType::File, files)
        .with_fallback(state);

    Engine::builder(config.clone())
        .adapters(adapters)
        .snapshot_store(Arc::new(FileSnapshotStore::new(config.rollback_dir())))
}

/// Short display form of an optional JSON value.
pub(crate) fn preview(value: Option<&serde_json::Value>) -> String {
    let text = match value {
        Some(value) => value.to_string(),
        None => "(absent)".to_string(),
    };
    if text.chars().count() > 48 {
        let cut: String = text.chars().take(45).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

/// Human-readable byte count.
pub(crate) fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview(None), "(absent)");
        assert_eq!(preview(Some(&json!("v1"))), "\"v1\"");
        let long = json!("x".repeat(100));
        assert!(preview(Some(&long)).ends_with("..."));
        assert_eq!(preview(Some(&long)).chars().count(), 48);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
