//! Component wiring.
//!
//! [`Engine`] owns one instance of every component and hands out shared handles.
//! Nothing in the engine is global: two engines in one process are independent.

use crate::core::adapter::StoreAdapters;
use crate::core::conflict::{ConflictResolver, DecisionRequest, MergeFn};
use crate::core::coordinator::SynchronizationCoordinator;
use crate::core::events::{EngineEvent, EventBus};
use crate::core::executor::RollbackOperationExecutor;
use crate::core::monitor::SynchronizationMonitor;
use crate::core::rollback::{CleanupReport, RollbackPointManager};
use crate::core::snapshot_store::{open_snapshot_store, SnapshotStore};
use crate::models::config::Config;
use crate::models::status::{RollbackMetrics, SyncStatus};
use crate::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: Config,
    adapters: StoreAdapters,
    store: Option<Arc<dyn SnapshotStore>>,
    merge: Option<MergeFn>,
    decisions: Option<mpsc::Sender<DecisionRequest>>,
}

impl EngineBuilder {
    pub fn adapters(mut self, adapters: StoreAdapters) -> Self {
        self.adapters = adapters;
        self
    }

    /// Use `store` instead of the backend selected by the configuration.
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn merge(mut self, merge: MergeFn) -> Self {
        self.merge = Some(merge);
        self
    }

    pub fn decisions(mut self, tx: mpsc::Sender<DecisionRequest>) -> Self {
        self.decisions = Some(tx);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let store = match self.store {
            Some(store) => store,
            None => open_snapshot_store(&self.config)?,
        };
        tracing::debug!(backend = store.backend_name(), "snapshot store opened");

        let events = EventBus::new(self.config.sync.event_capacity);
        let monitor = Arc::new(SynchronizationMonitor::new(&self.config.monitor));
        let manager = Arc::new(RollbackPointManager::new(
            self.config.rollback.clone(),
            store,
            self.adapters.clone(),
            events.clone(),
            monitor.clone(),
        ));

        let mut resolver =
            ConflictResolver::new(self.adapters, self.config.sync.ask_user_timeout());
        if let Some(merge) = self.merge {
            resolver = resolver.with_merge(merge);
        }
        if let Some(tx) = self.decisions {
            resolver = resolver.with_decisions(tx);
        }

        let executor = Arc::new(RollbackOperationExecutor::new(
            manager.clone(),
            Arc::new(resolver),
            events.clone(),
            monitor.clone(),
        ));
        let coordinator = Arc::new(SynchronizationCoordinator::new(
            self.config.sync.clone(),
            manager.clone(),
            executor.clone(),
            events.clone(),
            monitor.clone(),
        ));

        Ok(Engine {
            config: self.config,
            events,
            monitor,
            manager,
            executor,
            coordinator,
        })
    }
}

/// The assembled sync and rollback engine.
pub struct Engine {
    config: Config,
    events: EventBus,
    monitor: Arc<SynchronizationMonitor>,
    manager: Arc<RollbackPointManager>,
    executor: Arc<RollbackOperationExecutor>,
    coordinator: Arc<SynchronizationCoordinator>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            adapters: StoreAdapters::new(),
            store: None,
            merge: None,
            decisions: None,
        }
    }

    pub fn from_config(config: Config, adapters: StoreAdapters) -> Result<Self> {
        Self::builder(config).adapters(adapters).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn monitor(&self) -> &Arc<SynchronizationMonitor> {
        &self.monitor
    }

    pub fn manager(&self) -> &Arc<RollbackPointManager> {
        &self.manager
    }

    pub fn executor(&self) -> &Arc<RollbackOperationExecutor> {
        &self.executor
    }

    pub fn coordinator(&self) -> &Arc<SynchronizationCoordinator> {
        &self.coordinator
    }

    pub fn status(&self) -> SyncStatus {
        self.monitor.status()
    }

    pub fn metrics(&self) -> RollbackMetrics {
        self.monitor.metrics()
    }

    /// One eviction run. Points targeted by live operations are deferred.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        self.manager.evict(&self.executor.active_targets()).await
    }

    /// Run [`Engine::cleanup`] every `cleanup_interval` until `shutdown` fires.
    ///
    /// Returns `None` when `auto_cleanup` is off.
    pub fn spawn_cleanup(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.rollback.auto_cleanup {
            tracing::debug!("automatic rollback cleanup disabled");
            return None;
        }
        let manager = self.manager.clone();
        let executor = self.executor.clone();
        let period = self.config.rollback.cleanup_interval();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes at once.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.evict(&executor.active_targets()).await {
                            tracing::warn!("Rollback cleanup failed: {}", e);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("cleanup timer stopped");
                        break;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapter::MemoryStoreAdapter;
    use crate::core::events::EventTopic;
    use crate::models::rollback::SnapshotKey;
    use serde_json::json;
    use std::time::Duration;

    fn engine(config: Config) -> (Engine, Arc<MemoryStoreAdapter>) {
        let graph = Arc::new(MemoryStoreAdapter::new("graph"));
        let engine = Engine::from_config(config, StoreAdapters::single(graph.clone())).unwrap();
        (engine, graph)
    }

    #[tokio::test]
    async fn test_cleanup_removes_surplus_points() {
        let mut config = Config::default();
        config.rollback.max_rollback_points = 2;
        let (engine, graph) = engine(config);
        graph.insert("E", json!(1)).await;

        for i in 0..4 {
            engine
                .manager()
                .capture(&format!("p{}", i), &[SnapshotKey::entity("E")])
                .await
                .unwrap();
        }
        let report = engine.cleanup().await.unwrap();
        assert_eq!(report.removed.len(), 2);
        assert_eq!(engine.metrics().total_rollback_points, 2);
        assert!(engine.metrics().last_cleanup.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_timer_runs_and_stops() {
        let mut config = Config::default();
        config.rollback.cleanup_interval_secs = 1;
        let (engine, _graph) = engine(config);
        let mut rx = engine.subscribe();

        let shutdown = CancellationToken::new();
        let handle = engine.spawn_cleanup(shutdown.clone()).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(event) = rx.recv().await {
                    if event.topic == EventTopic::CleanupCompleted {
                        return event;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event.payload["removedCount"], 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_timer_respects_auto_cleanup() {
        let mut config = Config::default();
        config.rollback.auto_cleanup = false;
        let (engine, _graph) = engine(config);
        assert!(engine.spawn_cleanup(CancellationToken::new()).is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.sync.batch_size = 0;
        assert!(matches!(
            Engine::from_config(config, StoreAdapters::new()),
            Err(crate::Error::Config(_))
        ));
    }
}
