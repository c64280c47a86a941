//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kg_sync::core::adapter::{MemoryStoreAdapter, StoreAdapter, StoreAdapters};
use kg_sync::core::engine::Engine;
use kg_sync::core::events::{EngineEvent, EventTopic};
use kg_sync::models::config::Config;
use kg_sync::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Write failure schedule for one path.
#[derive(Debug, Clone, Copy)]
struct WriteFaults {
    /// Writes that succeed before failures start.
    succeed_first: usize,
    /// Failures still to inject.
    failures: usize,
}

/// In-memory store with injectable read/write failures and latency.
pub struct FaultyAdapter {
    inner: MemoryStoreAdapter,
    failing_reads: Mutex<HashSet<String>>,
    denied_reads: Mutex<HashSet<String>>,
    write_faults: Mutex<HashMap<String, WriteFaults>>,
    write_delay: Mutex<Duration>,
    writes: AtomicUsize,
    write_attempts: Mutex<HashMap<String, usize>>,
}

impl FaultyAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryStoreAdapter::new(name),
            failing_reads: Mutex::new(HashSet::new()),
            denied_reads: Mutex::new(HashSet::new()),
            write_faults: Mutex::new(HashMap::new()),
            write_delay: Mutex::new(Duration::ZERO),
            writes: AtomicUsize::new(0),
            write_attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &MemoryStoreAdapter {
        &self.inner
    }

    pub fn fail_reads_at(&self, path: &str) {
        self.failing_reads.lock().unwrap().insert(path.to_string());
    }

    pub fn deny_reads_at(&self, path: &str) {
        self.denied_reads.lock().unwrap().insert(path.to_string());
    }

    /// Fail the next `times` writes to `path`.
    pub fn fail_writes_at(&self, path: &str, times: usize) {
        self.write_faults.lock().unwrap().insert(
            path.to_string(),
            WriteFaults {
                succeed_first: 0,
                failures: times,
            },
        );
    }

    /// Let `successes` writes to `path` through, then fail every later one.
    pub fn fail_writes_after(&self, path: &str, successes: usize) {
        self.write_faults.lock().unwrap().insert(
            path.to_string(),
            WriteFaults {
                succeed_first: successes,
                failures: usize::MAX,
            },
        );
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Write calls against `path`, failed ones included.
    pub fn attempts_at(&self, path: &str) -> usize {
        self.write_attempts
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    fn take_write_fault(&self, path: &str) -> bool {
        let mut faults = self.write_faults.lock().unwrap();
        let Some(fault) = faults.get_mut(path) else {
            return false;
        };
        if fault.succeed_first > 0 {
            fault.succeed_first -= 1;
            return false;
        }
        if fault.failures == 0 {
            return false;
        }
        fault.failures -= 1;
        true
    }
}

#[async_trait]
impl StoreAdapter for FaultyAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn is_ready(&self) -> bool {
        self.inner.is_ready().await
    }

    async fn read(&self, path: &str) -> Result<Option<Value>> {
        if self.failing_reads.lock().unwrap().contains(path) {
            return Err(Error::StoreRead {
                store: self.name().to_string(),
                path: path.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        if self.denied_reads.lock().unwrap().contains(path) {
            return Err(Error::PermissionDenied(path.to_string()));
        }
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, value: Option<Value>) -> Result<()> {
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        *self
            .write_attempts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert(0) += 1;

        if self.take_write_fault(path) {
            return Err(Error::StoreWrite {
                store: self.name().to_string(),
                path: path.to_string(),
                reason: "write timed out".to_string(),
            });
        }
        self.inner.write(path, value).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Config with fast retries for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sync.retry_backoff_ms = 1;
    config.sync.ask_user_timeout_secs = 1;
    config
}

/// Engine over a single faulty store.
pub fn engine(config: Config) -> (Engine, Arc<FaultyAdapter>) {
    let store = Arc::new(FaultyAdapter::new("graph"));
    let engine = Engine::from_config(config, StoreAdapters::single(store.clone())).unwrap();
    (engine, store)
}

/// Wait for the next event on `topic`.
pub async fn next_event(rx: &mut broadcast::Receiver<EngineEvent>, topic: EventTopic) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.topic == topic => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
