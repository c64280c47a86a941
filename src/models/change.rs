//! Incoming change events.

use super::rollback::SnapshotKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Mutation carried by a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "lowercase")]
pub enum Mutation {
    Upsert(Value),
    Delete,
}

impl Mutation {
    /// Value the store should hold after the mutation.
    pub fn target_value(&self) -> Option<Value> {
        match self {
            Mutation::Upsert(value) => Some(value.clone()),
            Mutation::Delete => None,
        }
    }
}

/// Producer family of a change, used by sync options to include or hold back work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCategory {
    #[default]
    Core,
    Embedding,
    Test,
    Security,
}

/// One entity/relationship/file mutation produced upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default = "new_change_id")]
    pub id: String,
    #[serde(flatten)]
    pub key: SnapshotKey,
    pub mutation: Mutation,
    #[serde(default)]
    pub category: ChangeCategory,
    /// Producer label, e.g. the edited file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn new_change_id() -> String {
    Uuid::new_v4().to_string()
}

impl ChangeEvent {
    pub fn upsert(key: SnapshotKey, value: Value) -> Self {
        Self {
            id: new_change_id(),
            key,
            mutation: Mutation::Upsert(value),
            category: ChangeCategory::Core,
            source: None,
        }
    }

    pub fn delete(key: SnapshotKey) -> Self {
        Self {
            id: new_change_id(),
            key,
            mutation: Mutation::Delete,
            category: ChangeCategory::Core,
            source: None,
        }
    }

    pub fn with_category(mut self, category: ChangeCategory) -> Self {
        self.category = category;
        self
    }
}

/// Options of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// Drain the queue as a single batch, ignoring `batch_size`.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub include_embeddings: bool,
    #[serde(default)]
    pub include_tests: bool,
    #[serde(default)]
    pub include_security: bool,
}

impl SyncOptions {
    /// Whether a change of `category` belongs in this pass.
    pub fn includes(&self, category: ChangeCategory) -> bool {
        match category {
            ChangeCategory::Core => true,
            ChangeCategory::Embedding => self.include_embeddings,
            ChangeCategory::Test => self.include_tests,
            ChangeCategory::Security => self.include_security,
        }
    }
}
