//! Diff data model.

use super::rollback::{SnapshotKey, SnapshotType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Change classification of a diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOperation {
    Create,
    Update,
    Delete,
    Move,
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiffOperation::Create => "create",
            DiffOperation::Update => "update",
            DiffOperation::Delete => "delete",
            DiffOperation::Move => "move",
        };
        f.write_str(s)
    }
}

/// One change between two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// Logical path. For moves, the destination path.
    pub path: String,
    /// Kind of record, used to route reads and writes.
    pub kind: SnapshotType,
    pub operation: DiffOperation,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    /// Extra detail. Moves carry `{"from": <old path>}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl DiffEntry {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.kind, self.path.clone())
    }

    /// Source path of a move entry.
    pub fn moved_from(&self) -> Option<&str> {
        if self.operation != DiffOperation::Move {
            return None;
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.get("from"))
            .and_then(Value::as_str)
    }
}

/// Read-only projection comparing two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackDiff {
    /// Source point ID.
    pub from: String,
    /// Target point ID, or `live`.
    pub to: String,
    pub entries: Vec<DiffEntry>,
    pub change_count: usize,
    pub generated_at: DateTime<Utc>,
}

impl RollbackDiff {
    pub fn new(from: impl Into<String>, to: impl Into<String>, entries: Vec<DiffEntry>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            change_count: entries.len(),
            entries,
            generated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.change_count == 0
    }
}
