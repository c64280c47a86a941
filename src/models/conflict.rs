//! Conflict data model.

use super::rollback::SnapshotType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Why a restore target disagrees with live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ValueMismatch,
    MissingTarget,
    TypeMismatch,
    PermissionDenied,
    DependencyConflict,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictType::ValueMismatch => "value_mismatch",
            ConflictType::MissingTarget => "missing_target",
            ConflictType::TypeMismatch => "type_mismatch",
            ConflictType::PermissionDenied => "permission_denied",
            ConflictType::DependencyConflict => "dependency_conflict",
        };
        f.write_str(s)
    }
}

/// A detected disagreement, transient to one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackConflict {
    pub path: String,
    pub kind: SnapshotType,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    /// Live value at detection time.
    pub current_value: Option<Value>,
    /// Value the rollback wants to write.
    pub rollback_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Conflict resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    Abort,
    Skip,
    Overwrite,
    Merge,
    AskUser,
}

impl FromStr for ConflictStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(ConflictStrategy::Abort),
            "skip" => Ok(ConflictStrategy::Skip),
            "overwrite" => Ok(ConflictStrategy::Overwrite),
            "merge" => Ok(ConflictStrategy::Merge),
            "ask_user" | "ask-user" => Ok(ConflictStrategy::AskUser),
            _ => Err(crate::Error::other(format!("Unknown conflict strategy: {}", s))),
        }
    }
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Write this value (`None` deletes the key).
    Apply(Option<Value>),
    /// Leave the key untouched.
    Skip,
    /// Fail the whole operation.
    Abort,
    /// Wait for an external decision.
    Deferred,
}

/// External answer to a deferred conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Overwrite,
    Skip,
    Abort,
    Use(Option<Value>),
}
