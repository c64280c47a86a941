//! Rollback point and snapshot data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A named, timestamped checkpoint of affected state.
///
/// Immutable once created. The point owns its snapshots through `snapshot_ids`;
/// snapshots only keep a lookup reference back to the point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPoint {
    /// Unique point ID.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Session that created the point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Expiry timestamp, if the point has a TTL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Owned snapshots, in capture order.
    #[serde(default)]
    pub snapshot_ids: Vec<String>,
    /// Bytes held by the owned snapshots.
    #[serde(default)]
    pub total_size: usize,
}

impl RollbackPoint {
    /// Whether the point is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Whether the point is past its expiry right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Kind of captured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotType {
    Entity,
    Relationship,
    File,
    Configuration,
    SessionState,
    Metadata,
}

impl SnapshotType {
    /// Every snapshot type, in declaration order.
    pub const ALL: [SnapshotType; 6] = [
        SnapshotType::Entity,
        SnapshotType::Relationship,
        SnapshotType::File,
        SnapshotType::Configuration,
        SnapshotType::SessionState,
        SnapshotType::Metadata,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Entity => "entity",
            SnapshotType::Relationship => "relationship",
            SnapshotType::File => "file",
            SnapshotType::Configuration => "configuration",
            SnapshotType::SessionState => "session_state",
            SnapshotType::Metadata => "metadata",
        }
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SnapshotType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::Error::other(format!("Unknown snapshot type: {}", s)))
    }
}

/// Logical key of a captured value: which kind of record, at which path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub kind: SnapshotType,
    pub path: String,
}

impl SnapshotKey {
    pub fn new(kind: SnapshotType, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn entity(path: impl Into<String>) -> Self {
        Self::new(SnapshotType::Entity, path)
    }

    pub fn relationship(path: impl Into<String>) -> Self {
        Self::new(SnapshotType::Relationship, path)
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(SnapshotType::File, path)
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.path)
    }
}

/// One captured value belonging to a rollback point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot ID.
    pub id: String,
    /// Owning point (lookup only).
    pub rollback_point_id: String,
    /// Kind of captured value.
    #[serde(rename = "type")]
    pub snapshot_type: SnapshotType,
    /// Logical path within the store.
    pub path: String,
    /// Captured value; `None` when the key was absent at capture time.
    ///
    /// Absent keys omit the field, so a stored `null` reads back as `Some(Null)`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub data: Option<Value>,
    /// Size of the canonical encoding in bytes.
    pub size: usize,
    /// Capture timestamp.
    pub created_at: DateTime<Utc>,
    /// Content hash of `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Snapshot {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.snapshot_type, self.path.clone())
    }
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Persisted layout of a point: metadata plus its snapshot set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub point: RollbackPoint,
    pub snapshots: Vec<Snapshot>,
}

impl PointRecord {
    /// Total captured bytes.
    pub fn size(&self) -> usize {
        self.snapshots.iter().map(|s| s.size).sum()
    }

    /// Captured values in capture order.
    pub fn values(&self) -> Vec<(SnapshotKey, Option<Value>)> {
        self.snapshots
            .iter()
            .map(|s| (s.key(), s.data.clone()))
            .collect()
    }
}
