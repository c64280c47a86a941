//! Diff computation between two captured states.
//!
//! A state is a list of `(key, value)` pairs in capture order. Keys present on only
//! one side are compared against an absent value, so a to-only key is a `create` and
//! a from-only key is a `delete`.

use crate::models::diff::{DiffEntry, DiffOperation};
use crate::models::rollback::SnapshotKey;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Classify every changed key between `from` and `to`.
pub fn compute(
    from: &[(SnapshotKey, Option<Value>)],
    to: &[(SnapshotKey, Option<Value>)],
) -> Vec<DiffEntry> {
    let from_map: HashMap<&SnapshotKey, &Option<Value>> = from.iter().map(|(k, v)| (k, v)).collect();
    let to_map: HashMap<&SnapshotKey, &Option<Value>> = to.iter().map(|(k, v)| (k, v)).collect();

    let mut entries = Vec::new();
    for (key, old_value) in from {
        let new_value = to_map.get(key).map(|v| (*v).clone()).unwrap_or(None);
        if let Some(entry) = classify(key, old_value.clone(), new_value) {
            entries.push(entry);
        }
    }
    for (key, new_value) in to {
        if from_map.contains_key(key) {
            continue;
        }
        if let Some(entry) = classify(key, None, new_value.clone()) {
            entries.push(entry);
        }
    }

    collapse_moves(entries)
}

fn classify(key: &SnapshotKey, old_value: Option<Value>, new_value: Option<Value>) -> Option<DiffEntry> {
    let operation = match (&old_value, &new_value) {
        (None, None) => return None,
        (Some(old), Some(new)) if old == new => return None,
        (None, Some(_)) => DiffOperation::Create,
        (Some(_), None) => DiffOperation::Delete,
        (Some(_), Some(_)) => DiffOperation::Update,
    };
    Some(DiffEntry {
        path: key.path.clone(),
        kind: key.kind,
        operation,
        old_value,
        new_value,
        metadata: None,
    })
}

/// Pair a delete with a create of the same kind and identical value into a move.
fn collapse_moves(entries: Vec<DiffEntry>) -> Vec<DiffEntry> {
    let mut consumed = vec![false; entries.len()];
    let mut moves: HashMap<usize, DiffEntry> = HashMap::new();

    for (i, deleted) in entries.iter().enumerate() {
        if deleted.operation != DiffOperation::Delete {
            continue;
        }
        let Some(value) = deleted.old_value.as_ref().filter(|v| !v.is_null()) else {
            continue;
        };
        let partner = entries.iter().enumerate().position(|(j, created)| {
            !consumed[j]
                && created.operation == DiffOperation::Create
                && created.kind == deleted.kind
                && created.new_value.as_ref() == Some(value)
        });
        if let Some(j) = partner {
            consumed[j] = true;
            let created = &entries[j];
            moves.insert(
                i,
                DiffEntry {
                    path: created.path.clone(),
                    kind: created.kind,
                    operation: DiffOperation::Move,
                    old_value: deleted.old_value.clone(),
                    new_value: created.new_value.clone(),
                    metadata: Some(json!({ "from": deleted.path })),
                },
            );
        }
    }

    entries
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !consumed[*i])
        .map(|(i, entry)| moves.remove(&i).unwrap_or(entry))
        .collect()
}

/// JSON shape name, used to tell type mismatches from value mismatches.
pub fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rollback::SnapshotType;

    fn state(pairs: &[(&str, Option<Value>)]) -> Vec<(SnapshotKey, Option<Value>)> {
        pairs
            .iter()
            .map(|(path, value)| (SnapshotKey::entity(*path), value.clone()))
            .collect()
    }

    #[test]
    fn test_identical_states_have_no_changes() {
        let a = state(&[("E", Some(json!("v1"))), ("F", None)]);
        assert!(compute(&a, &a).is_empty());
    }

    #[test]
    fn test_classification() {
        let from = state(&[
            ("updated", Some(json!(1))),
            ("deleted", Some(json!({"a": 1}))),
            ("same", Some(json!(true))),
            ("created", None),
        ]);
        let to = state(&[
            ("updated", Some(json!(2))),
            ("deleted", None),
            ("same", Some(json!(true))),
            ("created", Some(json!("new"))),
            ("to_only", Some(json!([1]))),
        ]);

        let entries = compute(&from, &to);
        let ops: Vec<(&str, DiffOperation)> = entries
            .iter()
            .map(|e| (e.path.as_str(), e.operation))
            .collect();
        assert_eq!(
            ops,
            vec![
                ("updated", DiffOperation::Update),
                ("deleted", DiffOperation::Delete),
                ("created", DiffOperation::Create),
                ("to_only", DiffOperation::Create),
            ]
        );
        assert_eq!(entries[0].old_value, Some(json!(1)));
        assert_eq!(entries[0].new_value, Some(json!(2)));
    }

    #[test]
    fn test_from_only_key_is_delete() {
        let from = state(&[("gone", Some(json!(1)))]);
        let entries = compute(&from, &[]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, DiffOperation::Delete);
    }

    #[test]
    fn test_delete_and_create_of_same_value_is_move() {
        let from = state(&[("old", Some(json!({"id": 7}))), ("new", None)]);
        let to = state(&[("old", None), ("new", Some(json!({"id": 7})))]);

        let entries = compute(&from, &to);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, DiffOperation::Move);
        assert_eq!(entries[0].path, "new");
        assert_eq!(entries[0].moved_from(), Some("old"));
    }

    #[test]
    fn test_move_requires_same_kind() {
        let from = vec![(SnapshotKey::entity("a"), Some(json!(1)))];
        let to = vec![(SnapshotKey::new(SnapshotType::File, "b"), Some(json!(1)))];
        let entries = compute(&from, &to);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.operation != DiffOperation::Move));
    }

    #[test]
    fn test_shape_of() {
        assert_eq!(shape_of(&json!("x")), "string");
        assert_eq!(shape_of(&json!({"a": 1})), "object");
        assert_eq!(shape_of(&json!(1.5)), "number");
    }
}
