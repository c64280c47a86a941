//! File system utilities.

use crate::Result;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Write `bytes` to `path` through a sibling temp file and a rename, so readers
/// never observe a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

/// Read and deserialize a JSON file.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_atomic_creates_parents() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("deeply").join("nested").join("a.json");

        write_json(&path, &json!({"k": 1})).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let loaded: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(loaded["k"], 1);
    }

    #[test]
    fn test_read_missing_file_fails() {
        let result: Result<serde_json::Value> = read_json(Path::new("/nonexistent/a.json"));
        assert!(result.is_err());
    }
}
