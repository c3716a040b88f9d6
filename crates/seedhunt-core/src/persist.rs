//! Atomic JSON state files
//!
//! Every piece of resumable state (seed permutation, submission journal,
//! top-list cache, GPU tuning hint) is a small pretty-printed JSON document
//! written through a temp file and renamed into place, so a crash mid-write
//! never leaves a torn file. Loads treat unreadable or unparsable documents
//! as recoverable: the caller logs a warning and starts fresh.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing state for {}", path.display()))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir {}", parent.display()))?;
        }
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("creating temp file {}", tmp.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("writing {}", tmp.display()))?;
        file.sync_all().ok();
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// Load a JSON document. `Ok(None)` when the file does not exist; `Err` for
/// unreadable or unparsable contents so the caller can log and reset.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(value))
}

/// Current wall-clock timestamp in the format every state file records.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        step: u64,
        next_index: u64,
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let value = Sample {
            step: 5,
            next_index: 7,
        };
        save_json(&path, &value).unwrap();
        let back: Sample = load_json(&path).unwrap().unwrap();
        assert_eq!(back, value);
        // No temp file left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Sample> = load_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let loaded: Result<Option<Sample>> = load_json(&path);
        assert!(loaded.is_err());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/seed.json");
        save_json(&path, &Sample { step: 1, next_index: 0 }).unwrap();
        assert!(path.exists());
    }
}
