//! JSON snapshot persistence
//!
//! Policies persist their beliefs as a single JSON document. Writes go to a
//! sibling `.tmp` file that is then renamed over the target, so a crash
//! mid-write never leaves a truncated snapshot behind. Loading is tolerant:
//! a missing or unreadable snapshot yields the empty default state.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// A JSON snapshot stored at a fixed path
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Create a snapshot handle for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Read and parse the snapshot
    ///
    /// Returns `Ok(None)` when no snapshot exists and `StateCorruption` when
    /// one exists but cannot be read or parsed.
    pub fn try_load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::StateCorruption(format!("failed to read {}: {}", self.path.display(), e))
        })?;

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            Error::StateCorruption(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    /// Load the snapshot, falling back to the default state
    pub fn load_or_default<T: DeserializeOwned + Default>(&self) -> T {
        match self.try_load() {
            Ok(Some(state)) => {
                info!(path = %self.path.display(), "Loaded snapshot");
                state
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No snapshot found, starting empty");
                T::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable snapshot");
                T::default()
            }
        }
    }

    /// Atomically write the snapshot
    pub fn save<T: Serialize>(&self, state: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(state)?;
        let temp_path = self.temp_path();
        std::fs::write(&temp_path, json)?;
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }

        debug!(path = %self.path.display(), "Saved snapshot");
        Ok(())
    }

    /// Atomically write pre-serialized snapshot bytes without blocking the runtime
    pub async fn save_bytes_async(&self, json: Vec<u8>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, json).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), "Saved snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_missing_snapshot_is_default() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("missing.json"));

        assert!(file.try_load::<BTreeMap<String, u32>>().unwrap().is_none());
        let state: BTreeMap<String, u32> = file.load_or_default();
        assert!(state.is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_is_reported_and_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "this is not json").unwrap();
        let file = SnapshotFile::new(&path);

        let err = file.try_load::<BTreeMap<String, u32>>().unwrap_err();
        assert!(matches!(err, Error::StateCorruption(_)));

        let state: BTreeMap<String, u32> = file.load_or_default();
        assert!(state.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested").join("state.json"));

        let mut state = BTreeMap::new();
        state.insert("a".to_string(), 1u32);
        file.save(&state).unwrap();

        let loaded: BTreeMap<String, u32> = file.try_load().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!file.temp_path().exists());
    }

    #[tokio::test]
    async fn test_save_bytes_async() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("state.json"));

        file.save_bytes_async(b"{\"b\": 2}".to_vec()).await.unwrap();

        let loaded: BTreeMap<String, u32> = file.try_load().unwrap().unwrap();
        assert_eq!(loaded.get("b"), Some(&2));
    }
}
