//! Filesystem-backed state persistence.
//!
//! Stores the envelope as a single pretty-printed JSON file. Writes are
//! atomic: the new envelope is written to a temp file in the same directory
//! and renamed over the previous one, so a crash mid-write never leaves a
//! torn state file behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StateResult, StateStoreError};
use crate::ports::StatePersistence;
use crate::snapshot::{restore_envelope, StateEnvelope};

/// JSON-file implementation of [`StatePersistence`].
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    /// Create a store persisting to `path`. The parent directory is created
    /// if needed.
    pub fn new(path: impl AsRef<Path>) -> StateResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StatePersistence for JsonFileStateStore {
    async fn save_state(&self, envelope: &StateEnvelope) -> StateResult<()> {
        let json = serde_json::to_vec_pretty(envelope)?;
        let dir = self
            .path
            .parent()
            .ok_or_else(|| StateStoreError::Backend("state path has no parent".to_string()))?;

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path)
            .map_err(|e| StateStoreError::Backend(e.error.to_string()))?;

        debug!(
            path = %self.path.display(),
            version = envelope.coordination_version,
            "persisted frontier state"
        );
        Ok(())
    }

    async fn load_state(&self) -> StateResult<Option<StateEnvelope>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        let envelope = restore_envelope(value)?;
        envelope.verify_digest()?;
        Ok(Some(envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_store() -> (tempfile::TempDir, JsonFileStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("frontier.json")).unwrap();
        (dir, store)
    }

    fn envelope(version: u64) -> StateEnvelope {
        StateEnvelope::seal(
            "plan-fs",
            version,
            Utc::now(),
            serde_json::json!({"boundaries": [], "version": version}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_load_before_save_is_none() {
        let (_dir, store) = make_store();
        assert!(store.load_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrips() {
        let (_dir, store) = make_store();
        let env = envelope(7);
        store.save_state(&env).await.unwrap();
        let loaded = store.load_state().await.unwrap().unwrap();
        assert_eq!(loaded, env);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_state() {
        let (_dir, store) = make_store();
        store.save_state(&envelope(1)).await.unwrap();
        store.save_state(&envelope(2)).await.unwrap();
        let loaded = store.load_state().await.unwrap().unwrap();
        assert_eq!(loaded.coordination_version, 2);
    }

    #[tokio::test]
    async fn test_corrupted_file_fails_to_load() {
        let (_dir, store) = make_store();
        store.save_state(&envelope(1)).await.unwrap();
        std::fs::write(store.path(), b"{not json").unwrap();
        assert!(store.load_state().await.is_err());
    }
}
