//! Durable single-producer artifact storage.

use crate::core::StageArtifact;
use crate::errors::ArtifactError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Key/value store for values produced by one stage and consumed by another.
///
/// When backed by a file, every read reloads the file so a consumer running
/// in another process observes what the producer wrote. A key may only be
/// written by one producer; the same producer may rewrite it (retries).
#[derive(Debug)]
pub struct ArtifactStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, StageArtifact>>,
}

impl ArtifactStore {
    /// Creates a store that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Opens a file-backed store, loading existing artifacts if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let path = path.into();
        let entries = load(&path).await?;
        debug!(path = %path.display(), artifacts = entries.len(), "Opened artifact store");
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Opens a file-backed store and discards artifacts of previous runs.
    pub async fn fresh(path: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let store = Self {
            path: Some(path.into()),
            entries: Mutex::new(BTreeMap::new()),
        };
        store.persist(&BTreeMap::new()).await?;
        Ok(store)
    }

    /// Returns the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes an artifact on behalf of `producer`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Conflict`] if another stage already produced `key`.
    pub async fn put(
        &self,
        producer: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ArtifactError> {
        let mut entries = self.entries.lock().await;
        self.reload_into(&mut entries).await?;

        if let Some(existing) = entries.get(key) {
            if existing.producer != producer {
                return Err(ArtifactError::Conflict {
                    key: key.to_string(),
                    producer: existing.producer.clone(),
                    attempted_by: producer.to_string(),
                });
            }
        }

        entries.insert(key.to_string(), StageArtifact::new(key, value, producer));
        self.persist(&entries).await?;
        info!(key = %key, producer = %producer, "Persisted artifact");
        Ok(())
    }

    /// Returns the artifact under `key`, if present.
    pub async fn get(&self, key: &str) -> Result<Option<StageArtifact>, ArtifactError> {
        let mut entries = self.entries.lock().await;
        self.reload_into(&mut entries).await?;
        Ok(entries.get(key).cloned())
    }

    /// Returns the artifact value under `key`, failing fast if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Missing`] if no producer wrote `key`.
    pub async fn require(&self, key: &str) -> Result<serde_json::Value, ArtifactError> {
        self.get(key)
            .await?
            .map(|artifact| artifact.value)
            .ok_or_else(|| ArtifactError::Missing { key: key.to_string() })
    }

    /// Like [`ArtifactStore::require`], but the value must be a JSON string.
    pub async fn require_str(&self, key: &str) -> Result<String, ArtifactError> {
        match self.require(key).await? {
            serde_json::Value::String(value) => Ok(value),
            _ => Err(ArtifactError::UnexpectedType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    /// Returns all artifact keys.
    pub async fn keys(&self) -> Result<Vec<String>, ArtifactError> {
        let mut entries = self.entries.lock().await;
        self.reload_into(&mut entries).await?;
        Ok(entries.keys().cloned().collect())
    }

    async fn reload_into(
        &self,
        entries: &mut BTreeMap<String, StageArtifact>,
    ) -> Result<(), ArtifactError> {
        if let Some(path) = &self.path {
            *entries = load(path).await?;
        }
        Ok(())
    }

    async fn persist(&self, entries: &BTreeMap<String, StageArtifact>) -> Result<(), ArtifactError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = path.with_extension(format!("tmp-{}", crate::utils::generate_uuid()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

async fn load(path: &Path) -> Result<BTreeMap<String, StageArtifact>, ArtifactError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_require_missing_fails_fast() {
        let store = ArtifactStore::in_memory();
        let err = store.require("slugId").await.unwrap_err();
        assert!(matches!(err, ArtifactError::Missing { ref key } if key == "slugId"));
    }

    #[tokio::test]
    async fn test_single_producer() {
        let store = ArtifactStore::in_memory();
        store.put("article-setup", "slugId", json!("s1")).await.unwrap();

        let err = store.put("other-stage", "slugId", json!("s2")).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Conflict { .. }));

        // The producer itself may rewrite on retry.
        store.put("article-setup", "slugId", json!("s3")).await.unwrap();
        assert_eq!(store.require_str("slugId").await.unwrap(), "s3");
    }

    #[tokio::test]
    async fn test_file_store_visible_to_second_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".auth/artifacts.json");

        let producer = ArtifactStore::fresh(&path).await.unwrap();
        let consumer = ArtifactStore::open(&path).await.unwrap();

        producer.put("article-setup", "slugId", json!("s1")).await.unwrap();

        assert_eq!(consumer.require_str("slugId").await.unwrap(), "s1");
        assert_eq!(consumer.keys().await.unwrap(), vec!["slugId".to_string()]);
    }

    #[tokio::test]
    async fn test_fresh_discards_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts.json");

        let first = ArtifactStore::fresh(&path).await.unwrap();
        first.put("setup", "slugId", json!("old")).await.unwrap();

        let second = ArtifactStore::fresh(&path).await.unwrap();
        assert!(second.get("slugId").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_require_str_type_mismatch() {
        let store = ArtifactStore::in_memory();
        store.put("setup", "count", json!(3)).await.unwrap();

        let err = store.require_str("count").await.unwrap_err();
        assert!(matches!(err, ArtifactError::UnexpectedType { .. }));
    }
}
