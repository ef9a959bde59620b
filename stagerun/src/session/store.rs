//! Durable session-state storage keyed by logical identity.

use super::SessionState;
use crate::errors::SessionStoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Persists and restores authenticated session state.
///
/// Keys are written once per run by the authenticating stage and may be
/// restored concurrently by any number of readers.
#[async_trait]
pub trait SessionStore: Send + Sync + Debug {
    /// Persists `state` under `key`, overwriting any previous value.
    async fn save(&self, key: &str, state: &SessionState) -> Result<(), SessionStoreError>;

    /// Restores the state saved under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStoreError::NotFound`] if nothing was saved.
    async fn restore(&self, key: &str) -> Result<SessionState, SessionStoreError>;

    /// Returns true if a state is stored under `key`.
    async fn exists(&self, key: &str) -> bool;

    /// Removes the state under `key`, returning whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, SessionStoreError>;
}

/// Rejects keys that are empty or could escape the store root.
fn validate_key(key: &str) -> Result<(), SessionStoreError> {
    let invalid = |reason: &str| SessionStoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.trim().is_empty() {
        return Err(invalid("key cannot be empty"));
    }
    for component in Path::new(key).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("'..' is not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("key must be a relative path"))
            }
        }
    }
    Ok(())
}

/// Stores each key as a JSON file below a root directory.
///
/// Writes go to a temporary sibling file that is renamed into place, so a
/// concurrent reader never observes a partially written state.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves the file path for a key.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, SessionStoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, key: &str, state: &SessionState) -> Result<(), SessionStoreError> {
        let path = self.path_for(key)?;
        let io_err = |source| SessionStoreError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let bytes = serde_json::to_vec_pretty(state).map_err(|source| SessionStoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        let tmp = path.with_extension(format!("tmp-{}", crate::utils::generate_uuid()));
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        info!(key = %key, path = %path.display(), cookies = state.cookies.len(), "Saved session state");
        Ok(())
    }

    async fn restore(&self, key: &str) -> Result<SessionState, SessionStoreError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionStoreError::NotFound { key: key.to_string() });
            }
            Err(source) => {
                return Err(SessionStoreError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };

        debug!(key = %key, bytes = bytes.len(), "Restoring session state");
        serde_json::from_slice(&bytes).map_err(|source| SessionStoreError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    async fn exists(&self, key: &str) -> bool {
        match self.path_for(key) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, SessionStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(SessionStoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Keeps serialized states in memory; used by tests and single-process runs.
///
/// Values are stored serialized so a restored state never aliases the saved one.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    entries: DashMap<String, String>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, key: &str, state: &SessionState) -> Result<(), SessionStoreError> {
        validate_key(key)?;
        let raw = serde_json::to_string(state).map_err(|source| SessionStoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        self.entries.insert(key.to_string(), raw);
        Ok(())
    }

    async fn restore(&self, key: &str) -> Result<SessionState, SessionStoreError> {
        validate_key(key)?;
        let raw = self
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionStoreError::NotFound { key: key.to_string() })?;
        serde_json::from_str(&raw).map_err(|source| SessionStoreError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    async fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    async fn remove(&self, key: &str) -> Result<bool, SessionStoreError> {
        validate_key(key)?;
        Ok(self.entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Cookie;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn authenticated_state() -> SessionState {
        let mut state = SessionState::new();
        state.set_cookie(Cookie::new("sid", "abc", "conduit.test"));
        state.set_local_storage("https://conduit.test", "jwtToken", "t0k3n");
        state
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let state = authenticated_state();

        store.save(".auth/user.json", &state).await.unwrap();
        assert!(dir.path().join(".auth/user.json").exists());

        let restored = store.restore(".auth/user.json").await.unwrap();
        assert_eq!(restored, state);
    }

    #[tokio::test]
    async fn test_file_store_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        let err = store.restore(".auth/never.json").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists(".auth/never.json").await);
    }

    #[tokio::test]
    async fn test_file_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        store.save("user.json", &SessionState::new()).await.unwrap();
        store.save("user.json", &authenticated_state()).await.unwrap();

        let restored = store.restore("user.json").await.unwrap();
        assert_eq!(restored, authenticated_state());
    }

    #[tokio::test]
    async fn test_file_store_rejects_escaping_keys() {
        let store = FileSessionStore::new("/tmp/stagerun-never-created");

        for key in ["../outside.json", "/etc/passwd", "  "] {
            let err = store.save(key, &SessionState::new()).await.unwrap_err();
            assert!(matches!(err, SessionStoreError::InvalidKey { .. }), "{key}");
        }
    }

    #[tokio::test]
    async fn test_file_store_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        store.save("a.json", &authenticated_state()).await.unwrap();
        assert!(store.remove("a.json").await.unwrap());
        assert!(!store.remove("a.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        let store = FileSessionStore::new(dir.path());

        let err = store.restore("bad.json").await.unwrap_err();
        assert!(matches!(err, SessionStoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_memory_store_restore_does_not_alias() {
        let store = InMemorySessionStore::new();
        store.save("user", &authenticated_state()).await.unwrap();

        let mut first = store.restore("user").await.unwrap();
        first.cookies.clear();

        let second = store.restore("user").await.unwrap();
        assert_eq!(second, authenticated_state());
    }

    #[tokio::test]
    async fn test_memory_store_not_found() {
        let store = InMemorySessionStore::new();
        let err = store.restore("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_readers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileSessionStore::new(dir.path()));
        store.save("shared.json", &authenticated_state()).await.unwrap();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.restore("shared.json").await })
            })
            .collect();

        for reader in readers {
            assert_eq!(reader.await.unwrap().unwrap(), authenticated_state());
        }
    }
}
