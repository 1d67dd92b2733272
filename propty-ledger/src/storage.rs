//! Snapshot persistence
//!
//! The ledger lives in memory. A [`SnapshotStore`] saves and restores the
//! whole state as one [`LedgerSnapshot`] between process runs.

use crate::{ledger::LedgerSnapshot, LedgerResult};
use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest saved snapshot, `None` if nothing was saved yet
    async fn load(&self) -> LedgerResult<Option<LedgerSnapshot>>;

    async fn save(&self, snapshot: &LedgerSnapshot) -> LedgerResult<()>;
}

/// Snapshot stored as a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> LedgerResult<Option<LedgerSnapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot on disk");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)?;
        info!(
            path = %self.path.display(),
            taken_at = %snapshot.taken_at,
            "Loaded ledger snapshot"
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> LedgerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write aside then rename so a crash never leaves a torn snapshot
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        info!(path = %self.path.display(), bytes = bytes.len(), "Saved ledger snapshot");
        Ok(())
    }
}

/// Snapshot kept in memory, for tests and embedders
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<LedgerSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> LedgerResult<Option<LedgerSnapshot>> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> LedgerResult<()> {
        *self.snapshot.lock().await = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock,
        config::PlatformConfig,
        error::LedgerError,
        ledger::Ledger,
        user_registry::UserRegistry,
        models::{AccountId, Role},
    };
    use std::sync::Arc;

    async fn snapshot_with_one_user() -> LedgerSnapshot {
        let ledger = Arc::new(Ledger::new(PlatformConfig::default(), Arc::new(SystemClock)));
        UserRegistry::new(ledger.clone())
            .register(&AccountId::from("0xabc"), "Ada", "did:ada", Role::Seeker)
            .await
            .unwrap();
        ledger.snapshot().await
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("ledger.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state").join("ledger.json"));
        let snapshot = snapshot_with_one_user().await;

        store.save(&snapshot).await.unwrap();
        assert!(!store.temp_path().exists());

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.version, snapshot.version);
        assert_eq!(loaded.state.platform_stats().total_users, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let result = JsonFileStore::new(path).load().await;
        assert!(matches!(result, Err(LedgerError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save(&snapshot_with_one_user().await).await.unwrap();
        assert!(store.load().await.unwrap().is_some());
    }
}
