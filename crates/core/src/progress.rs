//! Participant Progress Persistence
//!
//! Tracks, per participant identity, which interview questions have already been asked.
//! `load` never fails (a missing or unreadable store reads as "no progress for anyone").
//! `try_load` reports backend failures so a writer never saves over data it could not
//! read. `save` persists the mapping atomically.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Progress for a single participant.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantProgress {
    pub asked_questions: BTreeSet<String>,
}

impl ParticipantProgress {
    /// Adds questions to the asked set, returning how many were new.
    pub fn record<I>(&mut self, questions: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        questions
            .into_iter()
            .filter(|q| self.asked_questions.insert(q.clone()))
            .count()
    }
}

/// Identity -> progress. Ordered so that serialized output is deterministic.
pub type ProgressMap = BTreeMap<String, ParticipantProgress>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on progress store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize progress: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Progress backend error: {0}")]
    Backend(String),
}

/// Durable storage for the full progress mapping.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Reads the whole mapping. A store that does not exist yet reads as empty; a store
    /// that exists but cannot be read is an error.
    async fn try_load(&self) -> Result<ProgressMap, StoreError>;

    /// Reads the whole mapping. Never fails: problems are logged and read as empty.
    async fn load(&self) -> ProgressMap {
        match self.try_load().await {
            Ok(progress) => progress,
            Err(e) => {
                warn!(error = %e, "Failed to read progress. Starting empty.");
                ProgressMap::new()
            }
        }
    }

    /// Atomically persists every entry of `progress`.
    async fn save(&self, progress: &ProgressMap) -> Result<(), StoreError>;
}

/// A `ProgressStore` backed by a single JSON document on disk.
pub struct JsonFileProgressStore {
    path: PathBuf,
}

impl JsonFileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
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

    /// Moves an unparsable document aside instead of overwriting it.
    async fn preserve_if_corrupt(&self) -> Result<(), StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.io_error(e)),
        };
        if serde_json::from_slice::<ProgressMap>(&bytes).is_ok() {
            return Ok(());
        }

        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(
            ".corrupt-{}",
            chrono::Utc::now().timestamp_millis()
        ));
        let backup = self.path.with_file_name(name);
        tokio::fs::rename(&self.path, &backup)
            .await
            .map_err(|e| self.io_error(e))?;
        warn!(path = %self.path.display(), backup = %backup.display(), "Preserved corrupt progress file before overwrite.");
        Ok(())
    }

    /// Writes `json` to `tmp`, flushes it to disk and renames it over the document.
    async fn replace_with(&self, tmp: &Path, json: &[u8]) -> Result<(), StoreError> {
        let mut file = tokio::fs::File::create(tmp)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(json).await.map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);

        self.preserve_if_corrupt().await?;
        tokio::fs::rename(tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    /// Makes the rename itself durable. The new document is already in place, so a
    /// failure here is only logged.
    async fn sync_parent_dir(&self) {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let synced = match tokio::fs::File::open(parent).await {
            Ok(dir) => dir.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            warn!(dir = %parent.display(), error = %e, "Failed to sync progress directory.");
        }
    }
}

#[async_trait]
impl ProgressStore for JsonFileProgressStore {
    /// A corrupt document reads as empty; it is moved aside by the next save.
    async fn try_load(&self) -> Result<ProgressMap, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No progress file yet. Starting empty.");
                return Ok(ProgressMap::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(progress) => Ok(progress),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Progress file is empty or corrupt. Starting empty.");
                Ok(ProgressMap::new())
            }
        }
    }

    async fn save(&self, progress: &ProgressMap) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(progress)?;
        let tmp = self.temp_path();

        if let Err(e) = self.replace_with(&tmp, &json).await {
            match tokio::fs::remove_file(&tmp).await {
                Ok(()) => {}
                Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
                Err(cleanup) => {
                    warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temporary progress file.");
                }
            }
            return Err(e);
        }
        self.sync_parent_dir().await;
        Ok(())
    }
}

/// An in-process `ProgressStore`. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryProgressStore {
    inner: Mutex<ProgressMap>,
}

impl MemoryProgressStore {
    pub fn new(initial: ProgressMap) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn try_load(&self) -> Result<ProgressMap, StoreError> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, progress: &ProgressMap) -> Result<(), StoreError> {
        *self.inner.lock().await = progress.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> ProgressMap {
        let mut progress = ProgressMap::new();
        progress.insert(
            "alice".to_string(),
            ParticipantProgress {
                asked_questions: ["Do you have a maiden name?".to_string()].into(),
            },
        );
        progress.insert("bob".to_string(), ParticipantProgress::default());
        progress
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileProgressStore::new(dir.path().join("user_data.json"));
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = JsonFileProgressStore::new(dir.path().join("user_data.json"));

        store.save(&sample()).await.unwrap();

        assert_eq!(store.load().await, sample());
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = JsonFileProgressStore::new(dir.path().join("user_data.json"));
        store.save(&sample()).await.unwrap();

        let first = store.load().await;
        let second = store.load().await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user_data.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = JsonFileProgressStore::new(&path);

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_reads_user_data_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user_data.json");
        std::fs::write(
            &path,
            br#"{"carol": {"asked_questions": ["Where did you grow up?", "What is your birthdate?"]}}"#,
        )
        .unwrap();

        let progress = JsonFileProgressStore::new(&path).load().await;

        let carol = progress.get("carol").unwrap();
        assert_eq!(carol.asked_questions.len(), 2);
        assert!(carol.asked_questions.contains("Where did you grow up?"));
    }

    #[tokio::test]
    async fn test_save_preserves_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user_data.json");
        std::fs::write(&path, b"garbage").unwrap();
        let store = JsonFileProgressStore::new(&path);

        store.save(&sample()).await.unwrap();

        assert_eq!(store.load().await, sample());
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read(backups[0].path()).unwrap(), b"garbage");
    }

    #[tokio::test]
    async fn test_unreadable_store_is_an_error_for_try_load_only() {
        let dir = tempdir().unwrap();
        // A directory where the document should be cannot be read as a file.
        let store = JsonFileProgressStore::new(dir.path());

        assert!(matches!(store.try_load().await, Err(StoreError::Io { .. })));
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("user_data.json");
        std::fs::create_dir(&path).unwrap();
        let store = JsonFileProgressStore::new(&path);

        assert!(store.save(&sample()).await.is_err());

        assert!(!store.temp_path().exists());
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_mapping() {
        let dir = tempdir().unwrap();
        let store = JsonFileProgressStore::new(dir.path().join("user_data.json"));
        store.save(&sample()).await.unwrap();

        let mut replacement = ProgressMap::new();
        replacement.insert("dave".to_string(), ParticipantProgress::default());
        store.save(&replacement).await.unwrap();

        assert_eq!(store.load().await, replacement);
    }

    #[tokio::test]
    async fn test_memory_store_round_trips() {
        let store = MemoryProgressStore::default();
        assert!(store.load().await.is_empty());
        store.save(&sample()).await.unwrap();
        assert_eq!(store.load().await, sample());
    }

    #[test]
    fn test_record_counts_only_new_questions() {
        let mut progress = ParticipantProgress::default();
        assert_eq!(progress.record(vec!["A?".to_string(), "B?".to_string()]), 2);
        assert_eq!(progress.record(vec!["B?".to_string(), "C?".to_string()]), 1);
        assert_eq!(progress.asked_questions.len(), 3);
    }
}
