// JSON file SnapshotStore Implementation

use async_trait::async_trait;
use kiln_core::domain::JobKind;
use kiln_core::error::{AppError, Result};
use kiln_core::port::SnapshotStore;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

// Helper to convert io::Error to AppError with the file involved
fn map_io_error(path: &Path, err: std::io::Error) -> AppError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            AppError::Persistence(format!("Permission denied: {}", path.display()))
        }
        _ => AppError::Persistence(format!("{}: {}", path.display(), err)),
    }
}

/// Stores `<kind>_jobs.json` files in one directory
///
/// Writes go to a sibling temp file that is fsynced and then renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
pub struct JsonFileSnapshotStore {
    dir: PathBuf,
}

impl JsonFileSnapshotStore {
    /// Create the store, creating `dir` if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| map_io_error(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: JobKind) -> PathBuf {
        self.dir.join(kind.snapshot_file_name())
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn load(&self, kind: JobKind) -> Result<Option<serde_json::Value>> {
        let path = self.path_for(kind);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(map_io_error(&path, e)),
        };
        let document = serde_json::from_slice(&bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Loaded job snapshot");
        Ok(Some(document))
    }

    async fn persist(&self, kind: JobKind, document: &serde_json::Value) -> Result<()> {
        let path = self.path_for(kind);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(document)?;

        let written = match write_synced(&tmp, &bytes).await {
            Ok(()) => fs::rename(&tmp, &path)
                .await
                .map_err(|e| map_io_error(&path, e)),
            Err(e) => Err(map_io_error(&tmp, e)),
        };
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp snapshot");
                }
            }
            return Err(e);
        }

        // the rename itself is only durable once the directory entry is flushed
        if let Err(e) = sync_dir(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Failed to sync snapshot directory");
        }
        Ok(())
    }
}

/// Write `bytes` to `path` and flush them to disk before returning
async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

// directories cannot be opened for syncing here
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_file_is_no_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path()).await.unwrap();
        assert!(store.load(JobKind::Image).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_then_load_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path().join("nested")).await.unwrap();

        store
            .persist(JobKind::Video, &json!({"jobs": [{"id": "v1"}]}))
            .await
            .unwrap();

        assert!(store.path_for(JobKind::Video).ends_with("video_jobs.json"));
        assert!(!store.path_for(JobKind::Video).with_extension("json.tmp").exists());
        let loaded = store.load(JobKind::Video).await.unwrap().unwrap();
        assert_eq!(loaded["jobs"][0]["id"], "v1");
        assert!(store.load(JobKind::Image).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path()).await.unwrap();
        std::fs::write(store.path_for(JobKind::Image), b"{\"jobs\": [").unwrap();

        let err = store.load(JobKind::Image).await.unwrap_err();
        assert!(matches!(err, AppError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_stale_temp_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path()).await.unwrap();
        let tmp = store.path_for(JobKind::Bulk).with_extension("json.tmp");
        std::fs::write(&tmp, b"{\"jobs\": [ {\"id\": \"half-written\", \"extra\": [1, 2, 3, 4]").unwrap();

        store.persist(JobKind::Bulk, &json!({"jobs": []})).await.unwrap();

        assert!(!tmp.exists());
        let loaded = store.load(JobKind::Bulk).await.unwrap().unwrap();
        assert_eq!(loaded, json!({"jobs": []}));
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::new(dir.path()).await.unwrap();
        // a non-empty directory where the snapshot should go cannot be replaced
        let target = store.path_for(JobKind::Workflow);
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        let err = store
            .persist(JobKind::Workflow, &json!({"jobs": []}))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Persistence(_)));
        assert!(!target.with_extension("json.tmp").exists());
        assert!(target.join("keep").exists());
    }
}
