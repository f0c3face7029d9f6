// Snapshot Store Port: durable home of one orchestrator's job set

use crate::domain::JobKind;
use crate::error::Result;
use async_trait::async_trait;

/// Whole-document persistence, one document per job kind
///
/// The document is `{"jobs": [...]}`; records are encoded by the core store so
/// adapters never see typed payloads.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the last persisted document (`None` when nothing was written yet)
    async fn load(&self, kind: JobKind) -> Result<Option<serde_json::Value>>;

    /// Atomically replace the persisted document
    async fn persist(&self, kind: JobKind, document: &serde_json::Value) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory snapshot store that keeps every written revision
    #[derive(Default)]
    pub struct MemorySnapshotStore {
        documents: Mutex<HashMap<JobKind, serde_json::Value>>,
        history: Mutex<Vec<(JobKind, serde_json::Value)>>,
        fail_writes: Mutex<bool>,
    }

    impl MemorySnapshotStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, kind: JobKind, document: serde_json::Value) {
            self.documents.lock().unwrap().insert(kind, document);
        }

        pub fn document(&self, kind: JobKind) -> Option<serde_json::Value> {
            self.documents.lock().unwrap().get(&kind).cloned()
        }

        /// Every revision persisted for `kind`, oldest first
        pub fn revisions(&self, kind: JobKind) -> Vec<serde_json::Value> {
            self.history
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, doc)| doc.clone())
                .collect()
        }

        /// Statuses a job went through, as observed by successive writes
        pub fn status_history(&self, kind: JobKind, job_id: &str) -> Vec<String> {
            let mut history: Vec<String> = Vec::new();
            for doc in self.revisions(kind) {
                let status = doc["jobs"].as_array().and_then(|jobs| {
                    jobs.iter()
                        .find(|j| j["id"] == job_id)
                        .and_then(|j| j["status"].as_str().map(str::to_string))
                });
                if let Some(status) = status {
                    if history.last() != Some(&status) {
                        history.push(status);
                    }
                }
            }
            history
        }

        pub fn set_fail_writes(&self, fail: bool) {
            *self.fail_writes.lock().unwrap() = fail;
        }
    }

    #[async_trait]
    impl SnapshotStore for MemorySnapshotStore {
        async fn load(&self, kind: JobKind) -> Result<Option<serde_json::Value>> {
            Ok(self.document(kind))
        }

        async fn persist(&self, kind: JobKind, document: &serde_json::Value) -> Result<()> {
            if *self.fail_writes.lock().unwrap() {
                return Err(AppError::Persistence("simulated disk full".to_string()));
            }
            self.documents.lock().unwrap().insert(kind, document.clone());
            self.history.lock().unwrap().push((kind, document.clone()));
            Ok(())
        }
    }
}
