//! Snapshot persistence for crash recovery
//!
//! Queue and scheduler state plus batch reports are written as JSON
//! documents under one directory. Writes go to a temp file first and are
//! renamed into place, so readers never observe a half-written document.

use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::job_scheduler::SchedulerSnapshot;
use crate::core::processing_queue::QueueSnapshot;
use crate::domain::entities::{BatchId, BatchReport};
use crate::error::{AppError, Result};

const QUEUE_STATE_FILE: &str = "queue_state.json";
const SCHEDULER_STATE_FILE: &str = "scheduler_state.json";

/// File-backed store for queue/scheduler snapshots and batch reports.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()> {
        self.write_document(QUEUE_STATE_FILE, snapshot).await
    }

    pub async fn load_queue(&self) -> Result<Option<QueueSnapshot>> {
        self.read_document(QUEUE_STATE_FILE).await
    }

    pub async fn save_scheduler(&self, snapshot: &SchedulerSnapshot) -> Result<()> {
        self.write_document(SCHEDULER_STATE_FILE, snapshot).await
    }

    pub async fn load_scheduler(&self) -> Result<Option<SchedulerSnapshot>> {
        self.read_document(SCHEDULER_STATE_FILE).await
    }

    pub async fn save_batch_report(&self, report: &BatchReport) -> Result<()> {
        self.write_document(&format!("batch_{}.json", report.id), report)
            .await
    }

    pub async fn load_batch_report(&self, batch_id: BatchId) -> Result<Option<BatchReport>> {
        self.read_document(&format!("batch_{}.json", batch_id)).await
    }

    async fn write_document<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        let encoded = serde_json::to_vec_pretty(value)?;

        tokio::fs::write(&tmp, encoded).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Wrote snapshot document {}", path.display());
        Ok(())
    }

    async fn read_document<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let value = serde_json::from_slice(&bytes).map_err(|e| {
            warn!("Corrupt snapshot document {}: {}", path.display(), e);
            AppError::PersistenceFailure(format!(
                "corrupt snapshot {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::processing_queue::ProcessingQueue;
    use crate::domain::entities::{Job, JobPriority};

    fn temp_store() -> SnapshotStore {
        let dir = std::env::temp_dir()
            .join("docflow-tests")
            .join(uuid::Uuid::new_v4().to_string());
        SnapshotStore::new(dir)
    }

    #[tokio::test]
    async fn test_missing_document_is_none() {
        let store = temp_store();
        assert!(store.load_queue().await.unwrap().is_none());
        assert!(store.load_scheduler().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queue_snapshot_round_trip() {
        let store = temp_store();

        let queue = ProcessingQueue::with_default_config();
        queue
            .enqueue(Job::new("PROD-1", "/data/a.pdf").with_priority(JobPriority::High))
            .await
            .unwrap();
        let snapshot = queue.snapshot().await;

        store.save_queue(&snapshot).await.unwrap();
        let loaded = store.load_queue().await.unwrap().unwrap();

        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.seq, snapshot.seq);
        assert_eq!(loaded.total_enqueued, 1);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_persistence_failure() {
        let store = temp_store();
        tokio::fs::create_dir_all(store.dir()).await.unwrap();
        tokio::fs::write(store.dir().join("queue_state.json"), b"{not json")
            .await
            .unwrap();

        assert!(matches!(
            store.load_queue().await,
            Err(AppError::PersistenceFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_report_round_trip() {
        let store = temp_store();
        let report = crate::domain::entities::BatchReport::new("nightly");
        let batch_id = report.id;

        store.save_batch_report(&report).await.unwrap();
        let loaded = store.load_batch_report(batch_id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "nightly");
        assert_eq!(loaded.id, batch_id);
    }
}
