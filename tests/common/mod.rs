//! Shared test utilities: mock collaborators and job builders

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use RustDocFlow::{AppError, Job, JobPriority, Processor, Result, ResultSink};

/// Processor with scripted outcomes per correlation key.
///
/// Keys without a script always succeed. Scripted keys consume one outcome
/// per call: `true` succeeds, `false` fails with a processing error.
pub struct MockProcessor {
    outcomes: Mutex<HashMap<String, Vec<bool>>>,
    pub calls: AtomicUsize,
    healthy: std::sync::atomic::AtomicBool,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            healthy: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn unreachable() -> Self {
        let processor = Self::new();
        processor.healthy.store(false, Ordering::SeqCst);
        processor
    }

    pub async fn script(&self, key: &str, outcomes: Vec<bool>) {
        self.outcomes.lock().await.insert(key.to_string(), outcomes);
    }
}

#[async_trait]
impl Processor for MockProcessor {
    async fn process(
        &self,
        correlation_key: &str,
        resource_locator: &str,
    ) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().await;
        let ok = outcomes
            .get_mut(correlation_key)
            .and_then(|v| if v.is_empty() { None } else { Some(v.remove(0)) })
            .unwrap_or(true);
        if ok {
            Ok(serde_json::json!({
                "key": correlation_key,
                "source": resource_locator,
                "text": "extracted text",
            }))
        } else {
            Err(AppError::ProcessingFailure(format!(
                "extraction failed for {}",
                correlation_key
            )))
        }
    }

    async fn health_check(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::ProcessingFailure(
                "backend connection refused".to_string(),
            ))
        }
    }
}

/// Result sink collecting persisted results in memory.
pub struct MemoryResultSink {
    pub stored: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self {
            stored: Mutex::new(HashMap::new()),
        }
    }

    pub async fn count(&self) -> usize {
        self.stored.lock().await.len()
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn persist(&self, correlation_key: &str, result: &serde_json::Value) -> Result<()> {
        self.stored
            .lock()
            .await
            .insert(correlation_key.to_string(), result.clone());
        Ok(())
    }
}

/// Build a test job with a derived resource locator.
pub fn test_job(key: &str, priority: JobPriority) -> Job {
    Job::new(key, format!("/data/{}.pdf", key)).with_priority(priority)
}

/// Fresh temp directory for snapshot files.
pub fn temp_snapshot_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir()
        .join("docflow-tests")
        .join(uuid::Uuid::new_v4().to_string());
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
