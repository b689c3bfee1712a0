//! Batch submission layer
//!
//! Converts bulk sources (explicit item lists, directory trees, CSV
//! manifests) into jobs sharing common tags and tracks their aggregate
//! completion. Per-item submission failures are recorded in the report,
//! never raised; only malformed bulk input (missing directory, missing CSV
//! column) fails a call outright.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::processing_queue::ProcessingQueue;
use crate::domain::entities::{
    BatchId, BatchItemOutcome, BatchReport, Job, JobPriority, JobStatus,
};
use crate::error::{AppError, Result};
use crate::storage::SnapshotStore;

/// One unit of batch input
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub correlation_key: String,
    pub resource_locator: String,
}

/// Options for directory submission
#[derive(Debug, Clone)]
pub struct DirectoryOptions {
    /// Optional filename regex; files that do not match are ignored and the
    /// first capture group (when present) becomes the correlation key
    pub pattern: Option<String>,
    pub batch_size: usize,
    pub priority: JobPriority,
    pub recursive: bool,
    pub tags: HashSet<String>,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            pattern: None,
            batch_size: 50,
            priority: JobPriority::Normal,
            recursive: false,
            tags: HashSet::new(),
        }
    }
}

/// Options for CSV manifest submission
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub id_column: String,
    pub path_column: String,
    pub batch_size: usize,
    pub priority: JobPriority,
    pub delimiter: u8,
    pub tags: HashSet<String>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            id_column: "id".to_string(),
            path_column: "path".to_string(),
            batch_size: 50,
            priority: JobPriority::Normal,
            delimiter: b',',
            tags: HashSet::new(),
        }
    }
}

/// Turns bulk sources into jobs and tracks aggregate completion.
pub struct BatchProcessor {
    queue: Arc<ProcessingQueue>,
    store: SnapshotStore,
    default_max_retries: u32,
    reports: RwLock<HashMap<BatchId, BatchReport>>,
}

impl BatchProcessor {
    pub fn new(queue: Arc<ProcessingQueue>, store: SnapshotStore, default_max_retries: u32) -> Self {
        Self {
            queue,
            store,
            default_max_retries,
            reports: RwLock::new(HashMap::new()),
        }
    }

    /// Submit a list of items as one batch.
    ///
    /// Every item gets a row in the report: `Enqueued`, `Skipped` (duplicate
    /// correlation key within the batch, or rejected by the queue filter) or
    /// `Error` (the queue refused it, e.g. a full bucket). The report is
    /// persisted immediately so progress stays visible across a crash.
    pub async fn submit_batch(
        &self,
        items: Vec<BatchItem>,
        name: Option<String>,
        priority: JobPriority,
        tags: HashSet<String>,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::new(
            name.unwrap_or_else(|| format!("batch-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"))),
        );
        let batch_tag = format!("batch:{}", report.id);

        let mut seen_keys: HashSet<String> = HashSet::new();
        for item in items {
            let mut job_tags = tags.clone();
            job_tags.insert(batch_tag.clone());
            let job = Job::new(item.correlation_key.clone(), item.resource_locator)
                .with_priority(priority)
                .with_max_retries(self.default_max_retries)
                .with_tags(job_tags);
            let job_id = job.id;

            if !seen_keys.insert(item.correlation_key.clone()) {
                warn!(
                    "Batch {}: duplicate correlation key {}, skipping",
                    report.id, item.correlation_key
                );
                report.record_item(
                    job_id,
                    BatchItemOutcome::Skipped {
                        reason: format!("duplicate correlation key {}", item.correlation_key),
                    },
                );
                continue;
            }

            match self.queue.enqueue(job).await {
                Ok(true) => {
                    report.item_status.insert(job_id, JobStatus::InQueue);
                    report.record_item(job_id, BatchItemOutcome::Enqueued);
                }
                Ok(false) => {
                    report.record_item(
                        job_id,
                        BatchItemOutcome::Skipped {
                            reason: "rejected by queue".to_string(),
                        },
                    );
                }
                Err(e) => {
                    report.record_item(
                        job_id,
                        BatchItemOutcome::Error {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        info!(
            "Batch {} ({}) submitted: {} enqueued, {} skipped, {} errors",
            report.id, report.name, report.enqueued, report.skipped, report.errors
        );

        // Crash-visible progress; a write failure is not a submission failure
        if let Err(e) = self.store.save_batch_report(&report).await {
            warn!("Could not persist report for batch {}: {}", report.id, e);
        }

        self.reports.write().await.insert(report.id, report.clone());
        Ok(report)
    }

    /// Discover files under a directory and submit them in fixed-size
    /// batches.
    pub async fn submit_directory(
        &self,
        path: impl AsRef<Path>,
        options: DirectoryOptions,
    ) -> Result<Vec<BatchReport>> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(AppError::ValidationError(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let pattern = options
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| AppError::ValidationError(format!("invalid pattern: {}", e)))?;

        let max_depth = if options.recursive { usize::MAX } else { 1 };
        let mut items = Vec::new();
        for entry in WalkDir::new(path)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let correlation_key = match &pattern {
                Some(regex) => match regex.captures(&file_name) {
                    Some(caps) => caps
                        .get(1)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_else(|| file_name.clone()),
                    None => continue,
                },
                None => entry
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or(file_name),
            };
            items.push(BatchItem {
                correlation_key,
                resource_locator: entry.path().to_string_lossy().to_string(),
            });
        }

        debug!(
            "Discovered {} files under {}",
            items.len(),
            path.display()
        );

        let dir_name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "directory".to_string());
        self.submit_chunked(items, &dir_name, options.batch_size, options.priority, options.tags)
            .await
    }

    /// Parse a CSV manifest of (id, path) rows and submit them in
    /// fixed-size batches. A missing required column fails the whole call
    /// before anything is enqueued.
    pub async fn submit_csv(
        &self,
        path: impl AsRef<Path>,
        options: CsvOptions,
    ) -> Result<Vec<BatchReport>> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::ValidationError(format!("cannot read {}: {}", path.display(), e)))?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .from_reader(bytes.as_slice());

        // Byte records throughout so a stray non-UTF-8 cell degrades
        // lossily instead of failing the manifest
        let headers = reader.byte_headers()?.clone();
        let id_idx = headers
            .iter()
            .position(|h| h == options.id_column.as_bytes())
            .ok_or_else(|| {
                AppError::ValidationError(format!(
                    "CSV column '{}' not found in {}",
                    options.id_column,
                    path.display()
                ))
            })?;
        let path_idx = headers
            .iter()
            .position(|h| h == options.path_column.as_bytes())
            .ok_or_else(|| {
                AppError::ValidationError(format!(
                    "CSV column '{}' not found in {}",
                    options.path_column,
                    path.display()
                ))
            })?;

        let mut items = Vec::new();
        for (row, record) in reader.byte_records().enumerate() {
            let record = record?;
            let correlation_key = record
                .get(id_idx)
                .map(|b| String::from_utf8_lossy(b).trim().to_string())
                .unwrap_or_default();
            let resource_locator = record
                .get(path_idx)
                .map(|b| String::from_utf8_lossy(b).trim().to_string())
                .unwrap_or_default();
            if correlation_key.is_empty() || resource_locator.is_empty() {
                warn!(
                    "CSV {} row {}: empty id or path, skipping",
                    path.display(),
                    row + 2
                );
                continue;
            }
            items.push(BatchItem {
                correlation_key,
                resource_locator,
            });
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "manifest".to_string());
        self.submit_chunked(items, &stem, options.batch_size, options.priority, options.tags)
            .await
    }

    async fn submit_chunked(
        &self,
        items: Vec<BatchItem>,
        name_prefix: &str,
        batch_size: usize,
        priority: JobPriority,
        tags: HashSet<String>,
    ) -> Result<Vec<BatchReport>> {
        let batch_size = batch_size.max(1);
        let mut reports = Vec::new();
        let chunks: Vec<Vec<BatchItem>> = items
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let name = format!("{}-{}-of-{}", name_prefix, index + 1, total.max(1));
            let report = self
                .submit_batch(chunk, Some(name), priority, tags.clone())
                .await?;
            reports.push(report);
        }

        Ok(reports)
    }

    /// Re-derive a batch's completion from the queue's terminal statuses.
    ///
    /// The completed flag flips exactly once, the first time every enqueued
    /// job id is terminal; items that never made it into the queue count as
    /// settled from the start.
    pub async fn check_batch_status(&self, batch_id: BatchId) -> Result<BatchReport> {
        let mut reports = self.reports.write().await;
        let report = reports
            .get_mut(&batch_id)
            .ok_or_else(|| AppError::NotFound(format!("Batch {} not found", batch_id)))?;

        let mut all_terminal = true;
        for job_id in report.job_ids.clone() {
            match report.item_outcomes.get(&job_id) {
                Some(BatchItemOutcome::Enqueued) => {}
                _ => continue,
            }
            match self.queue.job_status(job_id).await {
                Ok(status) => {
                    report.item_status.insert(job_id, status);
                    if !status.is_terminal() {
                        all_terminal = false;
                    }
                }
                Err(_) => {
                    // The queue no longer knows this id; nothing to wait on
                    warn!("Batch {}: job {} unknown to queue", batch_id, job_id);
                }
            }
        }

        if all_terminal && report.mark_completed() {
            info!("Batch {} ({}) completed", report.id, report.name);
            if let Err(e) = self.store.save_batch_report(report).await {
                warn!("Could not persist final report for batch {}: {}", batch_id, e);
            }
        }

        Ok(report.clone())
    }

    /// All known batch reports.
    pub async fn reports(&self) -> Vec<BatchReport> {
        self.reports.read().await.values().cloned().collect()
    }

    pub async fn get_report(&self, batch_id: BatchId) -> Result<BatchReport> {
        self.reports
            .read()
            .await
            .get(&batch_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Batch {} not found", batch_id)))
    }
}
