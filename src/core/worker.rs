//! Worker task executing jobs against the external processor
//!
//! Each worker repeatedly pulls a job from the processing queue, invokes
//! the processor capability, persists the result through the sink, and
//! reports the outcome back into the queue. Processor errors are contained
//! here and converted into the queue's retry state machine; they never
//! escape the worker task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::processing_queue::ProcessingQueue;
use crate::core::traits::{Processor, ResultSink};
use crate::domain::entities::{Job, JobId};
use crate::error::Result;

/// Individual worker statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Jobs pulled from the queue by this worker
    pub jobs_processed: u64,
    /// Jobs that completed successfully
    pub jobs_succeeded: u64,
    /// Jobs reported as failed
    pub jobs_failed: u64,
    /// Cumulative processing time in milliseconds
    pub total_processing_ms: u64,
    /// Average processing time in milliseconds
    pub avg_processing_ms: f64,
    /// Last time this worker touched a job
    pub last_active: Option<DateTime<Utc>>,
}

/// Point-in-time view of one worker for status aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub name: String,
    pub running: bool,
    pub paused: bool,
    pub current_job: Option<JobId>,
    pub current_key: Option<String>,
    pub stats: WorkerStats,
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bounded wait passed to dequeue
    pub dequeue_wait: Duration,
    /// Backoff after an unexpected loop error
    pub error_backoff: Duration,
    /// Poll interval while paused
    pub pause_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dequeue_wait: Duration::from_millis(500),
            error_backoff: Duration::from_millis(1000),
            pause_poll: Duration::from_millis(100),
        }
    }
}

/// A worker pulling jobs from the queue and executing them.
pub struct Worker {
    name: String,
    queue: Arc<ProcessingQueue>,
    processor: Arc<dyn Processor>,
    sink: Arc<dyn ResultSink>,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    stats: Arc<RwLock<WorkerStats>>,
    current_job: Arc<RwLock<Option<(JobId, String)>>>,
    handle: RwLock<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<ProcessingQueue>,
        processor: Arc<dyn Processor>,
        sink: Arc<dyn ResultSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            processor,
            sink,
            config,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(WorkerStats::default())),
            current_job: Arc::new(RwLock::new(None)),
            handle: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker loop. Idempotent: a running worker is left alone.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let ctx = WorkerContext {
            name: self.name.clone(),
            queue: self.queue.clone(),
            processor: self.processor.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
            running: self.running.clone(),
            paused: self.paused.clone(),
            stats: self.stats.clone(),
            current_job: self.current_job.clone(),
        };

        let handle = tokio::spawn(async move { ctx.run().await });
        *self.handle.write().await = Some(handle);
        info!("Worker {} started", self.name);
    }

    /// Request a cooperative stop. An in-flight processor call finishes
    /// before the flag is observed.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        debug!("Worker {} paused", self.name);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        debug!("Worker {} resumed", self.name);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for the worker task to exit, up to `timeout`. Returns `true`
    /// once the task has finished; `false` on expiry (never an error).
    pub async fn join(&self, timeout: Duration) -> bool {
        let handle = self.handle.write().await.take();
        match handle {
            Some(handle) => match tokio::time::timeout(timeout, handle).await {
                Ok(_) => true,
                Err(_) => {
                    warn!("Worker {} did not stop within {:?}", self.name, timeout);
                    false
                }
            },
            None => true,
        }
    }

    /// Whether the worker loop has exited on its own (task finished while
    /// the running flag is still set).
    pub async fn has_crashed(&self) -> bool {
        let handle = self.handle.read().await;
        match handle.as_ref() {
            Some(h) => h.is_finished() && self.running.load(Ordering::SeqCst),
            None => false,
        }
    }

    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    pub async fn snapshot(&self) -> WorkerSnapshot {
        let current = self.current_job.read().await.clone();
        WorkerSnapshot {
            name: self.name.clone(),
            running: self.running.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            current_job: current.as_ref().map(|(id, _)| *id),
            current_key: current.map(|(_, key)| key),
            stats: self.stats.read().await.clone(),
        }
    }
}

/// Everything the worker loop owns once spawned.
struct WorkerContext {
    name: String,
    queue: Arc<ProcessingQueue>,
    processor: Arc<dyn Processor>,
    sink: Arc<dyn ResultSink>,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    stats: Arc<RwLock<WorkerStats>>,
    current_job: Arc<RwLock<Option<(JobId, String)>>>,
}

impl WorkerContext {
    async fn run(&self) {
        info!("Worker {} loop entered", self.name);

        while self.running.load(Ordering::SeqCst) {
            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(self.config.pause_poll).await;
                continue;
            }

            match self.tick().await {
                Ok(()) => {}
                Err(e) => {
                    // Loop-level faults get a backoff so the task never hot-spins
                    error!("Worker {} loop error: {}", self.name, e);
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        info!("Worker {} loop exited", self.name);
    }

    async fn tick(&self) -> Result<()> {
        let job = match self.queue.dequeue(self.config.dequeue_wait).await? {
            Some(job) => job,
            None => return Ok(()),
        };

        self.process_job(job).await;
        Ok(())
    }

    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        let started = Utc::now();

        *self.current_job.write().await = Some((job_id, job.correlation_key.clone()));
        debug!(
            "Worker {} processing job {} (key {})",
            self.name, job_id, job.correlation_key
        );

        let outcome = self
            .processor
            .process(&job.correlation_key, &job.resource_locator)
            .await;

        let succeeded = match outcome {
            Ok(result) => {
                match self.sink.persist(&job.correlation_key, &result).await {
                    Ok(()) => {
                        if let Err(e) = self.queue.complete(job_id, result).await {
                            // Job may have been cancelled mid-flight
                            warn!("Worker {} could not complete job {}: {}", self.name, job_id, e);
                        }
                        true
                    }
                    Err(e) => {
                        let message = format!("result sink error: {}", e);
                        self.report_failure(job_id, &message).await;
                        false
                    }
                }
            }
            Err(e) => {
                self.report_failure(job_id, &e.to_string()).await;
                false
            }
        };

        // Bookkeeping runs on every path so liveness queries stay accurate
        let elapsed_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
        {
            let mut stats = self.stats.write().await;
            stats.jobs_processed += 1;
            if succeeded {
                stats.jobs_succeeded += 1;
            } else {
                stats.jobs_failed += 1;
            }
            stats.total_processing_ms += elapsed_ms;
            stats.avg_processing_ms =
                stats.total_processing_ms as f64 / stats.jobs_processed as f64;
            stats.last_active = Some(Utc::now());
        }
        *self.current_job.write().await = None;
    }

    async fn report_failure(&self, job_id: JobId, message: &str) {
        match self.queue.fail(job_id, message).await {
            Ok(true) => debug!("Worker {} requeued job {}", self.name, job_id),
            Ok(false) => debug!("Worker {} saw job {} fail terminally", self.name, job_id),
            Err(e) => warn!(
                "Worker {} could not report failure for job {}: {}",
                self.name, job_id, e
            ),
        }
    }
}
