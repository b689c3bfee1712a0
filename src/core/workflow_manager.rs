//! Top-level workflow orchestration
//!
//! The workflow manager is the single entry point owning one processing
//! queue, a fixed worker pool, one scheduler and one batch processor. It
//! coordinates lifecycle (start/stop/pause/resume), aggregates status and
//! persists snapshots for crash resumption.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::WorkflowConfig;
use crate::core::batch_processor::BatchProcessor;
use crate::core::job_scheduler::JobScheduler;
use crate::core::processing_queue::{ProcessingQueue, QueueConfig, QueueStats};
use crate::core::traits::{Processor, ResultSink};
use crate::core::worker::{Worker, WorkerConfig, WorkerSnapshot};
use crate::domain::entities::{BatchReport, Job, JobId, JobPriority};
use crate::error::{AppError, Result};
use crate::storage::SnapshotStore;

/// Aggregated point-in-time view of the whole workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub running: bool,
    pub paused: bool,
    pub queue: QueueStats,
    pub workers: Vec<WorkerSnapshot>,
    pub batches: Vec<BatchReport>,
    pub scheduled_jobs: usize,
    pub recurring_entries: usize,
}

/// Owns the queue, worker pool, scheduler and batch processor.
pub struct WorkflowManager {
    config: WorkflowConfig,
    queue: Arc<ProcessingQueue>,
    scheduler: Arc<JobScheduler>,
    batches: Arc<BatchProcessor>,
    workers: Vec<Arc<Worker>>,
    processor: Arc<dyn Processor>,
    store: SnapshotStore,
    running: Mutex<bool>,
    paused: AtomicBool,
}

impl WorkflowManager {
    pub fn new(
        config: WorkflowConfig,
        processor: Arc<dyn Processor>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let queue = Arc::new(ProcessingQueue::new(QueueConfig {
            critical_capacity: config.critical_queue_size,
            high_capacity: config.high_queue_size,
            normal_capacity: config.normal_queue_size,
            low_capacity: config.low_queue_size,
        }));
        let store = SnapshotStore::new(config.snapshot_dir.clone());
        let scheduler = Arc::new(JobScheduler::new(
            queue.clone(),
            Duration::from_millis(config.scheduler_tick_ms),
        ));
        let batches = Arc::new(BatchProcessor::new(
            queue.clone(),
            store.clone(),
            config.default_max_retries,
        ));

        let worker_config = WorkerConfig {
            dequeue_wait: Duration::from_millis(config.dequeue_wait_ms),
            error_backoff: Duration::from_millis(config.worker_backoff_ms),
            ..Default::default()
        };
        let workers = (0..config.worker_count.max(1))
            .map(|i| {
                Arc::new(Worker::new(
                    format!("worker-{}", i),
                    queue.clone(),
                    processor.clone(),
                    sink.clone(),
                    worker_config.clone(),
                ))
            })
            .collect();

        Self {
            config,
            queue,
            scheduler,
            batches,
            workers,
            processor,
            store,
            running: Mutex::new(false),
            paused: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> Arc<ProcessingQueue> {
        self.queue.clone()
    }

    pub fn scheduler(&self) -> Arc<JobScheduler> {
        self.scheduler.clone()
    }

    pub fn batches(&self) -> Arc<BatchProcessor> {
        self.batches.clone()
    }

    /// Build and enqueue a single job. Returns the job id, or `None` when
    /// the queue rejected it without error (duplicate id, tag filter).
    pub async fn submit(
        &self,
        correlation_key: impl Into<String>,
        resource_locator: impl Into<String>,
        priority: JobPriority,
        tags: HashSet<String>,
    ) -> Result<Option<JobId>> {
        let job = Job::new(correlation_key, resource_locator)
            .with_priority(priority)
            .with_max_retries(self.config.default_max_retries)
            .with_tags(tags);
        let job_id = job.id;
        Ok(self.queue.enqueue(job).await?.then_some(job_id))
    }

    /// Start the scheduler and every worker. Idempotent.
    ///
    /// The processor backend is probed first; an unreachable backend aborts
    /// startup with `StartupFailure` and nothing is started.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if *running {
            return Ok(());
        }

        self.processor.health_check().await.map_err(|e| {
            error!("Processor backend unreachable, aborting startup: {}", e);
            AppError::StartupFailure(format!("processor backend unreachable: {}", e))
        })?;

        if self.config.resume_from_snapshot {
            self.restore_state().await;
        }

        self.scheduler.start().await;
        for worker in &self.workers {
            worker.start().await;
        }

        *running = true;
        info!(
            "🚀 Workflow manager started ({} workers, snapshots in {})",
            self.workers.len(),
            self.config.snapshot_dir
        );
        Ok(())
    }

    /// Stop everything cooperatively and persist a full snapshot.
    /// Idempotent; construct a new manager to run again after a stop.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if !*running {
            return Ok(());
        }
        *running = false;

        self.scheduler.stop().await;
        for worker in &self.workers {
            worker.stop();
        }
        self.queue.shutdown().await;

        let join_timeout = Duration::from_millis(self.config.dequeue_wait_ms * 4 + 1000);
        let joins = self
            .workers
            .iter()
            .map(|worker| worker.join(join_timeout));
        futures::future::join_all(joins).await;

        // Best-effort persistence; a failed write never blocks shutdown
        let queue_snapshot = self.queue.snapshot().await;
        if let Err(e) = self.store.save_queue(&queue_snapshot).await {
            warn!("Could not persist queue snapshot: {}", e);
        }
        let scheduler_snapshot = self.scheduler.snapshot().await;
        if let Err(e) = self.store.save_scheduler(&scheduler_snapshot).await {
            warn!("Could not persist scheduler snapshot: {}", e);
        }

        let stats = self.queue.stats().await;
        info!(
            "📊 Workflow stopped: {} enqueued, {} completed, {} failed, {} cancelled, {} still pending",
            stats.total_enqueued,
            stats.total_completed,
            stats.total_failed,
            stats.total_cancelled,
            stats.in_queue + stats.paused
        );
        Ok(())
    }

    /// Pause job intake and every worker; the scheduler keeps running and
    /// promoted jobs simply sit paused.
    pub async fn pause(&self) {
        self.queue.pause_all().await;
        for worker in &self.workers {
            worker.pause();
        }
        self.paused.store(true, Ordering::SeqCst);
        info!("Workflow paused");
    }

    pub async fn resume(&self) {
        self.queue.resume_all().await;
        for worker in &self.workers {
            worker.resume();
        }
        self.paused.store(false, Ordering::SeqCst);
        info!("Workflow resumed");
    }

    /// Aggregate status across queue, workers, batches and scheduler.
    /// Read-only; safe to call concurrently with everything else.
    pub async fn get_status(&self) -> WorkflowStatus {
        let mut workers = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let mut snapshot = worker.snapshot().await;
            if worker.has_crashed().await {
                warn!("Worker {} task has died; pool is running reduced", snapshot.name);
                snapshot.running = false;
            }
            workers.push(snapshot);
        }

        let (scheduled_jobs, recurring_entries) = self.scheduler.counts().await;

        WorkflowStatus {
            running: *self.running.lock().await,
            paused: self.paused.load(Ordering::SeqCst),
            queue: self.queue.stats().await,
            workers,
            batches: self.batches.reports().await,
            scheduled_jobs,
            recurring_entries,
        }
    }

    async fn restore_state(&self) {
        match self.store.load_queue().await {
            Ok(Some(snapshot)) => {
                if let Err(e) = self.queue.restore(snapshot).await {
                    warn!("Queue restore failed: {}", e);
                } else {
                    match self.queue.recover_interrupted().await {
                        Ok(recovered) if recovered > 0 => {
                            info!("Requeued {} jobs interrupted by the previous run", recovered)
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Could not recover interrupted jobs: {}", e),
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not load queue snapshot: {}", e),
        }

        match self.store.load_scheduler().await {
            Ok(Some(snapshot)) => self.scheduler.restore(snapshot).await,
            Ok(None) => {}
            Err(e) => warn!("Could not load scheduler snapshot: {}", e),
        }
    }
}
