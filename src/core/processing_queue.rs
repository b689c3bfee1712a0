//! Priority job queue for managing extraction work
//!
//! This module provides the thread-safe holding area all other components
//! submit work through. Jobs live in per-priority FIFO buckets; a single
//! mutex guards every bucket and registry mutation, and a notify handle
//! wakes blocked dequeuers on each successful enqueue.
//!
//! Ordering is strict across priority levels and FIFO within one level.
//! Retry demotion steps a failing job down one priority level per attempt,
//! which is best-effort fairness only.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::domain::entities::{Job, JobId, JobPriority, JobStatus};
use crate::error::{AppError, Result};

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Per-priority bucket capacities
    pub critical_capacity: usize,
    pub high_capacity: usize,
    pub normal_capacity: usize,
    pub low_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            critical_capacity: 50,
            high_capacity: 200,
            normal_capacity: 500,
            low_capacity: 1000,
        }
    }
}

impl QueueConfig {
    pub fn capacity(&self, priority: JobPriority) -> usize {
        match priority {
            JobPriority::Critical => self.critical_capacity,
            JobPriority::High => self.high_capacity,
            JobPriority::Normal => self.normal_capacity,
            JobPriority::Low => self.low_capacity,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_jobs: usize,
    pub in_queue: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub paused: usize,
    pub jobs_by_bucket: HashMap<JobPriority, usize>,
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_requeued: u64,
    pub paused_all: bool,
}

/// Serialized queue state for crash recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub jobs: Vec<Job>,
    pub buckets: HashMap<JobPriority, Vec<(u64, JobId)>>,
    pub active: HashSet<JobId>,
    pub completed: HashSet<JobId>,
    pub failed: HashSet<JobId>,
    pub cancelled: HashSet<JobId>,
    pub paused: HashSet<JobId>,
    pub global_paused: HashSet<JobId>,
    pub seq: u64,
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_requeued: u64,
    pub paused_all: bool,
    pub tag_filter: Option<HashSet<String>>,
}

/// Everything behind the queue lock.
///
/// Jobs are only ever handed out as clones; external code cannot mutate the
/// registry or bypass the status state machine.
struct QueueState {
    /// Per-priority FIFO buckets of (tie-break seq, job id)
    buckets: HashMap<JobPriority, VecDeque<(u64, JobId)>>,
    /// Registry of every job seen this process lifetime
    jobs: HashMap<JobId, Job>,
    /// Ids currently being processed by a worker
    active: HashSet<JobId>,
    completed: HashSet<JobId>,
    failed: HashSet<JobId>,
    cancelled: HashSet<JobId>,
    /// All paused ids (individually paused and swept by pause_all)
    paused: HashSet<JobId>,
    /// Subset of `paused` that pause_all is responsible for
    global_paused: HashSet<JobId>,
    /// Monotonic enqueue counter used as the FIFO tie-break key
    seq: u64,
    total_enqueued: u64,
    total_completed: u64,
    total_failed: u64,
    total_cancelled: u64,
    total_requeued: u64,
    paused_all: bool,
    shutdown: bool,
    tag_filter: Option<HashSet<String>>,
}

impl QueueState {
    fn new() -> Self {
        let mut buckets = HashMap::new();
        for priority in JobPriority::DESCENDING {
            buckets.insert(priority, VecDeque::new());
        }
        Self {
            buckets,
            jobs: HashMap::new(),
            active: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            cancelled: HashSet::new(),
            paused: HashSet::new(),
            global_paused: HashSet::new(),
            seq: 0,
            total_enqueued: 0,
            total_completed: 0,
            total_failed: 0,
            total_cancelled: 0,
            total_requeued: 0,
            paused_all: false,
            shutdown: false,
            tag_filter: None,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Remove an id from whichever bucket holds it. Position scans are O(n)
    /// over one bucket, which is acceptable at the configured capacities.
    fn remove_from_bucket(&mut self, job_id: JobId, priority: JobPriority) -> bool {
        if let Some(bucket) = self.buckets.get_mut(&priority) {
            if let Some(idx) = bucket.iter().position(|(_, id)| *id == job_id) {
                bucket.remove(idx);
                return true;
            }
        }
        false
    }

    fn bucket_contains(&self, job_id: JobId, priority: JobPriority) -> bool {
        self.buckets
            .get(&priority)
            .map(|b| b.iter().any(|(_, id)| *id == job_id))
            .unwrap_or(false)
    }

    /// Take the oldest non-paused entry of the first non-empty bucket,
    /// scanning Critical -> Low. Paused ids keep their bucket position.
    fn take_next(&mut self) -> Option<Job> {
        for priority in JobPriority::DESCENDING {
            loop {
                let idx = {
                    let bucket = match self.buckets.get(&priority) {
                        Some(b) => b,
                        None => break,
                    };
                    match bucket.iter().position(|(_, id)| !self.paused.contains(id)) {
                        Some(idx) => idx,
                        None => break,
                    }
                };
                let (_, job_id) = match self.buckets.get_mut(&priority).and_then(|b| b.remove(idx))
                {
                    Some(entry) => entry,
                    None => break,
                };
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    if job.transition_to(JobStatus::Processing).is_ok() {
                        self.active.insert(job_id);
                        return Some(job.clone());
                    }
                }
                // Stale bucket entry; keep scanning this bucket
                warn!("Dropping stale queue entry for job {}", job_id);
            }
        }
        None
    }
}

/// Thread-safe priority work queue.
pub struct ProcessingQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    config: QueueConfig,
}

impl ProcessingQueue {
    /// Create a new queue
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            notify: Notify::new(),
            config,
        }
    }

    /// Create with default configuration
    pub fn with_default_config() -> Self {
        Self::new(QueueConfig::default())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Restrict the queue to jobs sharing at least one tag with the filter.
    pub async fn set_tag_filter(&self, filter: Option<HashSet<String>>) {
        let mut state = self.state.lock().await;
        state.tag_filter = filter;
    }

    /// Enqueue a job.
    ///
    /// Returns `Ok(true)` when the job was accepted, `Ok(false)` when it was
    /// rejected without error (duplicate id, or excluded by the tag filter),
    /// and `Err(QueueFull)` when the priority bucket is at capacity.
    pub async fn enqueue(&self, mut job: Job) -> Result<bool> {
        let mut state = self.state.lock().await;

        if state.jobs.contains_key(&job.id) {
            debug!("Rejecting duplicate job id {}", job.id);
            return Ok(false);
        }

        if let Some(filter) = &state.tag_filter {
            if !filter.is_empty() && job.tags.is_disjoint(filter) {
                debug!("Job {} excluded by tag filter", job.id);
                return Ok(false);
            }
        }

        let capacity = self.config.capacity(job.priority);
        let bucket_len = state
            .buckets
            .get(&job.priority)
            .map(|b| b.len())
            .unwrap_or(0);
        if bucket_len >= capacity {
            return Err(AppError::QueueFull {
                priority: job.priority,
                capacity,
            });
        }

        job.transition_to(JobStatus::InQueue)?;
        let seq = state.next_seq();
        let priority = job.priority;
        let job_id = job.id;
        state
            .buckets
            .get_mut(&priority)
            .expect("bucket exists for every priority")
            .push_back((seq, job_id));
        state.jobs.insert(job_id, job);
        state.total_enqueued += 1;
        drop(state);

        self.notify.notify_one();
        debug!("Enqueued job {} with priority {:?}", job_id, priority);
        Ok(true)
    }

    /// Dequeue the next job, waiting up to `wait` for work to arrive.
    ///
    /// Returns `Ok(None)` on timeout, shutdown, or while globally paused --
    /// never an error for the expected no-work case.
    pub async fn dequeue(&self, wait: Duration) -> Result<Option<Job>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            {
                let mut state = self.state.lock().await;
                if state.shutdown {
                    return Ok(None);
                }
                if !state.paused_all {
                    if let Some(job) = state.take_next() {
                        debug!("Dequeued job {}", job.id);
                        return Ok(Some(job));
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
        }
    }

    /// Mark an active job as completed, storing its opaque result.
    pub async fn complete(&self, job_id: JobId, result: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

        job.transition_to(JobStatus::Completed)?;
        job.result = Some(result);
        job.error = None;

        state.active.remove(&job_id);
        state.completed.insert(job_id);
        state.total_completed += 1;

        debug!("Job {} completed", job_id);
        Ok(())
    }

    /// Report an active job as failed.
    ///
    /// While retry budget remains the job is re-enqueued with its priority
    /// demoted one level (floor Low) and `Ok(true)` is returned. Once the
    /// budget is exhausted the job stays terminally failed and `Ok(false)`
    /// is returned.
    pub async fn fail(&self, job_id: JobId, error: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

        job.transition_to(JobStatus::Failed)?;
        job.error = Some(error.to_string());
        state.active.remove(&job_id);

        let requeued = {
            let job = state.jobs.get_mut(&job_id).expect("job present");
            if job.can_retry() {
                job.retries += 1;
                job.priority = job.priority.demote();
                job.completed_at = None;
                job.result = None;
                job.transition_to(JobStatus::Pending)?;
                job.transition_to(JobStatus::InQueue)?;
                true
            } else {
                false
            }
        };

        if requeued {
            let (priority, retries) = {
                let job = &state.jobs[&job_id];
                (job.priority, job.retries)
            };
            let seq = state.next_seq();
            state
                .buckets
                .get_mut(&priority)
                .expect("bucket exists for every priority")
                .push_back((seq, job_id));
            state.total_requeued += 1;
            drop(state);

            self.notify.notify_one();
            info!(
                "Job {} failed, requeued at {:?} (attempt {}): {}",
                job_id, priority, retries, error
            );
            Ok(true)
        } else {
            state.failed.insert(job_id);
            state.total_failed += 1;
            warn!("Job {} failed permanently: {}", job_id, error);
            Ok(false)
        }
    }

    /// Hide a pending job from dequeue without discarding it.
    ///
    /// Legal only from Pending/InQueue; the job keeps its bucket position.
    pub async fn pause(&self, job_id: JobId) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

        if !matches!(job.status, JobStatus::Pending | JobStatus::InQueue) {
            return Err(AppError::InvalidTransition {
                from: job.status,
                to: JobStatus::Paused,
            });
        }
        job.transition_to(JobStatus::Paused)?;
        state.paused.insert(job_id);

        debug!("Job {} paused", job_id);
        Ok(())
    }

    /// Resume an individually paused job.
    pub async fn resume(&self, job_id: JobId) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

        if job.status != JobStatus::Paused {
            return Err(AppError::InvalidTransition {
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        job.transition_to(JobStatus::Pending)?;
        job.transition_to(JobStatus::InQueue)?;
        let priority = job.priority;

        state.paused.remove(&job_id);
        state.global_paused.remove(&job_id);
        if !state.bucket_contains(job_id, priority) {
            let seq = state.next_seq();
            state
                .buckets
                .get_mut(&priority)
                .expect("bucket exists for every priority")
                .push_back((seq, job_id));
        }
        drop(state);

        self.notify.notify_one();
        debug!("Job {} resumed", job_id);
        Ok(())
    }

    /// Pause everything pending; in-flight jobs keep processing.
    ///
    /// Bucket entries are marked in place, so resume_all restores the exact
    /// pending set with its original per-bucket ordering.
    pub async fn pause_all(&self) {
        let mut state = self.state.lock().await;
        state.paused_all = true;

        let pending: Vec<JobId> = state
            .buckets
            .values()
            .flat_map(|b| b.iter().map(|(_, id)| *id))
            .filter(|id| !state.paused.contains(id))
            .collect();
        for job_id in pending {
            if let Some(job) = state.jobs.get_mut(&job_id) {
                if job.transition_to(JobStatus::Paused).is_ok() {
                    state.paused.insert(job_id);
                    state.global_paused.insert(job_id);
                }
            }
        }

        info!("Queue paused ({} jobs held)", state.global_paused.len());
    }

    /// Undo `pause_all`, restoring every job it paused. Individually paused
    /// jobs stay paused.
    pub async fn resume_all(&self) {
        let mut state = self.state.lock().await;
        state.paused_all = false;

        let swept: Vec<JobId> = state.global_paused.drain().collect();
        let mut restored = 0usize;
        for job_id in swept {
            if let Some(job) = state.jobs.get_mut(&job_id) {
                if job.status == JobStatus::Paused
                    && job.transition_to(JobStatus::Pending).is_ok()
                    && job.transition_to(JobStatus::InQueue).is_ok()
                {
                    state.paused.remove(&job_id);
                    restored += 1;
                }
            }
        }
        drop(state);

        self.notify.notify_waiters();
        info!("Queue resumed ({} jobs restored)", restored);
    }

    /// Cancel a job. Legal unless the job is already terminal.
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

        let priority = job.priority;
        job.transition_to(JobStatus::Cancelled)?;

        state.remove_from_bucket(job_id, priority);
        state.active.remove(&job_id);
        state.paused.remove(&job_id);
        state.global_paused.remove(&job_id);
        state.cancelled.insert(job_id);
        state.total_cancelled += 1;

        info!("Job {} cancelled", job_id);
        Ok(())
    }

    /// Get a job by id (cloned snapshot)
    pub async fn get_job(&self, job_id: JobId) -> Result<Job> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }

    /// Get a job's current status
    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatus> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .map(|j| j.status)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }

    /// Get queue statistics
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats {
            total_jobs: state.jobs.len(),
            total_enqueued: state.total_enqueued,
            total_completed: state.total_completed,
            total_failed: state.total_failed,
            total_cancelled: state.total_cancelled,
            total_requeued: state.total_requeued,
            paused_all: state.paused_all,
            ..Default::default()
        };

        for job in state.jobs.values() {
            match job.status {
                JobStatus::InQueue => stats.in_queue += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
                JobStatus::Paused => stats.paused += 1,
                JobStatus::Pending => {}
            }
        }
        for (priority, bucket) in &state.buckets {
            stats.jobs_by_bucket.insert(*priority, bucket.len());
        }

        stats
    }

    /// Signal shutdown: every blocked and future dequeue returns `None`.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutdown = true;
        drop(state);
        self.notify.notify_waiters();
        info!("Processing queue shut down");
    }

    /// Serialize the complete queue state.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        QueueSnapshot {
            jobs: state.jobs.values().cloned().collect(),
            buckets: state
                .buckets
                .iter()
                .map(|(p, b)| (*p, b.iter().cloned().collect()))
                .collect(),
            active: state.active.clone(),
            completed: state.completed.clone(),
            failed: state.failed.clone(),
            cancelled: state.cancelled.clone(),
            paused: state.paused.clone(),
            global_paused: state.global_paused.clone(),
            seq: state.seq,
            total_enqueued: state.total_enqueued,
            total_completed: state.total_completed,
            total_failed: state.total_failed,
            total_cancelled: state.total_cancelled,
            total_requeued: state.total_requeued,
            paused_all: state.paused_all,
            tag_filter: state.tag_filter.clone(),
        }
    }

    /// Replace the queue state with a snapshot, reproducing it exactly.
    ///
    /// Jobs that were mid-flight at snapshot time stay in the active set
    /// until `recover_interrupted` is called.
    pub async fn restore(&self, snapshot: QueueSnapshot) -> Result<()> {
        let mut state = self.state.lock().await;

        let mut buckets: HashMap<JobPriority, VecDeque<(u64, JobId)>> = HashMap::new();
        for priority in JobPriority::DESCENDING {
            buckets.insert(
                priority,
                snapshot
                    .buckets
                    .get(&priority)
                    .map(|b| b.iter().cloned().collect())
                    .unwrap_or_default(),
            );
        }

        state.buckets = buckets;
        state.jobs = snapshot.jobs.into_iter().map(|j| (j.id, j)).collect();
        state.active = snapshot.active;
        state.completed = snapshot.completed;
        state.failed = snapshot.failed;
        state.cancelled = snapshot.cancelled;
        state.paused = snapshot.paused;
        state.global_paused = snapshot.global_paused;
        state.seq = snapshot.seq;
        state.total_enqueued = snapshot.total_enqueued;
        state.total_completed = snapshot.total_completed;
        state.total_failed = snapshot.total_failed;
        state.total_cancelled = snapshot.total_cancelled;
        state.total_requeued = snapshot.total_requeued;
        state.paused_all = snapshot.paused_all;
        state.tag_filter = snapshot.tag_filter;
        drop(state);

        self.notify.notify_waiters();
        info!("Queue state restored from snapshot");
        Ok(())
    }

    /// Re-queue jobs that were mid-Processing in a restored snapshot.
    ///
    /// Interruption does not consume retry budget; the jobs go back to their
    /// bucket at their current priority. Returns the number recovered.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let interrupted: Vec<JobId> = state.active.drain().collect();
        let mut recovered = 0usize;

        for job_id in interrupted {
            let priority = {
                let job = match state.jobs.get_mut(&job_id) {
                    Some(j) => j,
                    None => continue,
                };
                if job.status != JobStatus::Processing {
                    continue;
                }
                job.transition_to(JobStatus::Failed)?;
                job.error = Some("interrupted by shutdown".to_string());
                job.completed_at = None;
                job.transition_to(JobStatus::Pending)?;
                job.transition_to(JobStatus::InQueue)?;
                job.priority
            };
            let seq = state.next_seq();
            state
                .buckets
                .get_mut(&priority)
                .expect("bucket exists for every priority")
                .push_back((seq, job_id));
            recovered += 1;
        }
        drop(state);

        if recovered > 0 {
            self.notify.notify_waiters();
            info!("Recovered {} interrupted jobs", recovered);
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_job(key: &str, priority: JobPriority) -> Job {
        Job::new(key, format!("/data/{}.pdf", key)).with_priority(priority)
    }

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_enqueue_dequeue() {
        let queue = ProcessingQueue::with_default_config();
        let job = create_test_job("PROD-1", JobPriority::Normal);
        let job_id = job.id;

        assert!(queue.enqueue(job).await.unwrap());

        let dequeued = queue.dequeue(WAIT).await.unwrap().unwrap();
        assert_eq!(dequeued.id, job_id);
        assert_eq!(dequeued.status, JobStatus::Processing);
        assert!(dequeued.started_at.is_some());
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = ProcessingQueue::with_default_config();

        let a = create_test_job("A", JobPriority::Normal);
        let b = create_test_job("B", JobPriority::High);
        let c = create_test_job("C", JobPriority::Normal);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);

        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();
        queue.enqueue(c).await.unwrap();

        // B first despite being enqueued after A, then A, then C
        assert_eq!(queue.dequeue(WAIT).await.unwrap().unwrap().id, b_id);
        assert_eq!(queue.dequeue(WAIT).await.unwrap().unwrap().id, a_id);
        assert_eq!(queue.dequeue(WAIT).await.unwrap().unwrap().id, c_id);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = ProcessingQueue::with_default_config();

        let mut ids = Vec::new();
        for i in 0..5 {
            let job = create_test_job(&format!("PROD-{}", i), JobPriority::Normal);
            ids.push(job.id);
            queue.enqueue(job).await.unwrap();
        }

        for expected in ids {
            assert_eq!(queue.dequeue(WAIT).await.unwrap().unwrap().id, expected);
        }
    }

    #[tokio::test]
    async fn test_queue_full() {
        let queue = ProcessingQueue::new(QueueConfig {
            normal_capacity: 2,
            ..Default::default()
        });

        queue
            .enqueue(create_test_job("PROD-1", JobPriority::Normal))
            .await
            .unwrap();
        queue
            .enqueue(create_test_job("PROD-2", JobPriority::Normal))
            .await
            .unwrap();

        let result = queue
            .enqueue(create_test_job("PROD-3", JobPriority::Normal))
            .await;
        assert!(matches!(
            result,
            Err(AppError::QueueFull {
                priority: JobPriority::Normal,
                capacity: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_id_is_skipped_not_error() {
        let queue = ProcessingQueue::with_default_config();
        let job = create_test_job("PROD-1", JobPriority::Normal);
        let dup = job.clone();

        assert!(queue.enqueue(job).await.unwrap());
        assert!(!queue.enqueue(dup).await.unwrap());
    }

    #[tokio::test]
    async fn test_tag_filter_silently_rejects() {
        let queue = ProcessingQueue::with_default_config();
        queue
            .set_tag_filter(Some(["invoices".to_string()].into_iter().collect()))
            .await;

        let tagged = create_test_job("PROD-1", JobPriority::Normal)
            .with_tags(["invoices".to_string()]);
        let untagged = create_test_job("PROD-2", JobPriority::Normal);

        assert!(queue.enqueue(tagged).await.unwrap());
        assert!(!queue.enqueue(untagged).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_moves_job_out_of_active() {
        let queue = ProcessingQueue::with_default_config();
        let job = create_test_job("PROD-1", JobPriority::Normal);
        let job_id = job.id;

        queue.enqueue(job).await.unwrap();
        queue.dequeue(WAIT).await.unwrap().unwrap();
        queue
            .complete(job_id, serde_json::json!({"text": "extracted"}))
            .await
            .unwrap();

        let job = queue.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.result.is_some());
        assert!(job.completed_at.is_some());

        let stats = queue.stats().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn test_fail_requeues_with_demotion() {
        let queue = ProcessingQueue::with_default_config();
        let job = create_test_job("PROD-1", JobPriority::High).with_max_retries(2);
        let job_id = job.id;

        queue.enqueue(job).await.unwrap();
        queue.dequeue(WAIT).await.unwrap().unwrap();

        let requeued = queue.fail(job_id, "backend timeout").await.unwrap();
        assert!(requeued);

        let job = queue.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::InQueue);
        assert_eq!(job.retries, 1);
        assert_eq!(job.priority, JobPriority::Normal);
        assert_eq!(job.error.as_deref(), Some("backend timeout"));
    }

    #[tokio::test]
    async fn test_retries_exhaust_to_terminal_failure() {
        let queue = ProcessingQueue::with_default_config();
        let job = create_test_job("D", JobPriority::Normal).with_max_retries(2);
        let job_id = job.id;

        queue.enqueue(job).await.unwrap();

        // Three failures against max_retries = 2
        for attempt in 0..3 {
            let dequeued = queue.dequeue(WAIT).await.unwrap();
            assert!(dequeued.is_some(), "attempt {} should dequeue", attempt);
            queue.fail(job_id, "boom").await.unwrap();
        }

        let job = queue.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 2);

        // The job never reappears
        assert!(queue.dequeue(WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pause_hides_job_in_place() {
        let queue = ProcessingQueue::with_default_config();
        let first = create_test_job("PROD-1", JobPriority::Normal);
        let second = create_test_job("PROD-2", JobPriority::Normal);
        let (first_id, second_id) = (first.id, second.id);

        queue.enqueue(first).await.unwrap();
        queue.enqueue(second).await.unwrap();
        queue.pause(first_id).await.unwrap();

        // Dequeue skips the paused job
        assert_eq!(queue.dequeue(WAIT).await.unwrap().unwrap().id, second_id);
        assert!(queue.dequeue(WAIT).await.unwrap().is_none());

        queue.resume(first_id).await.unwrap();
        assert_eq!(queue.dequeue(WAIT).await.unwrap().unwrap().id, first_id);
    }

    #[tokio::test]
    async fn test_pause_requires_pending_state() {
        let queue = ProcessingQueue::with_default_config();
        let job = create_test_job("PROD-1", JobPriority::Normal);
        let job_id = job.id;

        queue.enqueue(job).await.unwrap();
        queue.dequeue(WAIT).await.unwrap().unwrap();

        // Processing jobs cannot be paused individually
        assert!(matches!(
            queue.pause(job_id).await,
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_pause_all_resume_all_preserves_order() {
        let queue = ProcessingQueue::with_default_config();

        let mut ids = Vec::new();
        for i in 0..4 {
            let job = create_test_job(&format!("PROD-{}", i), JobPriority::Normal);
            ids.push(job.id);
            queue.enqueue(job).await.unwrap();
        }

        queue.pause_all().await;
        assert!(queue.dequeue(WAIT).await.unwrap().is_none());

        queue.resume_all().await;
        for expected in ids {
            assert_eq!(queue.dequeue(WAIT).await.unwrap().unwrap().id, expected);
        }
    }

    #[tokio::test]
    async fn test_resume_all_leaves_individually_paused_jobs() {
        let queue = ProcessingQueue::with_default_config();
        let held = create_test_job("PROD-1", JobPriority::Normal);
        let free = create_test_job("PROD-2", JobPriority::Normal);
        let (held_id, free_id) = (held.id, free.id);

        queue.enqueue(held).await.unwrap();
        queue.enqueue(free).await.unwrap();
        queue.pause(held_id).await.unwrap();

        queue.pause_all().await;
        queue.resume_all().await;

        assert_eq!(queue.dequeue(WAIT).await.unwrap().unwrap().id, free_id);
        assert!(queue.dequeue(WAIT).await.unwrap().is_none());
        assert_eq!(
            queue.job_status(held_id).await.unwrap(),
            JobStatus::Paused
        );
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let queue = ProcessingQueue::with_default_config();
        let job = create_test_job("PROD-1", JobPriority::Normal);
        let job_id = job.id;

        queue.enqueue(job).await.unwrap();
        queue.cancel(job_id).await.unwrap();

        assert_eq!(
            queue.job_status(job_id).await.unwrap(),
            JobStatus::Cancelled
        );
        assert!(queue.dequeue(WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_rejected() {
        let queue = ProcessingQueue::with_default_config();
        let job = create_test_job("PROD-1", JobPriority::Normal);
        let job_id = job.id;

        queue.enqueue(job).await.unwrap();
        queue.dequeue(WAIT).await.unwrap().unwrap();
        queue.complete(job_id, serde_json::json!({})).await.unwrap();

        assert!(matches!(
            queue.cancel(job_id).await,
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let queue = ProcessingQueue::with_default_config();
        let bogus = uuid::Uuid::new_v4();

        assert!(matches!(
            queue.complete(bogus, serde_json::json!({})).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            queue.fail(bogus, "x").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            queue.cancel(bogus).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_enqueue_wakes_blocked_dequeuer() {
        let queue = std::sync::Arc::new(ProcessingQueue::with_default_config());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = create_test_job("PROD-1", JobPriority::Normal);
        let job_id = job.id;
        queue.enqueue(job).await.unwrap();

        let dequeued = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(dequeued.id, job_id);
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_dequeue() {
        let queue = std::sync::Arc::new(ProcessingQueue::with_default_config());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown().await;

        assert!(waiter.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_restore_equivalence() {
        let queue = ProcessingQueue::with_default_config();

        let mut pending_ids = Vec::new();
        for (i, priority) in [JobPriority::High, JobPriority::Normal, JobPriority::Normal]
            .iter()
            .enumerate()
        {
            let job = create_test_job(&format!("PROD-{}", i), *priority);
            pending_ids.push((job.id, *priority));
            queue.enqueue(job).await.unwrap();
        }

        // One completed, one paused
        let done = create_test_job("PROD-DONE", JobPriority::Critical);
        let done_id = done.id;
        queue.enqueue(done).await.unwrap();
        queue.dequeue(WAIT).await.unwrap().unwrap();
        queue.complete(done_id, serde_json::json!({"ok": true})).await.unwrap();
        queue.pause(pending_ids[0].0).await.unwrap();

        let before = queue.stats().await;
        let snapshot = queue.snapshot().await;

        // Round-trip through JSON like the snapshot store does
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: QueueSnapshot = serde_json::from_str(&encoded).unwrap();

        let fresh = ProcessingQueue::with_default_config();
        fresh.restore(decoded).await.unwrap();

        let after = fresh.stats().await;
        assert_eq!(before.in_queue, after.in_queue);
        assert_eq!(before.completed, after.completed);
        assert_eq!(before.paused, after.paused);
        assert_eq!(before.total_enqueued, after.total_enqueued);

        // Pending order is preserved: the two unpaused normal jobs in order
        assert_eq!(
            fresh.dequeue(WAIT).await.unwrap().unwrap().id,
            pending_ids[1].0
        );
        assert_eq!(
            fresh.dequeue(WAIT).await.unwrap().unwrap().id,
            pending_ids[2].0
        );
    }

    #[tokio::test]
    async fn test_recover_interrupted_requeues_active_jobs() {
        let queue = ProcessingQueue::with_default_config();
        let job = create_test_job("PROD-1", JobPriority::Normal);
        let job_id = job.id;

        queue.enqueue(job).await.unwrap();
        queue.dequeue(WAIT).await.unwrap().unwrap();

        let snapshot = queue.snapshot().await;
        let fresh = ProcessingQueue::with_default_config();
        fresh.restore(snapshot).await.unwrap();

        // Restore alone does not resubmit the in-flight job
        assert_eq!(
            fresh.job_status(job_id).await.unwrap(),
            JobStatus::Processing
        );
        assert!(fresh.dequeue(WAIT).await.unwrap().is_none());

        let recovered = fresh.recover_interrupted().await.unwrap();
        assert_eq!(recovered, 1);

        let job = fresh.dequeue(WAIT).await.unwrap().unwrap();
        assert_eq!(job.id, job_id);
        // Interruption consumed no retry budget
        assert_eq!(job.retries, 0);
    }
}
