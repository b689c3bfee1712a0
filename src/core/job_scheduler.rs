//! Job scheduler promoting due and recurring work into the queue
//!
//! One-time entries are held as full jobs with a due timestamp; recurring
//! entries are templates a fresh job is stamped from on every due tick.
//! Entries are invisible to the queue until promoted. The scheduler's only
//! external write is `ProcessingQueue::enqueue`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::processing_queue::ProcessingQueue;
use crate::domain::entities::{Job, JobId, JobPriority, RecurringEntry, RecurringId};
use crate::error::{AppError, Result};

/// Serialized scheduler state for crash recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub scheduled: Vec<Job>,
    pub recurring: Vec<RecurringEntry>,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub scheduled_jobs: usize,
    pub recurring_entries: usize,
    pub total_promoted: u64,
    pub total_recurring_runs: u64,
}

struct SchedulerState {
    /// Pending one-time entries, keyed by the job id they will run as
    scheduled: HashMap<JobId, Job>,
    /// Recurring configurations
    recurring: HashMap<RecurringId, RecurringEntry>,
    total_promoted: u64,
    total_recurring_runs: u64,
}

/// Promotes due jobs from an internal holding area into the queue.
pub struct JobScheduler {
    queue: Arc<ProcessingQueue>,
    state: Arc<Mutex<SchedulerState>>,
    tick: Duration,
    running: Arc<AtomicBool>,
    handle: RwLock<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(queue: Arc<ProcessingQueue>, tick: Duration) -> Self {
        Self {
            queue,
            state: Arc::new(Mutex::new(SchedulerState {
                scheduled: HashMap::new(),
                recurring: HashMap::new(),
                total_promoted: 0,
                total_recurring_runs: 0,
            })),
            tick,
            running: Arc::new(AtomicBool::new(false)),
            handle: RwLock::new(None),
        }
    }

    /// Hold a job until `when`, then promote it into the queue.
    pub async fn schedule_once(
        &self,
        correlation_key: impl Into<String>,
        resource_locator: impl Into<String>,
        when: DateTime<Utc>,
        priority: JobPriority,
        tags: HashSet<String>,
    ) -> JobId {
        let job = Job::new(correlation_key, resource_locator)
            .with_priority(priority)
            .with_tags(tags)
            .with_scheduled_for(when);
        let job_id = job.id;

        let mut state = self.state.lock().await;
        state.scheduled.insert(job_id, job);
        debug!("Scheduled job {} for {}", job_id, when);
        job_id
    }

    /// Register a recurring submission. The first run is one interval out.
    pub async fn schedule_recurring(
        &self,
        correlation_key: impl Into<String>,
        resource_locator: impl Into<String>,
        interval_hours: f64,
        priority: JobPriority,
        tags: HashSet<String>,
        max_runs: Option<u32>,
    ) -> RecurringId {
        let entry = RecurringEntry::new(
            correlation_key,
            resource_locator,
            interval_hours,
            priority,
            tags,
            max_runs,
        );
        let recurring_id = entry.id;

        let mut state = self.state.lock().await;
        state.recurring.insert(recurring_id, entry);
        info!(
            "Registered recurring schedule {} every {}h",
            recurring_id, interval_hours
        );
        recurring_id
    }

    /// Remove a pending one-time entry. Already-promoted jobs are not
    /// retracted.
    pub async fn cancel_scheduled(&self, job_id: JobId) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .scheduled
            .remove(&job_id)
            .map(|_| debug!("Cancelled scheduled job {}", job_id))
            .ok_or_else(|| AppError::NotFound(format!("Scheduled job {} not found", job_id)))
    }

    /// Remove a recurring configuration.
    pub async fn cancel_recurring(&self, recurring_id: RecurringId) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .recurring
            .remove(&recurring_id)
            .map(|_| info!("Cancelled recurring schedule {}", recurring_id))
            .ok_or_else(|| {
                AppError::NotFound(format!("Recurring schedule {} not found", recurring_id))
            })
    }

    /// (pending one-time, recurring) entry counts
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.scheduled.len(), state.recurring.len())
    }

    pub async fn stats(&self) -> SchedulerStats {
        let state = self.state.lock().await;
        SchedulerStats {
            scheduled_jobs: state.scheduled.len(),
            recurring_entries: state.recurring.len(),
            total_promoted: state.total_promoted,
            total_recurring_runs: state.total_recurring_runs,
        }
    }

    /// Start the background tick loop. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let queue = self.queue.clone();
        let state = self.state.clone();
        let running = self.running.clone();
        let tick = self.tick;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = Self::run_tick(&queue, &state).await {
                    error!("Scheduler tick error: {}", e);
                }
            }

            info!("Scheduler loop exited");
        });

        *self.handle.write().await = Some(handle);
        info!("Job scheduler started (tick {:?})", self.tick);
    }

    /// Stop the tick loop cooperatively.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.write().await.take() {
            if tokio::time::timeout(self.tick * 2 + Duration::from_millis(100), handle)
                .await
                .is_err()
            {
                warn!("Scheduler loop did not stop in time");
            }
        }
        info!("Job scheduler stopped");
    }

    /// One promotion pass. The background loop calls this on every tick.
    async fn run_tick(
        queue: &Arc<ProcessingQueue>,
        state: &Arc<Mutex<SchedulerState>>,
    ) -> Result<()> {
        let now = Utc::now();

        // Collect due work under the lock, enqueue outside it
        let (due_jobs, due_recurring) = {
            let mut state = state.lock().await;

            let due_ids: Vec<JobId> = state
                .scheduled
                .iter()
                .filter(|(_, job)| job.scheduled_for.map(|when| now >= when).unwrap_or(true))
                .map(|(id, _)| *id)
                .collect();
            let due_jobs: Vec<Job> = due_ids
                .iter()
                .filter_map(|id| state.scheduled.remove(id))
                .collect();

            let mut due_recurring = Vec::new();
            let mut drop_ids: Vec<RecurringId> = Vec::new();
            for entry in state.recurring.values_mut() {
                if entry.exhausted() {
                    drop_ids.push(entry.id);
                    continue;
                }
                if entry.is_due(now) {
                    due_recurring.push(entry.clone());
                    entry.advance();
                    if entry.exhausted() {
                        drop_ids.push(entry.id);
                    }
                }
            }
            for id in drop_ids {
                state.recurring.remove(&id);
                info!("Recurring schedule {} reached max runs, removed", id);
            }

            (due_jobs, due_recurring)
        };

        for job in due_jobs {
            let job_id = job.id;
            match queue.enqueue(job.clone()).await {
                Ok(true) => {
                    let mut state = state.lock().await;
                    state.total_promoted += 1;
                    debug!("Promoted scheduled job {}", job_id);
                }
                Ok(false) => {
                    warn!("Scheduled job {} rejected by queue filter, dropped", job_id);
                }
                Err(AppError::QueueFull { .. }) => {
                    // Keep the entry; it will be retried next tick
                    let mut state = state.lock().await;
                    state.scheduled.insert(job_id, job);
                    warn!("Queue full, deferring scheduled job {}", job_id);
                }
                Err(e) => return Err(e),
            }
        }

        for entry in due_recurring {
            let mut tags = entry.tags.clone();
            tags.insert(format!("recurring:{}", entry.id));
            let job = Job::new(entry.correlation_key.clone(), entry.resource_locator.clone())
                .with_priority(entry.priority)
                .with_tags(tags);
            let job_id = job.id;

            match queue.enqueue(job).await {
                Ok(true) => {
                    let mut state = state.lock().await;
                    state.total_recurring_runs += 1;
                    debug!(
                        "Spawned job {} from recurring schedule {}",
                        job_id, entry.id
                    );
                }
                Ok(false) => {
                    warn!(
                        "Recurring job from {} rejected by queue filter",
                        entry.id
                    );
                }
                Err(AppError::QueueFull { .. }) => {
                    warn!(
                        "Queue full, skipping this run of recurring schedule {}",
                        entry.id
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Serialize both holding collections.
    pub async fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.state.lock().await;
        SchedulerSnapshot {
            scheduled: state.scheduled.values().cloned().collect(),
            recurring: state.recurring.values().cloned().collect(),
        }
    }

    /// Replace both holding collections from a snapshot.
    pub async fn restore(&self, snapshot: SchedulerSnapshot) {
        let mut state = self.state.lock().await;
        state.scheduled = snapshot
            .scheduled
            .into_iter()
            .map(|j| (j.id, j))
            .collect();
        state.recurring = snapshot
            .recurring
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        info!(
            "Scheduler state restored ({} scheduled, {} recurring)",
            state.scheduled.len(),
            state.recurring.len()
        );
    }

    #[cfg(test)]
    pub(crate) async fn tick_once(&self) -> Result<()> {
        Self::run_tick(&self.queue, &self.state).await
    }
}
