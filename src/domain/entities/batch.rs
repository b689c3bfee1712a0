//! Batch tracking entities
//!
//! A batch is a named group of jobs submitted together and tracked as a
//! unit. The job-id list is immutable after submission; only per-item
//! outcomes and the completion flag change afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::job::{BatchId, JobId, JobStatus};

/// Per-item submission outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BatchItemOutcome {
    /// Item was accepted into the queue
    Enqueued,
    /// Item was rejected without error (duplicate id, tag filter)
    Skipped { reason: String },
    /// Enqueue failed outright
    Error { message: String },
}

/// Aggregate report for a submitted batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Batch identifier
    pub id: BatchId,
    /// Human-readable batch name
    pub name: String,
    /// Job ids in submission order; fixed at submission time
    pub job_ids: Vec<JobId>,
    /// Submission outcome per job id
    pub item_outcomes: HashMap<JobId, BatchItemOutcome>,
    /// Last observed status per job id
    pub item_status: HashMap<JobId, JobStatus>,
    /// Number of items submitted
    pub total: usize,
    /// Items accepted into the queue
    pub enqueued: usize,
    /// Items skipped (duplicates, tag filter)
    pub skipped: usize,
    /// Items that failed to enqueue
    pub errors: usize,
    /// Submission timestamp
    pub created_at: DateTime<Utc>,
    /// Whether every job id has reached a terminal status
    pub completed: bool,
    /// Timestamp of the completion flip
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            job_ids: Vec::new(),
            item_outcomes: HashMap::new(),
            item_status: HashMap::new(),
            total: 0,
            enqueued: 0,
            skipped: 0,
            errors: 0,
            created_at: Utc::now(),
            completed: false,
            completed_at: None,
        }
    }

    /// Record the submission outcome for one item.
    pub fn record_item(&mut self, job_id: JobId, outcome: BatchItemOutcome) {
        self.total += 1;
        match &outcome {
            BatchItemOutcome::Enqueued => self.enqueued += 1,
            BatchItemOutcome::Skipped { .. } => self.skipped += 1,
            BatchItemOutcome::Error { .. } => self.errors += 1,
        }
        self.job_ids.push(job_id);
        self.item_outcomes.insert(job_id, outcome);
    }

    /// Mark the batch completed. Returns true only on the first call.
    pub fn mark_completed(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.completed_at = Some(Utc::now());
        true
    }
}
