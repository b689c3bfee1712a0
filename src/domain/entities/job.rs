//! Job domain entities and types
//!
//! This module defines the core job entity, its status state machine, and
//! the priority levels used for queue selection and retry demotion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Unique identifier for a job
pub type JobId = Uuid;

/// Unique identifier for a batch
pub type BatchId = Uuid;

/// Unique identifier for a recurring schedule
pub type RecurringId = Uuid;

/// Job priority levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd, Eq, Ord, Hash)]
pub enum JobPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl JobPriority {
    /// All priority levels in dequeue scan order (highest first).
    pub const DESCENDING: [JobPriority; 4] = [
        JobPriority::Critical,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ];

    /// Step down one level, saturating at Low. Used for retry demotion.
    pub fn demote(self) -> JobPriority {
        match self {
            JobPriority::Critical => JobPriority::High,
            JobPriority::High => JobPriority::Normal,
            JobPriority::Normal => JobPriority::Low,
            JobPriority::Low => JobPriority::Low,
        }
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Job exists but has not been enqueued yet
    Pending,
    /// Job is waiting in a priority bucket
    InQueue,
    /// Job is being executed by a worker
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed
    Failed,
    /// Job was cancelled
    Cancelled,
    /// Job is hidden from dequeue until resumed
    Paused,
}

impl JobStatus {
    /// Whether this status admits a transition to `to`.
    ///
    /// Failed -> Pending is the requeue edge; the retry budget is checked by
    /// the queue, not here.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, InQueue)
                | (Pending, Paused)
                | (Pending, Cancelled)
                | (InQueue, Processing)
                | (InQueue, Paused)
                | (InQueue, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Processing, Paused)
                | (Paused, Pending)
                | (Paused, InQueue)
                | (Paused, Cancelled)
                | (Failed, Pending)
        )
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Job entity representing one unit of extraction work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,
    /// External product identifier the result is keyed by
    pub correlation_key: String,
    /// Path or URI of the resource to process
    pub resource_locator: String,
    /// Job priority
    pub priority: JobPriority,
    /// Current status
    pub status: JobStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Scheduled execution time, if deferred
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Processing start timestamp
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque result produced by the processor
    pub result: Option<serde_json::Value>,
    /// Last error message, if any
    pub error: Option<String>,
    /// Retry attempts consumed so far
    pub retries: u32,
    /// Maximum retry attempts
    pub max_retries: u32,
    /// Job tags for filtering and grouping
    pub tags: HashSet<String>,
    /// Job metadata
    pub metadata: HashMap<String, String>,
}

impl Job {
    /// Create a new pending job
    pub fn new(correlation_key: impl Into<String>, resource_locator: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_key: correlation_key.into(),
            resource_locator: resource_locator.into(),
            priority: JobPriority::Normal,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            scheduled_for: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retries: 0,
            max_retries: 3,
            tags: HashSet::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_scheduled_for(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(when);
        self
    }

    /// Move the job to a new status, enforcing the transition table.
    ///
    /// Timestamps are stamped as a side effect: `started_at` on entering
    /// Processing, `completed_at` on reaching a terminal status.
    pub fn transition_to(&mut self, to: JobStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        self.status = to;
        match to {
            JobStatus::Processing => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }

        Ok(())
    }

    /// Whether the job still has retry budget left.
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }
}
