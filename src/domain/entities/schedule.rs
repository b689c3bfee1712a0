//! Scheduling entities
//!
//! One-time scheduled work is held as a full `Job` with `scheduled_for` set;
//! recurring submissions are described by a `RecurringEntry` that the
//! scheduler stamps a fresh job from on every due tick.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::job::{JobPriority, RecurringId};

/// A recurring submission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringEntry {
    /// Recurring schedule identifier
    pub id: RecurringId,
    /// Correlation key stamped onto every spawned job
    pub correlation_key: String,
    /// Resource locator stamped onto every spawned job
    pub resource_locator: String,
    /// Interval between runs, in hours (0 is allowed for test mode)
    pub interval_hours: f64,
    /// Priority of spawned jobs
    pub priority: JobPriority,
    /// Tags shared by spawned jobs
    pub tags: HashSet<String>,
    /// Next due time
    pub next_run: DateTime<Utc>,
    /// Runs spawned so far
    pub runs_completed: u32,
    /// Optional run cap; the entry is dropped once reached
    pub max_runs: Option<u32>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl RecurringEntry {
    pub fn new(
        correlation_key: impl Into<String>,
        resource_locator: impl Into<String>,
        interval_hours: f64,
        priority: JobPriority,
        tags: HashSet<String>,
        max_runs: Option<u32>,
    ) -> Self {
        let now = Utc::now();
        let interval = interval_duration(interval_hours);
        Self {
            id: Uuid::new_v4(),
            correlation_key: correlation_key.into(),
            resource_locator: resource_locator.into(),
            interval_hours,
            priority,
            tags,
            next_run: now + interval,
            runs_completed: 0,
            max_runs,
            created_at: now,
        }
    }

    pub fn interval(&self) -> Duration {
        interval_duration(self.interval_hours)
    }

    /// Whether the run cap has been reached.
    pub fn exhausted(&self) -> bool {
        self.max_runs
            .map(|max| self.runs_completed >= max)
            .unwrap_or(false)
    }

    /// Whether the entry is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_run
    }

    /// Account for one spawned run and advance the due time.
    pub fn advance(&mut self) {
        self.runs_completed += 1;
        self.next_run = self.next_run + self.interval();
    }
}

fn interval_duration(hours: f64) -> Duration {
    Duration::milliseconds((hours * 3_600_000.0) as i64)
}
