pub mod batch;
pub mod job;
pub mod schedule;

pub use batch::{BatchItemOutcome, BatchReport};
pub use job::{BatchId, Job, JobId, JobPriority, JobStatus, RecurringId};
pub use schedule::RecurringEntry;
