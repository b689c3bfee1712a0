//! RustDocFlow - a concurrent extraction-job orchestration core
//!
//! This library provides the job-orchestration engine for running many
//! independent text-extraction tasks against an external processing
//! backend: a priority work queue, a fixed worker pool, a time/interval
//! scheduler, batch submission, and crash-resumable state.

#![allow(non_snake_case)]

pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod storage;

// Re-export commonly used types
pub use crate::config::WorkflowConfig;
pub use crate::core::batch_processor::{BatchItem, BatchProcessor, CsvOptions, DirectoryOptions};
pub use crate::core::job_scheduler::JobScheduler;
pub use crate::core::processing_queue::{ProcessingQueue, QueueConfig, QueueStats};
pub use crate::core::traits::{Processor, ResultSink};
pub use crate::core::worker::{Worker, WorkerConfig, WorkerStats};
pub use crate::core::workflow_manager::{WorkflowManager, WorkflowStatus};
pub use crate::domain::entities::{
    BatchId, BatchItemOutcome, BatchReport, Job, JobId, JobPriority, JobStatus, RecurringEntry,
    RecurringId,
};
pub use crate::error::{AppError, Result};
