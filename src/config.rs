use serde::Deserialize;

/// Workflow engine configuration, loaded from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Number of worker tasks in the pool
    pub worker_count: usize,
    /// Per-priority queue capacities
    pub critical_queue_size: usize,
    pub high_queue_size: usize,
    pub normal_queue_size: usize,
    pub low_queue_size: usize,
    /// Default retry budget for new jobs
    pub default_max_retries: u32,
    /// Directory for queue/scheduler snapshots and batch reports
    pub snapshot_dir: String,
    /// Scheduler tick interval in milliseconds
    pub scheduler_tick_ms: u64,
    /// Bounded wait inside dequeue in milliseconds
    pub dequeue_wait_ms: u64,
    /// Backoff after an unexpected worker loop error, in milliseconds
    pub worker_backoff_ms: u64,
    /// Restore queue/scheduler snapshots on start
    pub resume_from_snapshot: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            critical_queue_size: 50,
            high_queue_size: 200,
            normal_queue_size: 500,
            low_queue_size: 1000,
            default_max_retries: 3,
            snapshot_dir: "./snapshots".to_string(),
            scheduler_tick_ms: 1000,
            dequeue_wait_ms: 500,
            worker_backoff_ms: 1000,
            resume_from_snapshot: false,
        }
    }
}

impl WorkflowConfig {
    pub fn init() -> WorkflowConfig {
        dotenv::dotenv().ok();

        let defaults = WorkflowConfig::default();

        let worker_count = std::env::var("DOCFLOW_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.worker_count);
        let critical_queue_size = std::env::var("DOCFLOW_CRITICAL_QUEUE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.critical_queue_size);
        let high_queue_size = std::env::var("DOCFLOW_HIGH_QUEUE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.high_queue_size);
        let normal_queue_size = std::env::var("DOCFLOW_NORMAL_QUEUE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.normal_queue_size);
        let low_queue_size = std::env::var("DOCFLOW_LOW_QUEUE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.low_queue_size);
        let default_max_retries = std::env::var("DOCFLOW_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.default_max_retries);
        let snapshot_dir =
            std::env::var("DOCFLOW_SNAPSHOT_DIR").unwrap_or_else(|_| defaults.snapshot_dir.clone());
        let scheduler_tick_ms = std::env::var("DOCFLOW_SCHEDULER_TICK_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.scheduler_tick_ms);
        let dequeue_wait_ms = std::env::var("DOCFLOW_DEQUEUE_WAIT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.dequeue_wait_ms);
        let worker_backoff_ms = std::env::var("DOCFLOW_WORKER_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.worker_backoff_ms);
        let resume_from_snapshot = std::env::var("DOCFLOW_RESUME_FROM_SNAPSHOT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.resume_from_snapshot);

        WorkflowConfig {
            worker_count,
            critical_queue_size,
            high_queue_size,
            normal_queue_size,
            low_queue_size,
            default_max_retries,
            snapshot_dir,
            scheduler_tick_ms,
            dequeue_wait_ms,
            worker_backoff_ms,
            resume_from_snapshot,
        }
    }

    /// Capacity of the queue bucket for the given priority.
    pub fn queue_capacity(&self, priority: crate::domain::entities::JobPriority) -> usize {
        use crate::domain::entities::JobPriority;
        match priority {
            JobPriority::Critical => self.critical_queue_size,
            JobPriority::High => self.high_queue_size,
            JobPriority::Normal => self.normal_queue_size,
            JobPriority::Low => self.low_queue_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::JobPriority;

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.queue_capacity(JobPriority::Critical), 50);
        assert_eq!(config.queue_capacity(JobPriority::Low), 1000);
    }
}
