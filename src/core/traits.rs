//! Core traits and interfaces for the system
//!
//! These are the seams to the external collaborators: the processor that
//! performs the actual extraction work and the sink that persists results.
//! The core never inspects the concrete type behind either trait.

use async_trait::async_trait;

use crate::error::Result;

/// The external extraction capability.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process one resource, returning an opaque result document.
    async fn process(
        &self,
        correlation_key: &str,
        resource_locator: &str,
    ) -> Result<serde_json::Value>;

    /// Check that the backing service is reachable.
    ///
    /// Called by the workflow manager before any worker is started.
    async fn health_check(&self) -> Result<()>;
}

/// Persists a completed result for a correlation key.
///
/// Invoked by a worker after a successful `process` call and before the job
/// is marked complete, so a persisted result always precedes completion.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist(&self, correlation_key: &str, result: &serde_json::Value) -> Result<()>;
}
