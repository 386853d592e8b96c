//! Per-job-type processor registry: dispatches a job to the handler
//! registered for its `JobType` and normalizes the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::AuthConfig;
use crate::job::{Job, JobType};

/// What a handler produced. `discovered_jobs` are new jobs the scheduler
/// should enqueue — the handler does not enqueue them itself, keeping
/// handlers free of a `Scheduler` dependency.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub data: Vec<Value>,
    pub discovered_jobs: Vec<Job>,
    pub has_next_page: bool,
    pub next_cursor: Option<String>,
    /// Set when the handler chose to skip rather than fail (e.g. a 403 on
    /// an optional resource like vulnerability findings).
    pub skipped: bool,
}

impl HandlerOutcome {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum HandlerError {
    #[error("api error: {0}")]
    Api(#[from] crate::collaborators::ApiError),
    #[error("storage error: {0}")]
    Storage(#[from] crate::collaborators::StorageError),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// One job type's fetch/persist/discover behavior. Handlers never talk to
/// the `Scheduler`, `Throttle`, or `CursorRegistry` directly — the scheduler
/// wraps the call with throttling and supplies cursor state via the job's
/// `data` map.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError>;
}

/// Maps `JobType` to its registered handler. Construction happens once at
/// scheduler startup; lookups are lock-free reads against an immutable map.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(job_type, handler);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn is_registered(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ResourceId;

    struct StubHandler;

    #[async_trait]
    impl JobHandler for StubHandler {
        async fn handle(&self, _job: &Job, _auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
            Ok(HandlerOutcome::empty())
        }
    }

    #[tokio::test]
    async fn register_then_get_returns_the_same_handler() {
        let mut registry = ProcessorRegistry::new();
        registry.register(JobType::GroupDetails, Arc::new(StubHandler));

        assert!(registry.is_registered(JobType::GroupDetails));
        assert!(!registry.is_registered(JobType::ProjectDetails));

        let handler = registry.get(JobType::GroupDetails).unwrap();
        let job = Job::new(JobType::GroupDetails, ResourceId::Id(1));
        let outcome = handler.handle(&job, &AuthConfig::default()).await.unwrap();
        assert!(!outcome.skipped);
    }
}
