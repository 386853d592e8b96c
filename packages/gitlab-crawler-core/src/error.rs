//! Scheduler-level errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("no processor registered for job type {0}")]
    HandlerMissing(String),
    #[error("job {job_id} failed: {source}")]
    JobFailed {
        job_id: String,
        #[source]
        source: crate::processor::HandlerError,
    },
    #[error("job {0} timed out")]
    Timeout(String),
    #[error("auth refresh failed: {0}")]
    Auth(#[from] crate::auth::AuthError),
}

impl SchedulerError {
    /// Whether the scheduler should ever retry a job that failed with this
    /// error. `HandlerMissing` and a `Configuration` failure are fatal to
    /// the job on the first attempt regardless of `maxRetries`.
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::HandlerMissing(_) => false,
            SchedulerError::JobFailed { source, .. } => {
                !matches!(source, crate::processor::HandlerError::Configuration(_))
            }
            SchedulerError::AlreadyRunning | SchedulerError::Timeout(_) | SchedulerError::Auth(_) => true,
        }
    }
}
