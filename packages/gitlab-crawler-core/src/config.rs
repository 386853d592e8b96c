//! Scheduler configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthConfig;
use crate::job::{Job, JobType};

/// Boolean gate invoked before a job is enqueued; `false` skips it.
pub type BeforeJobStartHook = Arc<dyn Fn(&Job) -> bool + Send + Sync>;
/// Fired after a job completes successfully, errors inside are logged and
/// swallowed.
pub type AfterJobCompleteHook = Arc<dyn Fn(&Job) + Send + Sync>;
/// Fired when a job fails, whether or not it will be retried.
pub type JobFailedHook = Arc<dyn Fn(&Job, &str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    pub before_job_start: Option<BeforeJobStartHook>,
    pub after_job_complete: Option<AfterJobCompleteHook>,
    pub job_failed: Option<JobFailedHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before_job_start", &self.before_job_start.is_some())
            .field("after_job_complete", &self.after_job_complete.is_some())
            .field("job_failed", &self.job_failed.is_some())
            .finish()
    }
}

/// Restricts crawl scope to an explicit allowlist. Absent (empty) lists
/// mean accept-all for that dimension.
#[derive(Debug, Clone, Default)]
pub struct IncludeResources {
    pub project_ids: Vec<i64>,
    pub project_paths: Vec<String>,
    pub group_ids: Vec<i64>,
    pub group_paths: Vec<String>,
}

impl IncludeResources {
    pub fn with_project_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.project_ids = ids.into_iter().collect();
        self
    }

    pub fn with_project_paths(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.project_paths = paths.into_iter().collect();
        self
    }

    pub fn with_group_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.group_ids = ids.into_iter().collect();
        self
    }

    pub fn with_group_paths(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.group_paths = paths.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub gitlab_url: String,
    pub auth: AuthConfig,
    pub output_dir: String,

    pub requests_per_second: f64,
    pub resource_specific_rate_limits: HashMap<JobType, f64>,

    pub concurrency: usize,
    pub concurrency_per_resource_type: HashMap<JobType, usize>,

    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_backoff_factor: f64,
    pub retry_jitter: f64,

    pub timeout: Option<Duration>,
    pub include_resources: IncludeResources,

    pub hooks: Hooks,

    /// Buffer before `tokenExpiresAt` at which `AuthRefresher` proactively
    /// refreshes. Not a wire config key; an implementation default.
    pub auth_refresh_buffer_minutes: i64,
}

impl SchedulerConfig {
    pub fn new(gitlab_url: impl Into<String>, auth: AuthConfig, output_dir: impl Into<String>) -> Self {
        Self {
            gitlab_url: gitlab_url.into(),
            auth,
            output_dir: output_dir.into(),
            requests_per_second: 1.0,
            resource_specific_rate_limits: HashMap::new(),
            concurrency: 5,
            concurrency_per_resource_type: HashMap::new(),
            max_retries: 3,
            retry_delay: Duration::from_millis(5000),
            retry_backoff_factor: 2.0,
            retry_jitter: 0.1,
            timeout: None,
            include_resources: IncludeResources::default(),
            hooks: Hooks::default(),
            auth_refresh_buffer_minutes: 5,
        }
    }

    pub fn with_requests_per_second(mut self, rps: f64) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_resource_rate(mut self, job_type: JobType, rps: f64) -> Self {
        self.resource_specific_rate_limits.insert(job_type, rps);
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_resource_concurrency(mut self, job_type: JobType, n: usize) -> Self {
        self.concurrency_per_resource_type.insert(job_type, n);
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_retry_backoff_factor(mut self, factor: f64) -> Self {
        self.retry_backoff_factor = factor;
        self
    }

    pub fn with_retry_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = jitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_include_resources(mut self, include: IncludeResources) -> Self {
        self.include_resources = include;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_documented_values() {
        let cfg = SchedulerConfig::new("https://gitlab.example", AuthConfig::default(), "./out");
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_delay, Duration::from_millis(5000));
        assert_eq!(cfg.retry_backoff_factor, 2.0);
        assert_eq!(cfg.retry_jitter, 0.1);
        assert!(cfg.timeout.is_none());
    }
}
