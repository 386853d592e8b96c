//! Job model: the unit of work the scheduler queues, runs, and retries.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthConfig;

/// Closed set of job types the scheduler understands. Wire form matches the
/// exact spellings GitLab-crawler callers expect (`DISCOVER_GROUPS`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    DiscoverGroups,
    DiscoverProjects,
    DiscoverSubgroups,
    GroupDetails,
    GroupMembers,
    GroupProjects,
    GroupIssues,
    ProjectDetails,
    ProjectBranches,
    ProjectMergeRequests,
    ProjectIssues,
    ProjectMilestones,
    ProjectReleases,
    ProjectPipelines,
    ProjectVulnerabilities,
    MergeRequestDiscussions,
    IssueDiscussions,
    PipelineDetails,
    PipelineTestReports,
}

impl JobType {
    /// All job types, in no particular order; used for dispatch iteration
    /// and default-config table construction.
    pub const ALL: [JobType; 19] = [
        JobType::DiscoverGroups,
        JobType::DiscoverProjects,
        JobType::DiscoverSubgroups,
        JobType::GroupDetails,
        JobType::GroupMembers,
        JobType::GroupProjects,
        JobType::GroupIssues,
        JobType::ProjectDetails,
        JobType::ProjectBranches,
        JobType::ProjectMergeRequests,
        JobType::ProjectIssues,
        JobType::ProjectMilestones,
        JobType::ProjectReleases,
        JobType::ProjectPipelines,
        JobType::ProjectVulnerabilities,
        JobType::MergeRequestDiscussions,
        JobType::IssueDiscussions,
        JobType::PipelineDetails,
        JobType::PipelineTestReports,
    ];

    /// Fixed per-type default priority. Higher runs first.
    pub fn default_priority(&self) -> i64 {
        match self {
            JobType::DiscoverGroups => 1000,
            JobType::DiscoverProjects => 900,
            JobType::DiscoverSubgroups => 800,
            JobType::GroupDetails | JobType::ProjectDetails => 700,
            JobType::GroupMembers | JobType::GroupProjects => 600,
            JobType::GroupIssues
            | JobType::ProjectBranches
            | JobType::ProjectMergeRequests
            | JobType::ProjectIssues => 500,
            JobType::ProjectMilestones | JobType::ProjectReleases | JobType::ProjectPipelines => {
                400
            }
            JobType::ProjectVulnerabilities => 300,
            JobType::MergeRequestDiscussions
            | JobType::IssueDiscussions
            | JobType::PipelineDetails => 200,
            JobType::PipelineTestReports => 100,
        }
    }

    /// Default requests/sec for this job type's resource key.
    pub fn default_rate_per_second(&self) -> f64 {
        match self {
            JobType::DiscoverGroups | JobType::DiscoverProjects | JobType::DiscoverSubgroups => {
                1.0
            }
            JobType::GroupDetails | JobType::GroupMembers | JobType::GroupIssues => 2.0,
            JobType::GroupProjects => 1.0,
            JobType::ProjectDetails => 5.0,
            JobType::ProjectBranches => 3.0,
            JobType::ProjectMergeRequests | JobType::ProjectIssues | JobType::ProjectPipelines => {
                2.0
            }
            JobType::ProjectMilestones | JobType::ProjectReleases => 5.0,
            JobType::ProjectVulnerabilities
            | JobType::MergeRequestDiscussions
            | JobType::IssueDiscussions
            | JobType::PipelineTestReports => 1.0,
            JobType::PipelineDetails => 1.0,
        }
    }

    /// Whether this job type's `resourceId` is filtered by `includeResources`
    /// under the `projectIds`/`projectPaths` keys.
    pub fn is_project_scoped(&self) -> bool {
        matches!(
            self,
            JobType::ProjectDetails
                | JobType::ProjectBranches
                | JobType::ProjectMergeRequests
                | JobType::ProjectIssues
                | JobType::ProjectMilestones
                | JobType::ProjectReleases
                | JobType::ProjectPipelines
                | JobType::ProjectVulnerabilities
        )
    }

    /// Whether this job type's `resourceId` is filtered under the
    /// `groupIds`/`groupPaths` keys.
    pub fn is_group_scoped(&self) -> bool {
        matches!(
            self,
            JobType::GroupDetails
                | JobType::GroupMembers
                | JobType::GroupProjects
                | JobType::GroupIssues
        )
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        write!(f, "{s}")
    }
}

/// Opaque resource identifier. GitLab resources are addressed either by
/// numeric id, by a composite discussion key (`"{projectId}-mr-{iid}"`), or
/// by the `"all"` sentinel used by discovery jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    All,
    Id(i64),
    Named(String),
}

impl ResourceId {
    pub const ALL_SENTINEL: &'static str = "all";

    pub fn composite_mr(project_id: i64, iid: i64) -> Self {
        ResourceId::Named(format!("{project_id}-mr-{iid}"))
    }

    pub fn composite_issue(project_id: i64, iid: i64) -> Self {
        ResourceId::Named(format!("{project_id}-issue-{iid}"))
    }

    pub fn composite_pipeline(project_id: i64, pipeline_id: i64) -> Self {
        ResourceId::Named(format!("{project_id}-pipeline-{pipeline_id}"))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ResourceId::Id(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::All => write!(f, "{}", Self::ALL_SENTINEL),
            ResourceId::Id(id) => write!(f, "{id}"),
            ResourceId::Named(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ResourceId {
    fn from(id: i64) -> Self {
        ResourceId::Id(id)
    }
}

/// A unit of work. Two jobs with identical `id` never run concurrently;
/// the same `id` legitimately reappears only when the scheduler
/// re-enqueues a job for its next pagination page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub resource_id: ResourceId,
    pub resource_path: Option<String>,
    pub data: HashMap<String, Value>,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub parent_job_id: Option<String>,
    pub auth: Option<AuthConfig>,
}

impl Job {
    /// Build a job id from `{type, resourceId, nonce}`. `nonce` is 0 by
    /// default so that two calls with the same type+resource collapse onto
    /// the same id (required for the pagination re-enqueue contract); pass a
    /// non-zero nonce only when the caller deliberately wants an
    /// independent, concurrently-schedulable job for the same resource (for
    /// example, an explicit re-crawl request).
    pub fn make_id(job_type: JobType, resource_id: &ResourceId, nonce: u32) -> String {
        format!("{job_type}:{resource_id}:{nonce}")
    }

    pub fn new(job_type: JobType, resource_id: ResourceId) -> Self {
        Self::with_nonce(job_type, resource_id, 0)
    }

    pub fn with_nonce(job_type: JobType, resource_id: ResourceId, nonce: u32) -> Self {
        let id = Self::make_id(job_type, &resource_id, nonce);
        Self {
            id,
            priority: job_type.default_priority(),
            job_type,
            resource_id,
            resource_path: None,
            data: HashMap::new(),
            created_at: Utc::now(),
            retry_count: 0,
            parent_job_id: None,
            auth: None,
        }
    }

    pub fn with_resource_path(mut self, path: impl Into<String>) -> Self {
        self.resource_path = Some(path.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_parent(mut self, parent_job_id: impl Into<String>) -> Self {
        self.parent_job_id = Some(parent_job_id.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Clone of this job with `retry_count` incremented by one, same `id`.
    pub fn as_retry(&self) -> Self {
        let mut retried = self.clone();
        retried.retry_count += 1;
        retried
    }

    /// Fetch a required `data` field as i64, for handlers that need
    /// `projectId`/`issueIid`/`mergeRequestIid`. Missing fields are a fatal
    /// configuration error, not retried.
    pub fn require_i64(&self, key: &str) -> Result<i64, String> {
        self.data
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| format!("job {} missing required data field `{key}`", self.id))
    }
}
