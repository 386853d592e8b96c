//! External collaborators: the GitLab API binding and the persistence sink.
//! The core never implements these — it only consumes them through these
//! traits as dependencies rather than owned implementations.

use async_trait::async_trait;
use serde_json::Value;

/// One page of a REST/GraphQL list response.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    /// REST listing endpoints default to 100 per page; GraphQL paths
    /// typically use 20-50.
    pub const DEFAULT_REST_PER_PAGE: u32 = 100;
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum ApiError {
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Http { status: 404, .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, ApiError::Http { status: 403, .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited(_))
            || matches!(self, ApiError::Http { status: 429, .. })
    }
}

/// GitLab REST/GraphQL client binding. The core does not
/// prescribe the transport; it calls resource-shaped methods and treats
/// each item as an opaque `serde_json::Value` to pass through to `Storage`
/// unmodified.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn list_groups(&self, oauth_token: &str, page: Pagination) -> Result<Page, ApiError>;
    async fn get_group(&self, oauth_token: &str, group_id: i64) -> Result<Value, ApiError>;
    async fn list_subgroups(
        &self,
        oauth_token: &str,
        group_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_group_members(
        &self,
        oauth_token: &str,
        group_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_group_projects(
        &self,
        oauth_token: &str,
        group_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_group_issues(
        &self,
        oauth_token: &str,
        group_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;

    async fn list_projects(&self, oauth_token: &str, page: Pagination) -> Result<Page, ApiError>;
    async fn get_project(&self, oauth_token: &str, project_id: i64) -> Result<Value, ApiError>;
    async fn list_branches(
        &self,
        oauth_token: &str,
        project_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_merge_requests(
        &self,
        oauth_token: &str,
        project_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_project_issues(
        &self,
        oauth_token: &str,
        project_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_milestones(
        &self,
        oauth_token: &str,
        project_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_releases(
        &self,
        oauth_token: &str,
        project_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_pipelines(
        &self,
        oauth_token: &str,
        project_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_vulnerability_findings(
        &self,
        oauth_token: &str,
        project_id: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;

    async fn list_merge_request_discussions(
        &self,
        oauth_token: &str,
        project_id: i64,
        mr_iid: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;
    async fn list_issue_discussions(
        &self,
        oauth_token: &str,
        project_id: i64,
        issue_iid: i64,
        page: Pagination,
    ) -> Result<Page, ApiError>;

    async fn get_pipeline(
        &self,
        oauth_token: &str,
        project_id: i64,
        pipeline_id: i64,
    ) -> Result<Value, ApiError>;

    /// Direct REST fetch of `GET /api/v4/projects/{urlEncodedId}/pipelines/{id}/test_report`.
    async fn get_pipeline_test_report(
        &self,
        oauth_token: &str,
        project_id: i64,
        pipeline_id: i64,
    ) -> Result<Value, ApiError>;
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum StorageError {
    #[error("storage write failed for {path}: {message}")]
    WriteFailed { path: String, message: String },
}

/// Append-only JSON-lines persistence sink.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn write_jsonl(&self, path: &str, records: &[Value]) -> Result<(), StorageError>;
    async fn write_json(&self, path: &str, obj: &Value) -> Result<(), StorageError>;
}
