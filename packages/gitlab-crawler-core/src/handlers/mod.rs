//! Per-job-type handlers, grouped by the resource family they crawl. Each
//! handler is a thin effect struct holding its collaborators and returning
//! discovered jobs to the scheduler instead of enqueueing them directly.

mod discovery;
mod discussions;
mod groups;
mod pipelines;
mod projects;

pub use discovery::{DiscoverGroupsHandler, DiscoverProjectsHandler, DiscoverSubgroupsHandler};
pub use discussions::{IssueDiscussionsHandler, MergeRequestDiscussionsHandler};
pub use groups::{GroupDetailsHandler, GroupIssuesHandler, GroupMembersHandler, GroupProjectsHandler};
pub use pipelines::{PipelineDetailsHandler, PipelineTestReportsHandler};
pub use projects::{
    ProjectBranchesHandler, ProjectDetailsHandler, ProjectIssuesHandler,
    ProjectMergeRequestsHandler, ProjectMilestonesHandler, ProjectPipelinesHandler,
    ProjectReleasesHandler, ProjectVulnerabilitiesHandler,
};

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::collaborators::{ApiClient, ApiError, Pagination, Storage};
use crate::cursor::CursorRegistry;
use crate::job::{JobType, ResourceId};
use crate::processor::HandlerError;
use crate::throttle::Throttle;

/// Collaborators shared by every handler. Cheap to clone — everything
/// inside is an `Arc`.
#[derive(Clone)]
pub(crate) struct HandlerContext {
    pub api: Arc<dyn ApiClient>,
    pub storage: Arc<dyn Storage>,
    pub throttle: Arc<Throttle>,
    pub cursors: Arc<CursorRegistry>,
}

/// Fetches one page for `(job_type, resource_id)`, writes non-empty results
/// to `output_path`, and advances the cursor.
///
/// A 404 is treated as a terminal, empty page rather than an error.
pub(crate) async fn paginate<F, Fut>(
    ctx: &HandlerContext,
    job_type: JobType,
    resource_id: &ResourceId,
    throttle_key: &str,
    output_path: &str,
    per_page: u32,
    fetch: F,
) -> Result<(Vec<Value>, bool), HandlerError>
where
    F: Fn(Pagination) -> Fut,
    Fut: Future<Output = Result<crate::collaborators::Page, ApiError>>,
{
    let page_num = ctx.cursors.get_next_page(job_type, resource_id);
    let pagination = Pagination::new(page_num, per_page);

    match ctx.throttle.call(throttle_key, || fetch(pagination)).await {
        Ok(page) => {
            let has_next_page = page.items.len() as u32 == per_page;
            if !page.items.is_empty() {
                ctx.storage.write_jsonl(output_path, &page.items).await?;
            }
            ctx.cursors
                .register_cursor(job_type, resource_id.clone(), page_num, has_next_page, None);
            Ok((page.items, has_next_page))
        }
        Err(err) if err.is_not_found() => {
            ctx.cursors
                .register_cursor(job_type, resource_id.clone(), page_num, false, None);
            Ok((Vec::new(), false))
        }
        Err(err) => Err(err.into()),
    }
}

/// Fetches and persists a single JSON object, then registers a terminal
/// cursor entry for `(job_type, resource_id)` so `getPendingCursors`/
/// `exportState` can report the job as complete, matching the pattern
/// `paginate()` already uses for a 404's terminal, empty page.
pub(crate) async fn fetch_single<F, Fut>(
    ctx: &HandlerContext,
    job_type: JobType,
    resource_id: &ResourceId,
    throttle_key: &str,
    output_path: &str,
    fetch: F,
) -> Result<Value, HandlerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Value, ApiError>>,
{
    let value = ctx.throttle.call(throttle_key, || fetch()).await?;
    ctx.storage.write_json(output_path, &value).await?;
    ctx.cursors
        .register_cursor(job_type, resource_id.clone(), 0, false, None);
    Ok(value)
}

pub(crate) fn item_id(item: &Value) -> Option<i64> {
    item.get("id").and_then(Value::as_i64)
}

pub(crate) fn item_iid(item: &Value) -> Option<i64> {
    item.get("iid").and_then(Value::as_i64)
}

pub(crate) fn item_path(item: &Value) -> Option<String> {
    item.get("full_path")
        .or_else(|| item.get("path_with_namespace"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Builds a `ProcessorRegistry` with every job type wired to its handler,
/// sharing one set of collaborators.
pub fn build_registry(
    api: Arc<dyn ApiClient>,
    storage: Arc<dyn Storage>,
    throttle: Arc<Throttle>,
    cursors: Arc<CursorRegistry>,
) -> crate::processor::ProcessorRegistry {
    let ctx = HandlerContext {
        api,
        storage,
        throttle,
        cursors,
    };

    let mut registry = crate::processor::ProcessorRegistry::new();
    registry
        .register(JobType::DiscoverGroups, Arc::new(DiscoverGroupsHandler { ctx: ctx.clone() }))
        .register(
            JobType::DiscoverProjects,
            Arc::new(DiscoverProjectsHandler { ctx: ctx.clone() }),
        )
        .register(
            JobType::DiscoverSubgroups,
            Arc::new(DiscoverSubgroupsHandler { ctx: ctx.clone() }),
        )
        .register(JobType::GroupDetails, Arc::new(GroupDetailsHandler { ctx: ctx.clone() }))
        .register(JobType::GroupMembers, Arc::new(GroupMembersHandler { ctx: ctx.clone() }))
        .register(JobType::GroupProjects, Arc::new(GroupProjectsHandler { ctx: ctx.clone() }))
        .register(JobType::GroupIssues, Arc::new(GroupIssuesHandler { ctx: ctx.clone() }))
        .register(JobType::ProjectDetails, Arc::new(ProjectDetailsHandler { ctx: ctx.clone() }))
        .register(
            JobType::ProjectBranches,
            Arc::new(ProjectBranchesHandler { ctx: ctx.clone() }),
        )
        .register(
            JobType::ProjectMergeRequests,
            Arc::new(ProjectMergeRequestsHandler { ctx: ctx.clone() }),
        )
        .register(JobType::ProjectIssues, Arc::new(ProjectIssuesHandler { ctx: ctx.clone() }))
        .register(
            JobType::ProjectMilestones,
            Arc::new(ProjectMilestonesHandler { ctx: ctx.clone() }),
        )
        .register(JobType::ProjectReleases, Arc::new(ProjectReleasesHandler { ctx: ctx.clone() }))
        .register(
            JobType::ProjectPipelines,
            Arc::new(ProjectPipelinesHandler { ctx: ctx.clone() }),
        )
        .register(
            JobType::ProjectVulnerabilities,
            Arc::new(ProjectVulnerabilitiesHandler { ctx: ctx.clone() }),
        )
        .register(
            JobType::MergeRequestDiscussions,
            Arc::new(MergeRequestDiscussionsHandler { ctx: ctx.clone() }),
        )
        .register(JobType::IssueDiscussions, Arc::new(IssueDiscussionsHandler { ctx: ctx.clone() }))
        .register(JobType::PipelineDetails, Arc::new(PipelineDetailsHandler { ctx: ctx.clone() }))
        .register(
            JobType::PipelineTestReports,
            Arc::new(PipelineTestReportsHandler { ctx }),
        );

    registry
}
