use async_trait::async_trait;

use crate::auth::AuthConfig;
use crate::collaborators::Pagination;
use crate::job::{Job, JobType};
use crate::paths;
use crate::processor::{HandlerError, HandlerOutcome, JobHandler};

use super::{paginate, HandlerContext};

/// Pagination cursor key for both handlers is the composite `ResourceId`
/// (`"{projectId}-mr-{iid}"` / `"{projectId}-issue-{iid}"`) already carried
/// on the job, so no extra bookkeeping is needed beyond reading
/// `projectId`/`mergeRequestIid`/`issueIid` out of `job.data`.
pub struct MergeRequestDiscussionsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for MergeRequestDiscussionsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job.require_i64("projectId").map_err(HandlerError::Configuration)?;
        let mr_iid = job
            .require_i64("mergeRequestIid")
            .map_err(HandlerError::Configuration)?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::MergeRequestDiscussions,
            &job.resource_id,
            "MERGE_REQUEST_DISCUSSIONS",
            &paths::merge_request_discussions(project_id, mr_iid),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move {
                    self.ctx
                        .api
                        .list_merge_request_discussions(&token, project_id, mr_iid, page)
                        .await
                }
            },
        )
        .await?;

        Ok(HandlerOutcome {
            data: items,
            discovered_jobs: Vec::new(),
            has_next_page,
            next_cursor: None,
            skipped: false,
        })
    }
}

pub struct IssueDiscussionsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for IssueDiscussionsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job.require_i64("projectId").map_err(HandlerError::Configuration)?;
        let issue_iid = job
            .require_i64("issueIid")
            .map_err(HandlerError::Configuration)?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::IssueDiscussions,
            &job.resource_id,
            "ISSUE_DISCUSSIONS",
            &paths::issue_discussions(project_id, issue_iid),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move {
                    self.ctx
                        .api
                        .list_issue_discussions(&token, project_id, issue_iid, page)
                        .await
                }
            },
        )
        .await?;

        Ok(HandlerOutcome {
            data: items,
            discovered_jobs: Vec::new(),
            has_next_page,
            next_cursor: None,
            skipped: false,
        })
    }
}
