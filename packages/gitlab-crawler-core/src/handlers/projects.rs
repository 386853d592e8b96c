use async_trait::async_trait;

use crate::auth::AuthConfig;
use crate::collaborators::{ApiError, Pagination};
use crate::job::{Job, JobType, ResourceId};
use crate::paths;
use crate::processor::{HandlerError, HandlerOutcome, JobHandler};

use super::{fetch_single, item_id, item_iid, paginate, HandlerContext};

pub struct ProjectDetailsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for ProjectDetailsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("PROJECT_DETAILS requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let details = fetch_single(
            &self.ctx,
            JobType::ProjectDetails,
            &job.resource_id,
            "PROJECT_DETAILS",
            &paths::project_details(project_id),
            || async { self.ctx.api.get_project(&token, project_id).await },
        )
        .await?;

        let child_types = [
            JobType::ProjectBranches,
            JobType::ProjectMergeRequests,
            JobType::ProjectIssues,
            JobType::ProjectMilestones,
            JobType::ProjectReleases,
            JobType::ProjectPipelines,
            JobType::ProjectVulnerabilities,
        ];
        let discovered_jobs = child_types
            .into_iter()
            .map(|t| Job::new(t, job.resource_id.clone()).with_parent(job.id.clone()))
            .collect();

        Ok(HandlerOutcome {
            data: vec![details],
            discovered_jobs,
            has_next_page: false,
            next_cursor: None,
            skipped: false,
        })
    }
}

pub struct ProjectBranchesHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for ProjectBranchesHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("PROJECT_BRANCHES requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::ProjectBranches,
            &job.resource_id,
            "PROJECT_BRANCHES",
            &paths::project_branches(project_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_branches(&token, project_id, page).await }
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

pub struct ProjectMergeRequestsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for ProjectMergeRequestsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job.resource_id.as_i64().ok_or_else(|| {
            HandlerError::Configuration("PROJECT_MERGE_REQUESTS requires a numeric resourceId".into())
        })?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::ProjectMergeRequests,
            &job.resource_id,
            "PROJECT_MERGE_REQUESTS",
            &paths::project_merge_requests(project_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_merge_requests(&token, project_id, page).await }
            },
        )
        .await?;

        let discovered_jobs = items
            .iter()
            .filter_map(item_iid)
            .map(|iid| {
                Job::new(
                    JobType::MergeRequestDiscussions,
                    ResourceId::composite_mr(project_id, iid),
                )
                .with_parent(job.id.clone())
                .with_data("projectId", serde_json::json!(project_id))
                .with_data("mergeRequestIid", serde_json::json!(iid))
            })
            .collect();

        Ok(HandlerOutcome {
            data: items,
            discovered_jobs,
            has_next_page,
            next_cursor: None,
            skipped: false,
        })
    }
}

pub struct ProjectIssuesHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for ProjectIssuesHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("PROJECT_ISSUES requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::ProjectIssues,
            &job.resource_id,
            "PROJECT_ISSUES",
            &paths::project_issues(project_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_project_issues(&token, project_id, page).await }
            },
        )
        .await?;

        let discovered_jobs = items
            .iter()
            .filter_map(item_iid)
            .map(|iid| {
                Job::new(
                    JobType::IssueDiscussions,
                    ResourceId::composite_issue(project_id, iid),
                )
                .with_parent(job.id.clone())
                .with_data("projectId", serde_json::json!(project_id))
                .with_data("issueIid", serde_json::json!(iid))
            })
            .collect();

        Ok(HandlerOutcome {
            data: items,
            discovered_jobs,
            has_next_page,
            next_cursor: None,
            skipped: false,
        })
    }
}

pub struct ProjectMilestonesHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for ProjectMilestonesHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("PROJECT_MILESTONES requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::ProjectMilestones,
            &job.resource_id,
            "PROJECT_MILESTONES",
            &paths::project_milestones(project_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_milestones(&token, project_id, page).await }
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

pub struct ProjectReleasesHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for ProjectReleasesHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("PROJECT_RELEASES requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::ProjectReleases,
            &job.resource_id,
            "PROJECT_RELEASES",
            &paths::project_releases(project_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_releases(&token, project_id, page).await }
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

pub struct ProjectPipelinesHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for ProjectPipelinesHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("PROJECT_PIPELINES requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::ProjectPipelines,
            &job.resource_id,
            "PROJECT_PIPELINES",
            &paths::project_pipelines(project_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_pipelines(&token, project_id, page).await }
            },
        )
        .await?;

        let mut discovered_jobs = Vec::new();
        for item in &items {
            let Some(pipeline_id) = item_id(item) else { continue };
            let resource_id = ResourceId::composite_pipeline(project_id, pipeline_id);
            for t in [JobType::PipelineDetails, JobType::PipelineTestReports] {
                discovered_jobs.push(
                    Job::new(t, resource_id.clone())
                        .with_parent(job.id.clone())
                        .with_data("projectId", serde_json::json!(project_id))
                        .with_data("pipelineId", serde_json::json!(pipeline_id)),
                );
            }
        }

        Ok(HandlerOutcome {
            data: items,
            discovered_jobs,
            has_next_page,
            next_cursor: None,
            skipped: false,
        })
    }
}

/// Vulnerability findings may be disabled for a project: a 403 or 404 is a
/// successful, skipped outcome rather than a failure.
pub struct ProjectVulnerabilitiesHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for ProjectVulnerabilitiesHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job.resource_id.as_i64().ok_or_else(|| {
            HandlerError::Configuration("PROJECT_VULNERABILITIES requires a numeric resourceId".into())
        })?;
        let token = auth.oauth_token.clone().unwrap_or_default();
        let page_num = self
            .ctx
            .cursors
            .get_next_page(JobType::ProjectVulnerabilities, &job.resource_id);
        let pagination = Pagination::new(page_num, Pagination::DEFAULT_REST_PER_PAGE);

        let result = self
            .ctx
            .throttle
            .call("PROJECT_VULNERABILITIES", || {
                let token = token.clone();
                async move {
                    self.ctx
                        .api
                        .list_vulnerability_findings(&token, project_id, pagination)
                        .await
                }
            })
            .await;

        let page = match result {
            Ok(page) => page,
            Err(err) if matches!(err, ApiError::Http { status: 403, .. }) || err.is_not_found() => {
                self.ctx.cursors.register_cursor(
                    JobType::ProjectVulnerabilities,
                    job.resource_id.clone(),
                    page_num,
                    false,
                    None,
                );
                return Ok(HandlerOutcome {
                    skipped: true,
                    ..HandlerOutcome::empty()
                });
            }
            Err(err) => return Err(err.into()),
        };

        let has_next_page = page.items.len() as u32 == Pagination::DEFAULT_REST_PER_PAGE;
        if !page.items.is_empty() {
            self.ctx
                .storage
                .write_jsonl(&paths::project_vulnerabilities(project_id), &page.items)
                .await?;
        }
        self.ctx.cursors.register_cursor(
            JobType::ProjectVulnerabilities,
            job.resource_id.clone(),
            page_num,
            has_next_page,
            None,
        );

        Ok(HandlerOutcome {
            data: page.items,
            discovered_jobs: Vec::new(),
            has_next_page,
            next_cursor: None,
            skipped: false,
        })
    }
}
