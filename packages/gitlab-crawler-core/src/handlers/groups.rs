use async_trait::async_trait;
use serde_json::json;

use crate::auth::AuthConfig;
use crate::collaborators::Pagination;
use crate::job::{Job, JobType, ResourceId};
use crate::paths;
use crate::processor::{HandlerError, HandlerOutcome, JobHandler};

use super::{fetch_single, item_id, paginate, HandlerContext};

pub struct GroupDetailsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for GroupDetailsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let group_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("GROUP_DETAILS requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let details = fetch_single(
            &self.ctx,
            JobType::GroupDetails,
            &job.resource_id,
            "GROUP_DETAILS",
            &paths::group_details(group_id),
            || async { self.ctx.api.get_group(&token, group_id).await },
        )
        .await?;

        let discovered_jobs = vec![
            Job::new(JobType::DiscoverSubgroups, job.resource_id.clone()).with_parent(job.id.clone()),
            Job::new(JobType::GroupMembers, job.resource_id.clone()).with_parent(job.id.clone()),
            Job::new(JobType::GroupProjects, job.resource_id.clone()).with_parent(job.id.clone()),
            Job::new(JobType::GroupIssues, job.resource_id.clone()).with_parent(job.id.clone()),
        ];

        Ok(HandlerOutcome {
            data: vec![details],
            discovered_jobs,
            has_next_page: false,
            next_cursor: None,
            skipped: false,
        })
    }
}

pub struct GroupMembersHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for GroupMembersHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let group_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("GROUP_MEMBERS requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::GroupMembers,
            &job.resource_id,
            "GROUP_MEMBERS",
            &paths::group_members(group_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_group_members(&token, group_id, page).await }
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

pub struct GroupProjectsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for GroupProjectsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let group_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("GROUP_PROJECTS requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::GroupProjects,
            &job.resource_id,
            "GROUP_PROJECTS",
            &paths::group_projects(group_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_group_projects(&token, group_id, page).await }
            },
        )
        .await?;

        let discovered_jobs = items
            .iter()
            .filter_map(item_id)
            .map(|id| {
                Job::new(JobType::ProjectDetails, ResourceId::Id(id)).with_parent(job.id.clone())
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

pub struct GroupIssuesHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for GroupIssuesHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let group_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("GROUP_ISSUES requires a numeric resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::GroupIssues,
            &job.resource_id,
            "GROUP_ISSUES",
            &paths::group_issues(group_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_group_issues(&token, group_id, page).await }
            },
        )
        .await?;

        let mut discovered_jobs = Vec::new();
        for item in &items {
            let (Some(project_id), Some(iid)) = (
                item.get("project_id").and_then(|v| v.as_i64()),
                item.get("iid").and_then(|v| v.as_i64()),
            ) else {
                continue;
            };
            let child = Job::new(
                JobType::IssueDiscussions,
                ResourceId::composite_issue(project_id, iid),
            )
            .with_parent(job.id.clone())
            .with_data("projectId", json!(project_id))
            .with_data("issueIid", json!(iid));
            discovered_jobs.push(child);
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
