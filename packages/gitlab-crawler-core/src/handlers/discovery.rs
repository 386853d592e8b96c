use async_trait::async_trait;

use crate::auth::AuthConfig;
use crate::collaborators::Pagination;
use crate::cursor::ResourceKind;
use crate::job::{Job, JobType, ResourceId};
use crate::paths;
use crate::processor::{HandlerError, HandlerOutcome, JobHandler};

use super::{item_id, item_path, paginate, HandlerContext};

pub struct DiscoverGroupsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for DiscoverGroupsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let token = auth.oauth_token.clone().unwrap_or_default();
        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::DiscoverGroups,
            &job.resource_id,
            "DISCOVER_GROUPS",
            &paths::groups(),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_groups(&token, page).await }
            },
        )
        .await?;

        let mut discovered_jobs = Vec::new();
        for item in &items {
            let Some(id) = item_id(item) else { continue };
            let resource_id = ResourceId::Id(id);
            self.ctx
                .cursors
                .mark_resource_discovered(ResourceKind::Group, resource_id.clone(), None);
            let mut child = Job::new(JobType::GroupDetails, resource_id).with_parent(job.id.clone());
            if let Some(path) = item_path(item) {
                child = child.with_resource_path(path);
            }
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

pub struct DiscoverProjectsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for DiscoverProjectsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let token = auth.oauth_token.clone().unwrap_or_default();
        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::DiscoverProjects,
            &job.resource_id,
            "DISCOVER_PROJECTS",
            &paths::projects(),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_projects(&token, page).await }
            },
        )
        .await?;

        let mut discovered_jobs = Vec::new();
        for item in &items {
            let Some(id) = item_id(item) else { continue };
            let resource_id = ResourceId::Id(id);
            self.ctx
                .cursors
                .mark_resource_discovered(ResourceKind::Project, resource_id.clone(), None);
            let mut child =
                Job::new(JobType::ProjectDetails, resource_id).with_parent(job.id.clone());
            if let Some(path) = item_path(item) {
                child = child.with_resource_path(path);
            }
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

pub struct DiscoverSubgroupsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for DiscoverSubgroupsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let group_id = job
            .resource_id
            .as_i64()
            .ok_or_else(|| HandlerError::Configuration("DISCOVER_SUBGROUPS requires a numeric group resourceId".into()))?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let (items, has_next_page) = paginate(
            &self.ctx,
            JobType::DiscoverSubgroups,
            &job.resource_id,
            "DISCOVER_SUBGROUPS",
            &paths::group_subgroups(group_id),
            Pagination::DEFAULT_REST_PER_PAGE,
            |page| {
                let token = token.clone();
                async move { self.ctx.api.list_subgroups(&token, group_id, page).await }
            },
        )
        .await?;

        let mut discovered_jobs = Vec::new();
        for item in &items {
            let Some(id) = item_id(item) else { continue };
            let resource_id = ResourceId::Id(id);
            self.ctx
                .cursors
                .mark_resource_discovered(ResourceKind::Group, resource_id.clone(), Some(job.resource_id.clone()));
            let mut child = Job::new(JobType::GroupDetails, resource_id).with_parent(job.id.clone());
            if let Some(path) = item_path(item) {
                child = child.with_resource_path(path);
            }
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
