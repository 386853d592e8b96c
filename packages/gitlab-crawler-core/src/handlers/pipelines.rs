use async_trait::async_trait;

use crate::auth::AuthConfig;
use crate::job::{Job, JobType};
use crate::paths;
use crate::processor::{HandlerError, HandlerOutcome, JobHandler};

use super::{fetch_single, HandlerContext};

pub struct PipelineDetailsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for PipelineDetailsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job.require_i64("projectId").map_err(HandlerError::Configuration)?;
        let pipeline_id = job.require_i64("pipelineId").map_err(HandlerError::Configuration)?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let details = fetch_single(
            &self.ctx,
            JobType::PipelineDetails,
            &job.resource_id,
            "PIPELINE_DETAILS",
            &paths::pipeline_details(project_id, pipeline_id),
            || async { self.ctx.api.get_pipeline(&token, project_id, pipeline_id).await },
        )
        .await?;

        Ok(HandlerOutcome {
            data: vec![details],
            discovered_jobs: Vec::new(),
            has_next_page: false,
            next_cursor: None,
            skipped: false,
        })
    }
}

pub struct PipelineTestReportsHandler {
    pub(crate) ctx: HandlerContext,
}

#[async_trait]
impl JobHandler for PipelineTestReportsHandler {
    async fn handle(&self, job: &Job, auth: &AuthConfig) -> Result<HandlerOutcome, HandlerError> {
        let project_id = job.require_i64("projectId").map_err(HandlerError::Configuration)?;
        let pipeline_id = job.require_i64("pipelineId").map_err(HandlerError::Configuration)?;
        let token = auth.oauth_token.clone().unwrap_or_default();

        let report = fetch_single(
            &self.ctx,
            JobType::PipelineTestReports,
            &job.resource_id,
            "PIPELINE_TEST_REPORTS",
            &paths::pipeline_test_report(project_id, pipeline_id),
            || async {
                self.ctx
                    .api
                    .get_pipeline_test_report(&token, project_id, pipeline_id)
                    .await
            },
        )
        .await?;

        Ok(HandlerOutcome {
            data: vec![report],
            discovered_jobs: Vec::new(),
            has_next_page: false,
            next_cursor: None,
            skipped: false,
        })
    }
}
