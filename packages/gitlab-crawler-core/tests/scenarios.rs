//! End-to-end scheduler scenarios against stub collaborators: pagination
//! fan-out, rate-limit retry, resource filtering, pause/resume, backoff, and
//! the vulnerability-findings 403-as-success path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gitlab_crawler_core::{
    build_registry, build_throttle, AuthConfig, AuthError, AuthProvider, CrawlerEvent, EventKind,
    IncludeResources, Job, JobType, Page, Pagination, RefreshedToken, ResourceId, Scheduler,
    SchedulerConfig,
};
use gitlab_crawler_core::collaborators::{ApiClient, ApiError, StorageError};
use gitlab_crawler_core::collaborators::Storage;
use gitlab_crawler_core::cursor::CursorRegistry;
use gitlab_crawler_core::events::EventBus;
use serde_json::{json, Value};
use tokio::sync::mpsc;

struct StubApi {
    list_groups_responses: Mutex<VecDeque<Result<Page, ApiError>>>,
    list_projects_responses: Mutex<VecDeque<Result<Page, ApiError>>>,
    get_project_calls: Mutex<Vec<i64>>,
    vulnerabilities_forced: Option<u16>,
}

impl StubApi {
    fn new() -> Self {
        Self {
            list_groups_responses: Mutex::new(VecDeque::new()),
            list_projects_responses: Mutex::new(VecDeque::new()),
            get_project_calls: Mutex::new(Vec::new()),
            vulnerabilities_forced: None,
        }
    }

    fn with_group_pages(self, pages: Vec<Result<Page, ApiError>>) -> Self {
        *self.list_groups_responses.lock().unwrap() = pages.into();
        self
    }

    fn with_project_pages(self, pages: Vec<Result<Page, ApiError>>) -> Self {
        *self.list_projects_responses.lock().unwrap() = pages.into();
        self
    }

    fn with_vulnerabilities_status(mut self, status: u16) -> Self {
        self.vulnerabilities_forced = Some(status);
        self
    }
}

fn group(id: i64) -> Value {
    json!({ "id": id, "full_path": format!("group-{id}") })
}

fn project(id: i64, path: &str) -> Value {
    json!({ "id": id, "path_with_namespace": path })
}

#[async_trait]
impl ApiClient for StubApi {
    async fn list_groups(&self, _oauth_token: &str, _page: Pagination) -> Result<Page, ApiError> {
        self.list_groups_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Page::default()))
    }

    async fn get_group(&self, _oauth_token: &str, group_id: i64) -> Result<Value, ApiError> {
        Ok(group(group_id))
    }

    async fn list_subgroups(&self, _t: &str, _gid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_group_members(&self, _t: &str, _gid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_group_projects(&self, _t: &str, _gid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_group_issues(&self, _t: &str, _gid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_projects(&self, _oauth_token: &str, _page: Pagination) -> Result<Page, ApiError> {
        self.list_projects_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Page::default()))
    }

    async fn get_project(&self, _oauth_token: &str, project_id: i64) -> Result<Value, ApiError> {
        self.get_project_calls.lock().unwrap().push(project_id);
        Ok(project(project_id, &format!("project-{project_id}")))
    }

    async fn list_branches(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_merge_requests(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_project_issues(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_milestones(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_releases(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_pipelines(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_vulnerability_findings(
        &self,
        _oauth_token: &str,
        _project_id: i64,
        _page: Pagination,
    ) -> Result<Page, ApiError> {
        if let Some(status) = self.vulnerabilities_forced {
            return Err(ApiError::Http {
                status,
                message: "forbidden".into(),
            });
        }
        Ok(Page::default())
    }

    async fn list_merge_request_discussions(
        &self,
        _t: &str,
        _pid: i64,
        _iid: i64,
        _p: Pagination,
    ) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn list_issue_discussions(
        &self,
        _t: &str,
        _pid: i64,
        _iid: i64,
        _p: Pagination,
    ) -> Result<Page, ApiError> {
        Ok(Page::default())
    }

    async fn get_pipeline(&self, _t: &str, _pid: i64, _pipeline_id: i64) -> Result<Value, ApiError> {
        Ok(json!({}))
    }

    async fn get_pipeline_test_report(
        &self,
        _t: &str,
        _pid: i64,
        _pipeline_id: i64,
    ) -> Result<Value, ApiError> {
        Ok(json!({}))
    }
}

/// An `ApiClient` whose `get_project` always fails, for S5's retry-to-exhaustion
/// scenario.
struct AlwaysFailingApi;

#[async_trait]
impl ApiClient for AlwaysFailingApi {
    async fn list_groups(&self, _t: &str, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn get_group(&self, _t: &str, _gid: i64) -> Result<Value, ApiError> {
        Ok(json!({}))
    }
    async fn list_subgroups(&self, _t: &str, _gid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_group_members(&self, _t: &str, _gid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_group_projects(&self, _t: &str, _gid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_group_issues(&self, _t: &str, _gid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_projects(&self, _t: &str, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn get_project(&self, _oauth_token: &str, _project_id: i64) -> Result<Value, ApiError> {
        Err(ApiError::Network("connection reset".into()))
    }
    async fn list_branches(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_merge_requests(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_project_issues(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_milestones(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_releases(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_pipelines(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_vulnerability_findings(&self, _t: &str, _pid: i64, _p: Pagination) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_merge_request_discussions(
        &self,
        _t: &str,
        _pid: i64,
        _iid: i64,
        _p: Pagination,
    ) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn list_issue_discussions(
        &self,
        _t: &str,
        _pid: i64,
        _iid: i64,
        _p: Pagination,
    ) -> Result<Page, ApiError> {
        Ok(Page::default())
    }
    async fn get_pipeline(&self, _t: &str, _pid: i64, _pipeline_id: i64) -> Result<Value, ApiError> {
        Ok(json!({}))
    }
    async fn get_pipeline_test_report(
        &self,
        _t: &str,
        _pid: i64,
        _pipeline_id: i64,
    ) -> Result<Value, ApiError> {
        Ok(json!({}))
    }
}

#[derive(Default)]
struct RecordingStorage {
    jsonl: Mutex<HashMap<String, Vec<Value>>>,
    json: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn write_jsonl(&self, path: &str, records: &[Value]) -> Result<(), StorageError> {
        self.jsonl
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    async fn write_json(&self, path: &str, obj: &Value) -> Result<(), StorageError> {
        self.json.lock().unwrap().insert(path.to_string(), obj.clone());
        Ok(())
    }
}

struct NoRefreshAuthProvider;

#[async_trait]
impl AuthProvider for NoRefreshAuthProvider {
    async fn refresh(&self, _gitlab_url: &str, _auth: &AuthConfig) -> Result<RefreshedToken, AuthError> {
        Err(AuthError::NotConfigured)
    }
}

/// Drains `bus.on(kind, ...)` into an mpsc channel so tests can `.await` the
/// next event of interest instead of polling scheduler state.
fn event_channel(bus_scheduler: &Arc<Scheduler>, kind: EventKind) -> mpsc::UnboundedReceiver<CrawlerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus_scheduler.on(kind, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<CrawlerEvent>) -> CrawlerEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_scheduler(
    config: SchedulerConfig,
    api: Arc<dyn ApiClient>,
    storage: Arc<dyn Storage>,
) -> (Arc<Scheduler>, Arc<CursorRegistry>) {
    let events = Arc::new(EventBus::new());
    let cursors = Arc::new(CursorRegistry::new(events.clone()));
    let throttle = Arc::new(build_throttle(&config));
    let registry = build_registry(api, storage, throttle, cursors.clone());
    let scheduler = Scheduler::new(config, registry, events, cursors.clone(), Arc::new(NoRefreshAuthProvider));
    (scheduler, cursors)
}

fn base_config() -> SchedulerConfig {
    SchedulerConfig::new(
        "https://gitlab.example",
        AuthConfig::default().with_oauth_token("tok"),
        "./out",
    )
}

#[tokio::test(start_paused = true)]
async fn s1_two_pages_of_groups_discovers_150_group_details_jobs() {
    init_tracing();
    let api = Arc::new(
        StubApi::new().with_group_pages(vec![
            Ok(Page {
                items: (1..=100).map(group).collect(),
            }),
            Ok(Page {
                items: (101..=150).map(group).collect(),
            }),
        ]),
    );
    let storage = Arc::new(RecordingStorage::default());
    let config = base_config()
        .with_requests_per_second(100.0)
        .with_resource_rate(JobType::DiscoverGroups, 100.0)
        .with_resource_rate(JobType::GroupDetails, 100.0)
        .with_resource_rate(JobType::DiscoverSubgroups, 100.0)
        .with_resource_rate(JobType::GroupMembers, 100.0)
        .with_resource_rate(JobType::GroupProjects, 100.0)
        .with_resource_rate(JobType::GroupIssues, 100.0)
        .with_concurrency(1)
        .with_max_retries(0);
    let (scheduler, cursors) = make_scheduler(config, api, storage.clone());

    let mut started = event_channel(&scheduler, EventKind::JobStarted);

    scheduler.start_resource_type(JobType::DiscoverGroups, ResourceId::All, None, HashMap::new());

    let mut group_details_started = 0;
    while group_details_started < 150 {
        if let CrawlerEvent::JobStarted { job, .. } = recv(&mut started).await {
            if job.job_type == JobType::GroupDetails {
                group_details_started += 1;
            }
        }
    }

    let cursor = cursors
        .get_cursor(JobType::DiscoverGroups, &ResourceId::All)
        .expect("cursor registered");
    assert_eq!(cursor.next_page, 3);
    assert!(!cursor.has_next_page);

    let jsonl = storage.jsonl.lock().unwrap();
    let groups_file = jsonl.get("groups.jsonl").expect("groups.jsonl written");
    assert_eq!(groups_file.len(), 150);
    assert_eq!(groups_file[0]["id"], json!(1));
    assert_eq!(groups_file[149]["id"], json!(150));
}

#[tokio::test(start_paused = true)]
async fn s2_rate_limit_then_success_retries_once_with_no_job_failed() {
    init_tracing();
    let api = Arc::new(StubApi::new().with_project_pages(vec![
        Err(ApiError::Http {
            status: 429,
            message: "too many requests".into(),
        }),
        Ok(Page {
            items: (1..=30).map(|i| project(i, &format!("p{i}"))).collect(),
        }),
    ]));
    let storage = Arc::new(RecordingStorage::default());
    let config = base_config()
        .with_resource_rate(JobType::DiscoverProjects, 1000.0)
        .with_max_retries(0);
    let (scheduler, _cursors) = make_scheduler(config, api, storage);

    let mut started = event_channel(&scheduler, EventKind::JobStarted);
    let mut completed = event_channel(&scheduler, EventKind::JobCompleted);
    let mut failed = event_channel(&scheduler, EventKind::JobFailed);

    scheduler.start_resource_type(JobType::DiscoverProjects, ResourceId::All, None, HashMap::new());

    let start_event = recv(&mut started).await;
    assert!(matches!(start_event, CrawlerEvent::JobStarted { job, .. } if job.job_type == JobType::DiscoverProjects));

    let complete_event = recv(&mut completed).await;
    assert!(matches!(complete_event, CrawlerEvent::JobCompleted { job, .. } if job.job_type == JobType::DiscoverProjects));

    assert!(failed.try_recv().is_err(), "no JOB_FAILED expected");
}

#[tokio::test(start_paused = true)]
async fn s3_project_path_filter_admits_only_the_matching_project() {
    init_tracing();
    let api = Arc::new(StubApi::new().with_project_pages(vec![Ok(Page {
        items: vec![project(1, "acme/a"), project(2, "beta/b")],
    })]));
    let storage = Arc::new(RecordingStorage::default());
    let config = base_config()
        .with_resource_rate(JobType::DiscoverProjects, 1000.0)
        .with_resource_rate(JobType::ProjectDetails, 1000.0)
        .with_include_resources(IncludeResources::default().with_project_paths(["acme/".to_string()]));
    let (scheduler, _cursors) = make_scheduler(config, api.clone(), storage);

    let mut completed = event_channel(&scheduler, EventKind::JobCompleted);

    scheduler.start_resource_type(JobType::DiscoverProjects, ResourceId::All, None, HashMap::new());

    loop {
        if let CrawlerEvent::JobCompleted { job, .. } = recv(&mut completed).await {
            if job.job_type == JobType::DiscoverProjects {
                break;
            }
        }
    }

    // Give the (filtered) enqueue a moment to land or be dropped.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let calls = api.get_project_calls.lock().unwrap();
    assert_eq!(*calls, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn s4_pause_blocks_dispatch_until_resume() {
    init_tracing();
    let api = Arc::new(StubApi::new());
    let storage = Arc::new(RecordingStorage::default());
    let config = base_config().with_resource_rate(JobType::GroupDetails, 1000.0);
    let (scheduler, _cursors) = make_scheduler(config, api, storage);

    let mut started = event_channel(&scheduler, EventKind::JobStarted);
    let mut completed = event_channel(&scheduler, EventKind::JobCompleted);

    // Dispatch reservation happens synchronously inside `enqueue_job`/
    // `start_discovery`, so the only way to guarantee nothing is reserved
    // before the pause takes effect is to pause first.
    scheduler.pause();
    scheduler.start_discovery().await.unwrap();
    for i in 1..=10 {
        scheduler.enqueue_job(Job::new(JobType::GroupDetails, ResourceId::Id(i)));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(started.try_recv().is_err(), "no JOB_STARTED while paused");

    scheduler.resume();

    let mut group_details_completed = 0;
    while group_details_completed < 10 {
        if let CrawlerEvent::JobCompleted { job, .. } = recv(&mut completed).await {
            if job.job_type == JobType::GroupDetails {
                group_details_completed += 1;
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn s5_retry_backoff_fails_three_times_with_documented_delays() {
    init_tracing();
    let api: Arc<dyn ApiClient> = Arc::new(AlwaysFailingApi);
    let storage = Arc::new(RecordingStorage::default());
    let config = base_config()
        .with_resource_rate(JobType::ProjectDetails, 1000.0)
        .with_max_retries(2)
        .with_retry_delay(Duration::from_millis(20))
        .with_retry_backoff_factor(2.0)
        .with_retry_jitter(0.0);
    let (scheduler, _cursors) = make_scheduler(config, api, storage);

    let mut failed = event_channel(&scheduler, EventKind::JobFailed);

    let start = tokio::time::Instant::now();
    scheduler.start_resource_type(JobType::ProjectDetails, ResourceId::Id(1), None, HashMap::new());

    let first = recv(&mut failed).await;
    let CrawlerEvent::JobFailed { attempts: a1, will_retry: r1, .. } = first else { panic!("wrong event") };
    assert_eq!(a1, 1);
    assert!(r1);

    let second = recv(&mut failed).await;
    let CrawlerEvent::JobFailed { attempts: a2, will_retry: r2, .. } = second else { panic!("wrong event") };
    assert_eq!(a2, 2);
    assert!(r2);
    assert!(start.elapsed() >= Duration::from_millis(20));

    let third = recv(&mut failed).await;
    let CrawlerEvent::JobFailed { attempts: a3, will_retry: r3, .. } = third else { panic!("wrong event") };
    assert_eq!(a3, 3);
    assert!(!r3);
    assert!(start.elapsed() >= Duration::from_millis(60));
}

#[tokio::test(start_paused = true)]
async fn s6_vulnerabilities_403_is_a_successful_skip_not_a_failure() {
    init_tracing();
    let api: Arc<dyn ApiClient> = Arc::new(StubApi::new().with_vulnerabilities_status(403));
    let storage = Arc::new(RecordingStorage::default());
    let config = base_config().with_resource_rate(JobType::ProjectVulnerabilities, 1000.0);

    let events = Arc::new(EventBus::new());
    let cursors = Arc::new(CursorRegistry::new(events.clone()));
    let throttle = Arc::new(build_throttle(&config));
    let registry = build_registry(api, storage, throttle, cursors.clone());
    // Exercise the handler directly: the scheduler-level wiring is already
    // covered by the other scenarios, and isolating this one keeps the
    // assertion on the handler's own `skipped` contract.
    let handler = registry.get(JobType::ProjectVulnerabilities).unwrap();
    let job = Job::new(JobType::ProjectVulnerabilities, ResourceId::Id(7));
    let outcome = handler.handle(&job, &config.auth).await.unwrap();

    assert!(outcome.skipped);
    assert_eq!(outcome.data.len(), 0);
}
