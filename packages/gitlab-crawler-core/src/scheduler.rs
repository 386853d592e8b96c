//! The scheduler: priority queueing, concurrency-bounded dispatch,
//! retry/backoff, and pause/resume/stop lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::auth::AuthConfig;
use crate::config::SchedulerConfig;
use crate::cursor::{CursorRegistry, CursorSnapshot};
use crate::error::SchedulerError;
use crate::events::{CrawlerEvent, EventBus, EventKind, ListenerId};
use crate::job::{Job, JobType, ResourceId};
use crate::processor::ProcessorRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSubset {
    pub gitlab_url: String,
    pub output_dir: String,
    pub concurrency: usize,
    pub requests_per_second: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub cursors: CursorSnapshot,
    pub queued_jobs: HashMap<JobType, Vec<Job>>,
    pub config: ConfigSubset,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub job_type: JobType,
    pub queued: usize,
    pub running: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStateSummary {
    pub is_running: bool,
    pub is_paused: bool,
    pub running: usize,
    pub queued: usize,
}

struct SchedulerState {
    queues: HashMap<JobType, Vec<Job>>,
    running: std::collections::HashSet<String>,
    running_by_type: HashMap<JobType, std::collections::HashSet<String>>,
    retry_timers: HashMap<String, JoinHandle<()>>,
    is_running: bool,
    is_paused: bool,
    concurrency: usize,
    concurrency_per_type: HashMap<JobType, usize>,
    global_auth: AuthConfig,
}

impl SchedulerState {
    fn per_type_cap(&self, job_type: JobType) -> usize {
        self.concurrency_per_type
            .get(&job_type)
            .copied()
            .unwrap_or(self.concurrency)
    }
}

/// Concurrent, rate-limited, resumable job scheduler. Construct via
/// [`Scheduler::new`] and interact through `Arc<Scheduler>` — the dispatch
/// loop and retry timers hold their own clones of the handle.
pub struct Scheduler {
    config: SchedulerConfig,
    processors: Arc<ProcessorRegistry>,
    events: Arc<EventBus>,
    cursors: Arc<CursorRegistry>,
    auth_refresher: Arc<crate::auth::AuthRefresher>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    /// `events` and `cursors` must be the same instances handed to
    /// [`crate::handlers::build_registry`] when constructing `processors` —
    /// the scheduler and the handlers observe one shared cursor/event state.
    pub fn new(
        config: SchedulerConfig,
        processors: ProcessorRegistry,
        events: Arc<EventBus>,
        cursors: Arc<CursorRegistry>,
        auth_provider: Arc<dyn crate::auth::AuthProvider>,
    ) -> Arc<Self> {
        let auth_refresher = Arc::new(crate::auth::AuthRefresher::new(
            auth_provider,
            config.auth_refresh_buffer_minutes,
        ));

        let state = SchedulerState {
            queues: HashMap::new(),
            running: std::collections::HashSet::new(),
            running_by_type: HashMap::new(),
            retry_timers: HashMap::new(),
            is_running: false,
            is_paused: false,
            concurrency: config.concurrency,
            concurrency_per_type: config.concurrency_per_resource_type.clone(),
            global_auth: config.auth.clone(),
        };

        Arc::new(Self {
            config,
            processors: Arc::new(processors),
            events,
            cursors,
            auth_refresher,
            state: Mutex::new(state),
        })
    }

    pub fn on(&self, kind: EventKind, listener: impl Fn(&CrawlerEvent) + Send + Sync + 'static) -> ListenerId {
        self.events.on(kind, listener)
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) {
        self.events.off(kind, id)
    }

    /// Enqueues `DISCOVER_GROUPS` and `DISCOVER_PROJECTS`, transitions to
    /// running, emits `CRAWLER_STARTED`. Fails if already running.
    pub async fn start_discovery(self: &Arc<Self>) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_running {
                return Err(SchedulerError::AlreadyRunning);
            }
            state.is_running = true;
        }
        tracing::info!(gitlab_url = %self.config.gitlab_url, "Starting crawl discovery");
        self.events.emit(CrawlerEvent::CrawlerStarted { timestamp: Utc::now() });

        self.enqueue_job(Job::new(JobType::DiscoverGroups, ResourceId::All));
        self.enqueue_job(Job::new(JobType::DiscoverProjects, ResourceId::All));
        self.dispatch_tick();
        Ok(())
    }

    /// Enqueues a single job for `(job_type, resource_id)`, starting the
    /// scheduler if it is not already running.
    pub fn start_resource_type(
        self: &Arc<Self>,
        job_type: JobType,
        resource_id: ResourceId,
        resource_path: Option<String>,
        data: HashMap<String, serde_json::Value>,
    ) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.is_running {
                state.is_running = true;
                drop(state);
                self.events.emit(CrawlerEvent::CrawlerStarted { timestamp: Utc::now() });
            }
        }

        let mut job = Job::new(job_type, resource_id);
        if let Some(path) = resource_path {
            job = job.with_resource_path(path);
        }
        for (k, v) in data {
            job = job.with_data(k, v);
        }
        self.enqueue_job(job);
        self.dispatch_tick();
    }

    /// Filters `job` against `includeResources`, registers a cursor entry
    /// if none exists, appends it to its type's queue, and triggers a
    /// dispatch tick.
    pub fn enqueue_job(self: &Arc<Self>, job: Job) {
        if !self.passes_filter(&job) {
            return;
        }

        if self.cursors.get_cursor(job.job_type, &job.resource_id).is_none() {
            self.cursors
                .register_cursor(job.job_type, job.resource_id.clone(), 0, true, None);
        }

        {
            let mut state = self.state.lock().unwrap();
            state.queues.entry(job.job_type).or_default().push(job);
        }
        self.dispatch_tick();
    }

    /// Re-enqueues the same job id for the next pagination page, bypassing
    /// the filter (it already passed once) and without bumping retryCount.
    fn reenqueue_same_job(self: &Arc<Self>, job: Job) {
        let mut state = self.state.lock().unwrap();
        state.queues.entry(job.job_type).or_default().push(job);
    }

    fn passes_filter(&self, job: &Job) -> bool {
        if let Some(hook) = &self.config.hooks.before_job_start {
            if !hook(job) {
                return false;
            }
        }

        let include = &self.config.include_resources;
        if job.job_type.is_project_scoped() {
            if !include.project_ids.is_empty() {
                let Some(id) = job.resource_id.as_i64() else { return false };
                if !include.project_ids.contains(&id) {
                    return false;
                }
            }
            if !include.project_paths.is_empty() {
                let Some(path) = &job.resource_path else { return false };
                if !include.project_paths.iter().any(|p| path.starts_with(p.as_str())) {
                    return false;
                }
            }
        }
        if job.job_type.is_group_scoped() {
            if !include.group_ids.is_empty() {
                let Some(id) = job.resource_id.as_i64() else { return false };
                if !include.group_ids.contains(&id) {
                    return false;
                }
            }
            if !include.group_paths.is_empty() {
                let Some(path) = &job.resource_path else { return false };
                if !include.group_paths.iter().any(|p| path.starts_with(p.as_str())) {
                    return false;
                }
            }
        }

        true
    }

    pub fn pause(&self) {
        self.state.lock().unwrap().is_paused = true;
        tracing::info!("Crawl paused");
        self.events.emit(CrawlerEvent::CrawlerPaused { timestamp: Utc::now() });
    }

    pub fn resume(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.is_paused {
                return;
            }
            state.is_paused = false;
        }
        tracing::info!("Crawl resumed");
        self.events.emit(CrawlerEvent::CrawlerResumed { timestamp: Utc::now() });
        self.dispatch_tick();
    }

    /// Clears all queues, cancels retry timers, marks stopped, emits
    /// `CRAWLER_STOPPED`. Running jobs finish but their completions are
    /// ignored for further dispatch.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.is_running {
            return;
        }
        let queued = state.queues.values().map(Vec::len).sum::<usize>();
        state.queues.clear();
        for (_, handle) in state.retry_timers.drain() {
            handle.abort();
        }
        state.is_running = false;
        drop(state);
        tracing::info!(queued_dropped = queued, "Crawl stopped");
        self.events.emit(CrawlerEvent::CrawlerStopped { timestamp: Utc::now() });
    }

    pub fn set_concurrency(self: &Arc<Self>, n: usize) {
        self.state.lock().unwrap().concurrency = n;
        self.dispatch_tick();
    }

    pub fn set_resource_concurrency(self: &Arc<Self>, job_type: JobType, n: usize) {
        self.state.lock().unwrap().concurrency_per_type.insert(job_type, n);
        self.dispatch_tick();
    }

    pub fn get_state(&self) -> SchedulerStateSummary {
        let state = self.state.lock().unwrap();
        SchedulerStateSummary {
            is_running: state.is_running,
            is_paused: state.is_paused,
            running: state.running.len(),
            queued: state.queues.values().map(Vec::len).sum(),
        }
    }

    pub fn get_queue_stats(&self) -> Vec<QueueStats> {
        let state = self.state.lock().unwrap();
        JobType::ALL
            .iter()
            .map(|&job_type| QueueStats {
                job_type,
                queued: state.queues.get(&job_type).map(Vec::len).unwrap_or(0),
                running: state
                    .running_by_type
                    .get(&job_type)
                    .map(|s| s.len())
                    .unwrap_or(0),
            })
            .collect()
    }

    pub fn export_state(&self) -> SchedulerSnapshot {
        let state = self.state.lock().unwrap();
        let queued_jobs = state
            .queues
            .iter()
            .filter(|(_, jobs)| !jobs.is_empty())
            .map(|(t, jobs)| (*t, jobs.clone()))
            .collect();

        SchedulerSnapshot {
            cursors: self.cursors.export_state(),
            queued_jobs,
            config: ConfigSubset {
                gitlab_url: self.config.gitlab_url.clone(),
                output_dir: self.config.output_dir.clone(),
                concurrency: state.concurrency,
                requests_per_second: self.config.requests_per_second,
            },
        }
    }

    /// Merges cursor state and appends queued jobs; preserves existing auth.
    /// Importing while running merges into the live queues rather than
    /// rejecting, matching `enqueueJob`'s always-appendable contract.
    pub fn import_state(self: &Arc<Self>, snapshot: SchedulerSnapshot) {
        self.cursors.import_state(snapshot.cursors);
        for (_, jobs) in snapshot.queued_jobs {
            for job in jobs {
                self.enqueue_job(job);
            }
        }
    }

    /// Runs one dispatch pass: for each job type, reserve as many slots as
    /// concurrency allows, pull the highest-priority/oldest jobs, and spawn
    /// their execution. Reservation is synchronous; execution is not.
    fn dispatch_tick(self: &Arc<Self>) {
        let (to_start, just_terminated) = {
            let mut state = self.state.lock().unwrap();
            if !state.is_running || state.is_paused {
                (Vec::new(), false)
            } else {
                let mut collected = Vec::new();
                for &job_type in JobType::ALL.iter() {
                    let global_available = state.concurrency.saturating_sub(state.running.len());
                    if global_available == 0 {
                        break;
                    }
                    let per_type_cap = state.per_type_cap(job_type);
                    let running_for_type =
                        state.running_by_type.get(&job_type).map(|s| s.len()).unwrap_or(0);
                    let type_available = per_type_cap.saturating_sub(running_for_type);
                    let available = global_available.min(type_available);
                    if available == 0 {
                        continue;
                    }

                    let Some(queue) = state.queues.get_mut(&job_type) else { continue };
                    if queue.is_empty() {
                        continue;
                    }
                    queue.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));

                    // Double-dispatch guard: a job id already executing (the
                    // pagination re-enqueue can race a fresh enqueue of the
                    // same id) stays queued for a later tick instead of
                    // starting a second concurrent execution.
                    let mut jobs = Vec::new();
                    let mut deferred = Vec::new();
                    for job in queue.drain(..) {
                        if jobs.len() < available && !state.running.contains(&job.id) {
                            jobs.push(job);
                        } else {
                            deferred.push(job);
                        }
                    }
                    *queue = deferred;

                    for job in &jobs {
                        state.running.insert(job.id.clone());
                        state
                            .running_by_type
                            .entry(job_type)
                            .or_default()
                            .insert(job.id.clone());
                    }
                    collected.extend(jobs);
                }

                let terminated = collected.is_empty()
                    && state.running.is_empty()
                    && state.queues.values().all(Vec::is_empty)
                    && state.is_running;
                if terminated {
                    state.is_running = false;
                }
                (collected, terminated)
            }
        };

        if just_terminated {
            tracing::info!("Crawl queues drained, crawler stopped");
            self.events.emit(CrawlerEvent::CrawlerStopped { timestamp: Utc::now() });
        }

        if !to_start.is_empty() {
            tracing::debug!(count = to_start.len(), "Dispatching jobs");
        }

        for job in to_start {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.execute_job(job).await;
            });
        }
    }

    async fn execute_job(self: Arc<Self>, job: Job) {
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Executing job");
        self.events.emit(CrawlerEvent::JobStarted {
            job: job.clone(),
            timestamp: Utc::now(),
        });

        let started_at = tokio::time::Instant::now();
        let outcome = self.run_handler(&job).await;

        match outcome {
            Ok(handler_outcome) => {
                let duration = started_at.elapsed();
                let discovered_count = handler_outcome.discovered_jobs.len();

                tracing::info!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    duration = ?duration,
                    discovered_jobs = discovered_count,
                    skipped = handler_outcome.skipped,
                    "Job completed"
                );
                self.events.emit(CrawlerEvent::JobCompleted {
                    job: job.clone(),
                    result: serde_json::json!({
                        "count": handler_outcome.data.len(),
                        "skipped": handler_outcome.skipped,
                    }),
                    duration,
                    discovered_jobs: discovered_count,
                    timestamp: Utc::now(),
                });

                self.finish_job(&job);

                // Hooks fire unconditionally as part of per-job cleanup;
                // only re-dispatch (children, pagination, retry) is gated on
                // the crawler still running.
                if let Some(hook) = &self.config.hooks.after_job_complete {
                    hook(&job);
                }

                let still_running = self.state.lock().unwrap().is_running;
                if still_running {
                    for child in handler_outcome.discovered_jobs {
                        self.enqueue_job(child);
                    }
                    if handler_outcome.has_next_page {
                        self.reenqueue_same_job(job.clone());
                    }
                }
            }
            Err(err) => {
                let attempts = job.retry_count + 1;
                let will_retry = err.is_retryable() && job.retry_count < self.config.max_retries;

                tracing::warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts,
                    will_retry,
                    error = %err,
                    "Job failed"
                );
                self.events.emit(CrawlerEvent::JobFailed {
                    job: job.clone(),
                    attempts,
                    will_retry,
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });

                self.finish_job(&job);

                if let Some(hook) = &self.config.hooks.job_failed {
                    hook(&job, &err.to_string());
                }

                let still_running = self.state.lock().unwrap().is_running;
                if still_running && will_retry {
                    self.schedule_retry(job);
                }
            }
        }

        self.dispatch_tick();
    }

    async fn run_handler(&self, job: &Job) -> Result<crate::processor::HandlerOutcome, SchedulerError> {
        let Some(handler) = self.processors.get(job.job_type) else {
            return Err(SchedulerError::HandlerMissing(job.job_type.to_string()));
        };

        let mut auth = job.auth.clone().unwrap_or_else(|| self.state.lock().unwrap().global_auth.clone());
        self.auth_refresher.ensure_fresh(&self.config.gitlab_url, &mut auth).await?;
        if job.auth.is_none() {
            self.state.lock().unwrap().global_auth = auth.clone();
        }

        let handle = handler.handle(job, &auth);
        let outcome = match self.config.timeout {
            Some(timeout) => tokio::time::timeout(timeout, handle)
                .await
                .map_err(|_| SchedulerError::Timeout(job.id.clone()))?,
            None => handle.await,
        };

        outcome.map_err(|source| SchedulerError::JobFailed {
            job_id: job.id.clone(),
            source,
        })
    }

    fn finish_job(&self, job: &Job) {
        let mut state = self.state.lock().unwrap();
        state.running.remove(&job.id);
        if let Some(set) = state.running_by_type.get_mut(&job.job_type) {
            set.remove(&job.id);
        }
    }

    fn schedule_retry(self: &Arc<Self>, job: Job) {
        let exponent = job.retry_count as i32;
        let base = self.config.retry_delay.as_secs_f64() * self.config.retry_backoff_factor.powi(exponent);
        let jitter = rand::random::<f64>() * 2.0 * self.config.retry_jitter - self.config.retry_jitter;
        let delay = StdDuration::from_secs_f64((base * (1.0 + jitter)).max(0.0));

        tracing::info!(job_id = %job.id, job_type = %job.job_type, delay = ?delay, attempt = job.retry_count + 1, "Scheduling retry");

        let scheduler = self.clone();
        let retried = job.as_retry();
        let job_id = job.id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.state.lock().unwrap().retry_timers.remove(&job_id);
            let still_running = scheduler.state.lock().unwrap().is_running;
            if still_running {
                scheduler.enqueue_job(retried);
            }
        });

        self.state.lock().unwrap().retry_timers.insert(job.id.clone(), handle);
    }
}
