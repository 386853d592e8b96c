//! Core scheduling engine for a concurrent, rate-limited, resumable
//! GitLab resource crawl. This crate owns the job model, pagination
//! cursors, event bus, per-resource throttling, auth refresh, and the
//! scheduler loop that ties them together; it does not implement the
//! GitLab API transport, persistence, or auth provider themselves —
//! those are supplied by the caller through the [`collaborators`] traits.

pub mod auth;
pub mod collaborators;
pub mod config;
pub mod cursor;
pub mod error;
pub mod events;
pub mod handlers;
pub mod job;
pub mod paths;
pub mod processor;
pub mod scheduler;
pub mod throttle;

pub use auth::{AuthConfig, AuthError, AuthProvider, AuthRefresher, RefreshedToken};
pub use collaborators::{ApiClient, ApiError, Page, Pagination, Storage, StorageError};
pub use config::{Hooks, IncludeResources, SchedulerConfig};
pub use cursor::{Cursor, CursorRegistry, CursorSnapshot, ResourceKind};
pub use error::SchedulerError;
pub use events::{CrawlerEvent, EventBus, EventKind, ListenerId};
pub use handlers::build_registry;
pub use job::{Job, JobType, ResourceId};
pub use processor::{HandlerError, HandlerOutcome, JobHandler, ProcessorRegistry};
pub use scheduler::{ConfigSubset, QueueStats, Scheduler, SchedulerSnapshot, SchedulerStateSummary};
pub use throttle::{build_throttle, is_rate_limit_error, Throttle, ThrottleConfig};

use std::sync::Arc;

/// Wires one `EventBus`/`CursorRegistry` pair across the processor registry
/// and the scheduler, and builds the throttle from `config`'s rate limits.
/// Equivalent to hand-assembling the pieces in [`scheduler::Scheduler::new`]'s
/// doc comment; most callers want this instead of doing it by hand.
pub fn build_scheduler(
    config: SchedulerConfig,
    api: Arc<dyn ApiClient>,
    storage: Arc<dyn Storage>,
    auth_provider: Arc<dyn AuthProvider>,
) -> Arc<Scheduler> {
    let events = Arc::new(EventBus::new());
    let cursors = Arc::new(CursorRegistry::new(events.clone()));
    let throttle = Arc::new(build_throttle(&config));
    let registry = build_registry(api, storage, throttle, cursors.clone());

    Scheduler::new(config, registry, events, cursors, auth_provider)
}
