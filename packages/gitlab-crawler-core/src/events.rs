//! In-process event bus: synchronous publication of lifecycle and progress
//! events to registered listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::ResourceKind;
use crate::job::{Job, JobType, ResourceId};

/// Closed set of event tags, used to filter `on`/`off` listener
/// registration without requiring the listener to match on the full
/// `CrawlerEvent` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    CrawlerStarted,
    CrawlerPaused,
    CrawlerResumed,
    CrawlerStopped,
    JobStarted,
    JobCompleted,
    JobFailed,
    PageCompleted,
    ResourceDiscovered,
}

/// Events produced during a crawl. Each carries a timestamp, the
/// originating job where applicable, and type-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlerEvent {
    CrawlerStarted {
        timestamp: DateTime<Utc>,
    },
    CrawlerPaused {
        timestamp: DateTime<Utc>,
    },
    CrawlerResumed {
        timestamp: DateTime<Utc>,
    },
    CrawlerStopped {
        timestamp: DateTime<Utc>,
    },
    JobStarted {
        job: Job,
        timestamp: DateTime<Utc>,
    },
    JobCompleted {
        job: Job,
        result: serde_json::Value,
        #[serde(with = "duration_millis")]
        duration: Duration,
        discovered_jobs: usize,
        timestamp: DateTime<Utc>,
    },
    JobFailed {
        job: Job,
        attempts: u32,
        will_retry: bool,
        error: String,
        timestamp: DateTime<Utc>,
    },
    PageCompleted {
        job_type: JobType,
        resource_id: ResourceId,
        page: u32,
        has_next_page: bool,
    },
    ResourceDiscovered {
        kind: ResourceKind,
        resource_id: ResourceId,
        parent: Option<ResourceId>,
    },
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

impl CrawlerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CrawlerEvent::CrawlerStarted { .. } => EventKind::CrawlerStarted,
            CrawlerEvent::CrawlerPaused { .. } => EventKind::CrawlerPaused,
            CrawlerEvent::CrawlerResumed { .. } => EventKind::CrawlerResumed,
            CrawlerEvent::CrawlerStopped { .. } => EventKind::CrawlerStopped,
            CrawlerEvent::JobStarted { .. } => EventKind::JobStarted,
            CrawlerEvent::JobCompleted { .. } => EventKind::JobCompleted,
            CrawlerEvent::JobFailed { .. } => EventKind::JobFailed,
            CrawlerEvent::PageCompleted { .. } => EventKind::PageCompleted,
            CrawlerEvent::ResourceDiscovered { .. } => EventKind::ResourceDiscovered,
        }
    }
}

pub type ListenerId = u64;
type Listener = Box<dyn Fn(&CrawlerEvent) + Send + Sync>;

/// Per-scheduler publisher/subscriber. Delivery is synchronous on the
/// publisher's thread — listeners must be non-blocking or return quickly,
/// since `emit` does not return until every registered listener for the
/// event's kind has run.
pub struct EventBus {
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `listener` for `kind`, returning an id usable with `off`.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&CrawlerEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) {
        if let Some(list) = self.listeners.lock().unwrap().get_mut(&kind) {
            list.retain(|(listener_id, _)| *listener_id != id);
        }
    }

    /// Publishes `event` synchronously to every listener registered for its
    /// kind, in registration order.
    pub fn emit(&self, event: CrawlerEvent) {
        let kind = event.kind();
        tracing::debug!(?kind, "emitting crawler event");
        let listeners = self.listeners.lock().unwrap();
        if let Some(list) = listeners.get(&kind) {
            for (_, listener) in list {
                listener(&event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn listener_receives_only_its_registered_kind() {
        let bus = EventBus::new();
        let started_count = Arc::new(AtomicUsize::new(0));
        let failed_count = Arc::new(AtomicUsize::new(0));

        let sc = started_count.clone();
        bus.on(EventKind::CrawlerStarted, move |_| {
            sc.fetch_add(1, Ordering::SeqCst);
        });
        let fc = failed_count.clone();
        bus.on(EventKind::JobFailed, move |_| {
            fc.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(CrawlerEvent::CrawlerStarted {
            timestamp: Utc::now(),
        });

        assert_eq!(started_count.load(Ordering::SeqCst), 1);
        assert_eq!(failed_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.on(EventKind::CrawlerStopped, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.off(EventKind::CrawlerStopped, id);
        bus.emit(CrawlerEvent::CrawlerStopped {
            timestamp: Utc::now(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn emit_delivers_synchronously_before_returning() {
        let bus = EventBus::new();
        let observed = Arc::new(std::sync::Mutex::new(false));
        let o = observed.clone();
        bus.on(EventKind::CrawlerResumed, move |_| {
            *o.lock().unwrap() = true;
        });

        bus.emit(CrawlerEvent::CrawlerResumed {
            timestamp: Utc::now(),
        });

        assert!(*observed.lock().unwrap());
    }
}
