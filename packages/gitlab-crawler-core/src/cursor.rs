//! Pagination cursor registry: durable per-resource cursors that make
//! traversal resumable and idempotent across restarts.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{CrawlerEvent, EventBus};
use crate::job::{JobType, ResourceId};

/// Resource kind used for `DiscoveredResources` bookkeeping. Distinct from
/// `JobType`: several job types touch the same resource kind (e.g.
/// `GROUP_DETAILS` and `DISCOVER_SUBGROUPS` both touch `Group`s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Group,
    Project,
    Issue,
    MergeRequest,
    Pipeline,
}

/// Per-resource pagination state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub next_page: u32,
    pub next_cursor: Option<String>,
    pub has_next_page: bool,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CursorKey {
    pub job_type: JobType,
    pub resource_id: ResourceId,
}

/// Snapshot entry pairing a key with its cursor, used for export/import and
/// for `getPendingCursors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorEntry {
    pub key: CursorKey,
    pub cursor: Cursor,
}

/// Serializable snapshot of all cursor and discovery state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorSnapshot {
    pub cursors: Vec<CursorEntry>,
    pub discovered_resources: HashMap<String, Vec<ResourceId>>,
}

pub struct CursorRegistry {
    cursors: Mutex<HashMap<CursorKey, Cursor>>,
    discovered: Mutex<HashMap<ResourceKind, HashSet<ResourceId>>>,
    events: std::sync::Arc<EventBus>,
}

impl CursorRegistry {
    pub fn new(events: std::sync::Arc<EventBus>) -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
            discovered: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Overwrites the cursor entry, emitting `PAGE_COMPLETED`.
    pub fn register_cursor(
        &self,
        job_type: JobType,
        resource_id: ResourceId,
        page: u32,
        has_next_page: bool,
        next_cursor: Option<String>,
    ) -> Cursor {
        let next_page = page + 1;
        let cursor = Cursor {
            next_page,
            next_cursor,
            has_next_page,
            last_updated: Utc::now(),
        };

        let key = CursorKey {
            job_type,
            resource_id: resource_id.clone(),
        };
        self.cursors.lock().unwrap().insert(key, cursor.clone());

        self.events.emit(CrawlerEvent::PageCompleted {
            job_type,
            resource_id,
            page,
            has_next_page,
        });

        cursor
    }

    pub fn get_cursor(&self, job_type: JobType, resource_id: &ResourceId) -> Option<Cursor> {
        let key = CursorKey {
            job_type,
            resource_id: resource_id.clone(),
        };
        self.cursors.lock().unwrap().get(&key).cloned()
    }

    /// Returns `nextPage` if a cursor exists for this key, else 1
    /// (pagination always starts at page 1, per invariant `nextPage >= 1`).
    pub fn get_next_page(&self, job_type: JobType, resource_id: &ResourceId) -> u32 {
        self.get_cursor(job_type, resource_id)
            .map(|c| c.next_page)
            .unwrap_or(1)
    }

    pub fn has_more_pages(&self, job_type: JobType, resource_id: &ResourceId) -> bool {
        self.get_cursor(job_type, resource_id)
            .map(|c| c.has_next_page)
            .unwrap_or(true)
    }

    pub fn get_next_cursor(&self, job_type: JobType, resource_id: &ResourceId) -> Option<String> {
        self.get_cursor(job_type, resource_id)
            .and_then(|c| c.next_cursor)
    }

    /// Idempotent: first-time insertion emits `RESOURCE_DISCOVERED`;
    /// subsequent inserts are no-ops. Returns `true` if this call newly
    /// discovered the resource.
    pub fn mark_resource_discovered(
        &self,
        kind: ResourceKind,
        resource_id: ResourceId,
        parent: Option<ResourceId>,
    ) -> bool {
        let newly_inserted = {
            let mut discovered = self.discovered.lock().unwrap();
            discovered.entry(kind).or_default().insert(resource_id.clone())
        };

        if newly_inserted {
            self.events.emit(CrawlerEvent::ResourceDiscovered {
                kind,
                resource_id,
                parent,
            });
        }

        newly_inserted
    }

    /// All entries with `has_next_page == true`.
    pub fn get_pending_cursors(&self) -> Vec<CursorEntry> {
        self.cursors
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c.has_next_page)
            .map(|(k, c)| CursorEntry {
                key: k.clone(),
                cursor: c.clone(),
            })
            .collect()
    }

    pub fn export_state(&self) -> CursorSnapshot {
        let cursors = self
            .cursors
            .lock()
            .unwrap()
            .iter()
            .map(|(k, c)| CursorEntry {
                key: k.clone(),
                cursor: c.clone(),
            })
            .collect();

        let discovered_resources = self
            .discovered
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, ids)| {
                let kind_name = serde_json::to_value(kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                let ids = ids.iter().cloned().collect();
                (kind_name, ids)
            })
            .collect();

        CursorSnapshot {
            cursors,
            discovered_resources,
        }
    }

    /// Replaces cursor/discovery entries by key; does not emit events for
    /// imported discoveries (they were already observed by whoever exported
    /// the snapshot).
    pub fn import_state(&self, snapshot: CursorSnapshot) {
        let mut cursors = self.cursors.lock().unwrap();
        for entry in snapshot.cursors {
            cursors.insert(entry.key, entry.cursor);
        }
        drop(cursors);

        let mut discovered = self.discovered.lock().unwrap();
        for (kind_name, ids) in snapshot.discovered_resources {
            let Some(kind) = resource_kind_from_str(&kind_name) else {
                continue;
            };
            let set = discovered.entry(kind).or_default();
            for id in ids {
                set.insert(id);
            }
        }
    }
}

fn resource_kind_from_str(s: &str) -> Option<ResourceKind> {
    match s {
        "group" => Some(ResourceKind::Group),
        "project" => Some(ResourceKind::Project),
        "issue" => Some(ResourceKind::Issue),
        "merge_request" => Some(ResourceKind::MergeRequest),
        "pipeline" => Some(ResourceKind::Pipeline),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> CursorRegistry {
        CursorRegistry::new(Arc::new(EventBus::new()))
    }

    #[test]
    fn absent_cursor_starts_at_page_one() {
        let reg = registry();
        assert_eq!(reg.get_next_page(JobType::DiscoverGroups, &ResourceId::All), 1);
    }

    #[test]
    fn register_cursor_advances_next_page_while_more_pages_remain() {
        let reg = registry();
        let rid = ResourceId::All;
        reg.register_cursor(JobType::DiscoverGroups, rid.clone(), 1, true, None);
        assert_eq!(reg.get_next_page(JobType::DiscoverGroups, &rid), 2);
        assert!(reg.has_more_pages(JobType::DiscoverGroups, &rid));
    }

    #[test]
    fn terminal_cursor_is_sticky_until_overwritten() {
        let reg = registry();
        let rid = ResourceId::All;
        reg.register_cursor(JobType::DiscoverGroups, rid.clone(), 1, false, None);
        assert!(!reg.has_more_pages(JobType::DiscoverGroups, &rid));
        // `nextPage` keeps advancing even once terminal; `hasNextPage` alone
        // gates whether another fetch happens.
        assert_eq!(reg.get_next_page(JobType::DiscoverGroups, &rid), 2);
    }

    #[test]
    fn discovery_is_idempotent_and_only_emits_once() {
        let reg = registry();
        let first = reg.mark_resource_discovered(ResourceKind::Group, ResourceId::Id(1), None);
        let second = reg.mark_resource_discovered(ResourceKind::Group, ResourceId::Id(1), None);
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn export_then_import_round_trips_cursor_and_discovery_state() {
        let reg = registry();
        reg.register_cursor(JobType::DiscoverGroups, ResourceId::All, 2, false, None);
        reg.mark_resource_discovered(ResourceKind::Group, ResourceId::Id(5), None);

        let snapshot = reg.export_state();

        let reg2 = registry();
        reg2.import_state(snapshot.clone());
        let snapshot2 = reg2.export_state();

        assert_eq!(snapshot.cursors.len(), snapshot2.cursors.len());
        assert_eq!(
            snapshot.discovered_resources,
            snapshot2.discovered_resources
        );

        // The original `Id(5)` variant must survive the round-trip: if it came
        // back as `Named("5")`, re-discovering the same group would look like
        // a new resource and emit a second RESOURCE_DISCOVERED.
        let rediscovered = reg2.mark_resource_discovered(ResourceKind::Group, ResourceId::Id(5), None);
        assert!(!rediscovered);
    }

    #[test]
    fn pending_cursors_excludes_terminal_entries() {
        let reg = registry();
        reg.register_cursor(JobType::DiscoverGroups, ResourceId::All, 1, true, None);
        reg.register_cursor(JobType::DiscoverProjects, ResourceId::All, 1, false, None);

        let pending = reg.get_pending_cursors();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key.job_type, JobType::DiscoverGroups);
    }
}
