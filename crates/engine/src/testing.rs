//! In-memory fakes shared by the engine unit tests.

use std::collections::{HashMap, HashSet};

use chrono::DateTime;
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde_json::Value;

use tb_clients::calendar::{CalendarSource, RawEvent};
use tb_clients::work_items::WorkItemStore;
use tb_domain::error::{Error, Result};
use tb_domain::work_item::WorkItem;

/// An in-memory work-item store with configurable failure modes.
#[derive(Default)]
pub struct FakeWorkItemStore {
    items: Mutex<HashMap<i64, WorkItem>>,
    denied: HashSet<i64>,
    failing_updates: HashSet<i64>,
    include_terminal_in_queries: bool,
    update_calls: Mutex<Vec<(i64, f64, Option<String>)>>,
}

impl FakeWorkItemStore {
    pub fn with_items(items: Vec<WorkItem>) -> Self {
        let map = items.into_iter().map(|i| (i.id, i)).collect();
        Self {
            items: Mutex::new(map),
            ..Default::default()
        }
    }

    /// Make permission validation report `false` for this ID.
    pub fn deny_permission(&mut self, id: i64) {
        self.denied.insert(id);
    }

    /// Make writes against this ID fail with a 403.
    pub fn fail_update(&mut self, id: i64) {
        self.failing_updates.insert(id);
    }

    /// Let WIQL queries return terminal items too (the real query filters
    /// them; tests force them in to exercise the resolver path).
    pub fn with_terminal_in_queries(mut self) -> Self {
        self.include_terminal_in_queries = true;
        self
    }

    /// The `(id, hours, comment)` of every write that reached the store.
    pub fn update_calls(&self) -> Vec<(i64, f64, Option<String>)> {
        self.update_calls.lock().clone()
    }

    pub fn completed_work(&self, id: i64) -> Option<f64> {
        self.items
            .lock()
            .get(&id)
            .map(|i| i.scheduling.completed_work)
    }
}

#[async_trait::async_trait]
impl WorkItemStore for FakeWorkItemStore {
    async fn get_work_item(&self, id: i64, _fields: Option<&[&str]>) -> Result<WorkItem> {
        self.items
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("work item #{id}")))
    }

    async fn get_work_items_batch(&self, ids: &[i64]) -> Result<Vec<WorkItem>> {
        let items = self.items.lock();
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn update_completed_work(
        &self,
        id: i64,
        hours: f64,
        comment: Option<&str>,
    ) -> Result<WorkItem> {
        if self.failing_updates.contains(&id) {
            return Err(Error::Forbidden(format!("update rejected for #{id}")));
        }
        let mut items = self.items.lock();
        let item = items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("work item #{id}")))?;
        item.scheduling.completed_work = hours;
        self.update_calls
            .lock()
            .push((id, hours, comment.map(|c| c.to_string())));
        Ok(item.clone())
    }

    async fn query_work_items(
        &self,
        _wiql: &str,
        _project: Option<&str>,
        top: usize,
    ) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .items
            .lock()
            .values()
            .filter(|i| self.include_terminal_in_queries || !i.is_terminal())
            .map(|i| i.id)
            .collect();
        ids.sort_unstable();
        ids.truncate(top);
        Ok(ids)
    }

    async fn validate_permissions(&self, id: i64) -> Result<bool> {
        if self.denied.contains(&id) {
            return Ok(false);
        }
        if !self.items.lock().contains_key(&id) {
            return Err(Error::NotFound(format!("work item #{id}")));
        }
        Ok(true)
    }
}

/// An in-memory calendar source serving one fixed event list.
#[derive(Default)]
pub struct FakeCalendarSource {
    events: Vec<RawEvent>,
    failing: bool,
}

impl FakeCalendarSource {
    pub fn with_events(events: Vec<RawEvent>) -> Self {
        Self {
            events,
            failing: false,
        }
    }

    /// A source whose every fetch fails with an auth error.
    pub fn failing() -> Self {
        Self {
            events: Vec::new(),
            failing: true,
        }
    }
}

#[async_trait::async_trait]
impl CalendarSource for FakeCalendarSource {
    async fn get_user_info(&self, user_id: &str) -> Result<Value> {
        if self.failing {
            return Err(Error::Unauthorized("token rejected".into()));
        }
        Ok(serde_json::json!({ "id": user_id }))
    }

    async fn get_calendar_events(
        &self,
        _user_id: &str,
        _window: Option<(DateTime<Tz>, DateTime<Tz>)>,
        _page_size: u32,
        _paginate: bool,
    ) -> Result<Vec<RawEvent>> {
        if self.failing {
            return Err(Error::Unauthorized("token rejected".into()));
        }
        Ok(self.events.clone())
    }
}
