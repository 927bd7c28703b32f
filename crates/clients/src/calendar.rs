//! Calendar source client (Graph-shaped HTTP/JSON provider).
//!
//! Fetches raw calendar events for a user and date window, following
//! `@odata.nextLink` cursors transparently. The caller supplies local
//! times; the query string carries UTC.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tb_domain::error::Result;

use crate::transport::{HttpTransport, RequestOptions};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A raw calendar event as returned by the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvent {
    pub id: String,
    pub subject: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub attendees: Vec<Attendee>,
    pub organizer: Option<Attendee>,
    pub is_cancelled: bool,
    pub is_online_meeting: bool,
    pub online_meeting_provider: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventTime {
    pub date_time: String,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attendee {
    pub email_address: Option<EmailAddress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailAddress {
    pub address: String,
    pub name: Option<String>,
}

/// One page of events. A page missing `value` is treated as empty; an
/// empty page with a next link is valid (pagination continues).
#[derive(Debug, Clone, Default, Deserialize)]
struct EventsPage {
    #[serde(default)]
    value: Vec<RawEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Lowercased, deduplicated attendee addresses of an event.
pub fn meeting_attendees(event: &RawEvent) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(event.attendees.len());
    for attendee in &event.attendees {
        if let Some(ref email) = attendee.email_address {
            let addr = email.address.to_lowercase();
            if !addr.is_empty() && !out.contains(&addr) {
                out.push(addr);
            }
        }
    }
    out
}

/// Build the provider's `$filter` expression for a UTC window.
pub fn build_event_filter(start_utc: DateTime<Utc>, end_utc: DateTime<Utc>) -> String {
    format!(
        "start/dateTime ge '{}' and end/dateTime le '{}'",
        start_utc.format("%Y-%m-%dT%H:%M:%SZ"),
        end_utc.format("%Y-%m-%dT%H:%M:%SZ"),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait + client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability of fetching calendar data for a user.
#[async_trait::async_trait]
pub trait CalendarSource: Send + Sync {
    /// Fetch the user record.
    async fn get_user_info(&self, user_id: &str) -> Result<Value>;

    /// Fetch events for `[start, end)` in the caller's local zone.
    ///
    /// When `paginate` is false only the first page is returned.
    async fn get_calendar_events(
        &self,
        user_id: &str,
        window: Option<(DateTime<Tz>, DateTime<Tz>)>,
        page_size: u32,
        paginate: bool,
    ) -> Result<Vec<RawEvent>>;
}

/// HTTP calendar client over the shared transport.
pub struct CalendarClient {
    transport: Arc<HttpTransport>,
    base_url: String,
}

impl CalendarClient {
    pub fn new(transport: Arc<HttpTransport>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait::async_trait]
impl CalendarSource for CalendarClient {
    async fn get_user_info(&self, user_id: &str) -> Result<Value> {
        let url = self.url(&format!("/users/{user_id}"));
        tracing::debug!(user_id, "fetching user info");
        self.transport.get(&url, RequestOptions::default()).await
    }

    async fn get_calendar_events(
        &self,
        user_id: &str,
        window: Option<(DateTime<Tz>, DateTime<Tz>)>,
        page_size: u32,
        paginate: bool,
    ) -> Result<Vec<RawEvent>> {
        let url = self.url(&format!("/users/{user_id}/calendar/events"));

        let mut query: Vec<(String, String)> = vec![("$top".into(), page_size.to_string())];
        if let Some((start, end)) = window {
            let filter =
                build_event_filter(start.with_timezone(&Utc), end.with_timezone(&Utc));
            query.push(("$filter".into(), filter));
        }

        tracing::info!(user_id, page_size, paginate, "fetching calendar events");

        let mut events: Vec<RawEvent> = Vec::new();
        let mut next: Option<String> = None;
        let mut first = true;

        loop {
            let value = if first {
                first = false;
                self.transport
                    .get(
                        &url,
                        RequestOptions {
                            query: Some(&query),
                            ..Default::default()
                        },
                    )
                    .await?
            } else {
                // The next link already encodes the query string.
                let link = next.take().unwrap_or_default();
                self.transport.get(&link, RequestOptions::default()).await?
            };

            let page: EventsPage = serde_json::from_value(value)?;
            let page_len = page.value.len();
            events.extend(page.value);

            next = if paginate { page.next_link } else { None };
            if let Some(ref link) = next {
                tracing::debug!(fetched = events.len(), page_len, link = %link, "following next page");
            } else {
                break;
            }
        }

        tracing::info!(user_id, count = events.len(), "calendar events fetched");
        Ok(events)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
