use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{CalendarEventFields, encode_todo_event};
use crate::infrastructure::todo_api_client::check_status;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";

/// Device calendar primitive: creates entries and deletes them by identifier.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    fn calendar_id(&self) -> &str;

    async fn insert_event(&self, fields: &CalendarEventFields) -> Result<String, InfraError>;

    /// Deleting an event that no longer exists succeeds.
    async fn delete_event(&self, event_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct GoogleCalendarBackend {
    client: Client,
    access_token: String,
    calendar_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct InsertedEvent {
    id: Option<String>,
}

impl GoogleCalendarBackend {
    pub fn new(access_token: impl Into<String>, calendar_id: impl Into<String>) -> Result<Self, InfraError> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(InfraError::Calendar("calendar access token must not be empty".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            access_token: access_token.trim().to_string(),
            calendar_id: calendar_id.into(),
        })
    }

    fn events_endpoint(&self) -> Result<Url, InfraError> {
        let mut url = Url::parse(CALENDAR_API_BASE)
            .map_err(|error| InfraError::Calendar(format!("invalid calendar api base url: {error}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Calendar("calendar api base URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.push("calendars");
            segments.push(&self.calendar_id);
            segments.push("events");
        }
        Ok(url)
    }

    fn event_endpoint(&self, event_id: &str) -> Result<Url, InfraError> {
        let mut url = self.events_endpoint()?;
        url.path_segments_mut()
            .map_err(|_| InfraError::Calendar("calendar events URL cannot be a base".to_string()))?
            .push(event_id);
        Ok(url)
    }
}

fn calendar_error(error: InfraError) -> InfraError {
    match error {
        InfraError::Unauthorized(detail) | InfraError::Network(detail) => {
            InfraError::Calendar(format!("google calendar api error: {detail}"))
        }
        other => other,
    }
}

#[async_trait]
impl CalendarBackend for GoogleCalendarBackend {
    fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    async fn insert_event(&self, fields: &CalendarEventFields) -> Result<String, InfraError> {
        let event = encode_todo_event(fields);
        let response = self
            .client
            .post(self.events_endpoint()?)
            .bearer_auth(&self.access_token)
            .json(&event)
            .send()
            .await
            .map_err(|error| InfraError::Calendar(format!("network error while creating event: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Calendar(format!("failed reading create event response: {error}")))?;
        check_status(status, &body).map_err(calendar_error)?;

        let parsed: InsertedEvent = serde_json::from_str(&body).map_err(|error| {
            InfraError::Calendar(format!("invalid create event payload: {error}; body={body}"))
        })?;
        let event_id = parsed
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| InfraError::Calendar("created event is missing id".to_string()))?;
        debug!(todo_id = fields.todo_id, event_id = %event_id, "calendar event created");
        Ok(event_id)
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), InfraError> {
        let response = self
            .client
            .delete(self.event_endpoint(event_id)?)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|error| InfraError::Calendar(format!("network error while deleting event: {error}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            debug!(event_id, "calendar event already removed");
            return Ok(());
        }
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Calendar(format!("failed reading delete event response: {error}")))?;
        check_status(status, &body).map_err(calendar_error)
    }
}

/// Calendar kept in process memory; used offline and by tests.
#[derive(Debug)]
pub struct InMemoryCalendarBackend {
    calendar_id: String,
    events: Mutex<HashMap<String, CalendarEventFields>>,
    next_id: AtomicU64,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl Default for InMemoryCalendarBackend {
    fn default() -> Self {
        Self {
            calendar_id: "local".to_string(),
            events: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_inserts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }
}

impl InMemoryCalendarBackend {
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Result<Vec<(String, CalendarEventFields)>, InfraError> {
        let mut events = self
            .guard()?
            .iter()
            .map(|(id, fields)| (id.clone(), fields.clone()))
            .collect::<Vec<_>>();
        events.sort_by(|left, right| left.0.cmp(&right.0));
        Ok(events)
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CalendarEventFields>>, InfraError> {
        self.events
            .lock()
            .map_err(|error| InfraError::Calendar(format!("calendar lock poisoned: {error}")))
    }
}

#[async_trait]
impl CalendarBackend for InMemoryCalendarBackend {
    fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    async fn insert_event(&self, fields: &CalendarEventFields) -> Result<String, InfraError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(InfraError::Calendar("calendar rejected the event".to_string()));
        }
        let event_id = format!("evt-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.guard()?.insert(event_id.clone(), fields.clone());
        Ok(event_id)
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), InfraError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(InfraError::Calendar("calendar refused the delete".to_string()));
        }
        self.guard()?.remove(event_id);
        Ok(())
    }
}
