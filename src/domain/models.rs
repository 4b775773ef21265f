use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use url::Url;

pub const DEFAULT_NOTIFICATION_MINUTES: u32 = 30;
const SHARED_CONTENT_FALLBACK_TITLE: &str = "Shared Content";

/// A task as the user sees it. Timestamps are local wall-clock times; the wire
/// mapper converts them to and from UTC instants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    /// `0` until the backend assigns an identifier.
    pub id: i64,
    pub name: String,
    pub description: String,
    pub completed: bool,
    pub due_date: Option<NaiveDateTime>,
    pub notification_enabled: bool,
    pub notification_minutes_before: u32,
    pub added_to_calendar: bool,
    pub user_id: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl Todo {
    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    pub fn with_completed_toggled(&self) -> Todo {
        Todo {
            completed: !self.completed,
            ..self.clone()
        }
    }

    pub fn with_notifications_toggled(&self) -> Todo {
        Todo {
            notification_enabled: !self.notification_enabled,
            ..self.clone()
        }
    }

    /// Flips calendar mirroring. Turning it on always turns reminders off.
    pub fn with_calendar_toggled(&self) -> Todo {
        let added_to_calendar = !self.added_to_calendar;
        Todo {
            added_to_calendar,
            notification_enabled: if added_to_calendar {
                false
            } else {
                self.notification_enabled
            },
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "todo.name")?;
        if self.id < 0 {
            return Err("todo.id must be >= 0".to_string());
        }
        if self.notification_enabled && self.added_to_calendar {
            return Err(
                "todo.notification_enabled and todo.added_to_calendar are mutually exclusive"
                    .to_string(),
            );
        }
        Ok(())
    }
}

impl Default for Todo {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            description: String::new(),
            completed: false,
            due_date: None,
            notification_enabled: false,
            notification_minutes_before: DEFAULT_NOTIFICATION_MINUTES,
            added_to_calendar: false,
            user_id: None,
            created_at: None,
        }
    }
}

/// Fields submitted by the "new task" form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodo {
    pub name: String,
    pub description: String,
    pub due_date: Option<NaiveDateTime>,
    pub notification_enabled: bool,
    pub notification_minutes_before: u32,
    pub added_to_calendar: bool,
}

impl NewTodo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            due_date: None,
            notification_enabled: false,
            notification_minutes_before: DEFAULT_NOTIFICATION_MINUTES,
            added_to_calendar: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "todo.name")
    }

    /// Builds the unsaved record. Calendar mirroring wins over reminders when both
    /// were requested.
    pub fn into_todo(self, user_id: Option<String>) -> Todo {
        Todo {
            id: 0,
            name: self.name.trim().to_string(),
            description: self.description,
            completed: false,
            due_date: self.due_date,
            notification_enabled: self.notification_enabled && !self.added_to_calendar,
            notification_minutes_before: self.notification_minutes_before,
            added_to_calendar: self.added_to_calendar,
            user_id,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    CreatedAsc,
    CreatedDesc,
    NameAsc,
    NameDesc,
    #[default]
    DueDateAsc,
    DueDateDesc,
    DueSoonFirst,
}

impl SortOrder {
    pub const ALL: [SortOrder; 7] = [
        SortOrder::CreatedAsc,
        SortOrder::CreatedDesc,
        SortOrder::NameAsc,
        SortOrder::NameDesc,
        SortOrder::DueDateAsc,
        SortOrder::DueDateDesc,
        SortOrder::DueSoonFirst,
    ];

    /// PostgREST `order=` expression.
    pub fn api_value(self) -> &'static str {
        match self {
            Self::CreatedAsc => "created_at.asc",
            Self::CreatedDesc => "created_at.desc",
            Self::NameAsc => "name.asc",
            Self::NameDesc => "name.desc",
            Self::DueDateAsc => "due_date.asc,name.asc",
            Self::DueDateDesc => "due_date.desc,name.asc",
            // Overdue dates sort before upcoming ones, undated rows go last.
            Self::DueSoonFirst => "due_date.asc.nullslast,name.asc",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAsc => "created_asc",
            Self::CreatedDesc => "created_desc",
            Self::NameAsc => "name_asc",
            Self::NameDesc => "name_desc",
            Self::DueDateAsc => "due_date_asc",
            Self::DueDateDesc => "due_date_desc",
            Self::DueSoonFirst => "due_soon_first",
        }
    }

    /// Reference ordering with PostgreSQL NULL placement (last when ascending, first
    /// when descending). `now` is the local wall-clock time used for the overdue bucket.
    pub fn compare(self, left: &Todo, right: &Todo, now: NaiveDateTime) -> Ordering {
        match self {
            Self::CreatedAsc => nulls_last(left.created_at, right.created_at)
                .then_with(|| left.id.cmp(&right.id)),
            Self::CreatedDesc => nulls_first_desc(left.created_at, right.created_at)
                .then_with(|| right.id.cmp(&left.id)),
            Self::NameAsc => left.name.cmp(&right.name),
            Self::NameDesc => right.name.cmp(&left.name),
            Self::DueDateAsc => {
                nulls_last(left.due_date, right.due_date).then_with(|| left.name.cmp(&right.name))
            }
            Self::DueDateDesc => nulls_first_desc(left.due_date, right.due_date)
                .then_with(|| left.name.cmp(&right.name)),
            Self::DueSoonFirst => due_bucket(left, now)
                .cmp(&due_bucket(right, now))
                .then_with(|| nulls_last(left.due_date, right.due_date))
                .then_with(|| left.name.cmp(&right.name)),
        }
    }

    pub fn sort(self, todos: &mut [Todo], now: NaiveDateTime) {
        todos.sort_by(|left, right| self.compare(left, right, now));
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        SortOrder::ALL
            .into_iter()
            .find(|order| order.as_str() == normalized)
            .ok_or_else(|| format!("unknown sort order: {value}"))
    }
}

fn nulls_last(left: Option<NaiveDateTime>, right: Option<NaiveDateTime>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn nulls_first_desc(left: Option<NaiveDateTime>, right: Option<NaiveDateTime>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn due_bucket(todo: &Todo, now: NaiveDateTime) -> u8 {
    match todo.due_date {
        Some(due) if due < now => 0,
        Some(_) => 1,
        None => 2,
    }
}

/// Authenticated session as persisted by the login flow.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub user_id: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &token_preview(&self.access_token))
            .field("user_id", &self.user_id)
            .finish()
    }
}

pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}...")
}

/// Title/description pair derived from text shared into the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedContent {
    pub title: String,
    pub description: String,
}

impl SharedContent {
    pub fn parse(content: &str) -> Result<Self, String> {
        let content = content.trim();
        if content.is_empty() {
            return Err("No content to share".to_string());
        }

        if content.starts_with("http://") || content.starts_with("https://") {
            if let Some(host) = Url::parse(content)
                .ok()
                .and_then(|url| url.host_str().map(ToOwned::to_owned))
                .filter(|host| !host.is_empty())
            {
                return Ok(Self {
                    title: host,
                    description: content.to_string(),
                });
            }
        }

        let mut lines = content.lines();
        let title = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .unwrap_or(SHARED_CONTENT_FALLBACK_TITLE)
            .to_string();
        let description = lines.collect::<Vec<_>>().join("\n");
        Ok(Self { title, description })
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
