use crate::domain::models::{DEFAULT_NOTIFICATION_MINUTES, Todo};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::wall_clock::WallClock;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Row shape of the `tasks` resource. Every field is optional on decode so partial
/// rows fall back to the same defaults the app uses for new records.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TodoRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub due_date: Option<String>,
    pub notification_enabled: Option<bool>,
    pub notification_minutes_before: Option<i64>,
    pub added_to_calendar: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

pub fn encode_todo_row(todo: &Todo, clock: &WallClock) -> TodoRow {
    TodoRow {
        id: Some(todo.id).filter(|id| *id > 0),
        name: Some(todo.name.clone()),
        description: Some(todo.description.clone()),
        completed: Some(todo.completed),
        due_date: todo.due_date.map(|value| format_instant(clock.to_utc(value))),
        notification_enabled: Some(todo.notification_enabled),
        notification_minutes_before: Some(i64::from(todo.notification_minutes_before)),
        added_to_calendar: Some(todo.added_to_calendar),
        user_id: todo
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
        created_at: todo.created_at.map(|value| format_instant(clock.to_utc(value))),
    }
}

/// Missing flags decode as reminders on, unless the row is mirrored to the calendar.
pub fn decode_todo_row(row: TodoRow, clock: &WallClock) -> Todo {
    let added_to_calendar = row.added_to_calendar.unwrap_or(false);
    Todo {
        id: row.id.unwrap_or(0),
        name: row.name.unwrap_or_default(),
        description: row.description.unwrap_or_default(),
        completed: row.completed.unwrap_or(false),
        due_date: row.due_date.as_deref().and_then(|value| parse_local(value, clock)),
        notification_enabled: row.notification_enabled.unwrap_or(!added_to_calendar),
        notification_minutes_before: row
            .notification_minutes_before
            .map(|value| u32::try_from(value.max(0)).unwrap_or(u32::MAX))
            .unwrap_or(DEFAULT_NOTIFICATION_MINUTES),
        added_to_calendar,
        user_id: row
            .user_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        created_at: row.created_at.as_deref().and_then(|value| parse_local(value, clock)),
    }
}

/// Decodes a list response. A malformed row fails the whole list.
pub fn decode_todo_list(body: &str, clock: &WallClock) -> Result<Vec<Todo>, InfraError> {
    let rows: Vec<TodoRow> = serde_json::from_str(body)
        .map_err(|error| InfraError::Payload(format!("invalid task list payload: {error}; body={body}")))?;
    Ok(rows.into_iter().map(|row| decode_todo_row(row, clock)).collect())
}

/// Decodes a create/update response, which may be a single object or a one-element
/// array. Returns `None` for an empty body or an empty array.
pub fn decode_todo_response(body: &str, clock: &WallClock) -> Result<Option<Todo>, InfraError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|error| InfraError::Payload(format!("invalid task payload: {error}; body={body}")))?;
    let row_value = match value {
        serde_json::Value::Array(mut rows) => {
            if rows.is_empty() {
                return Ok(None);
            }
            rows.swap_remove(0)
        }
        other @ serde_json::Value::Object(_) => other,
        other => {
            return Err(InfraError::Payload(format!(
                "expected task object or array, got: {other}"
            )));
        }
    };

    let row: TodoRow = serde_json::from_value(row_value)
        .map_err(|error| InfraError::Payload(format!("invalid task row: {error}; body={body}")))?;
    Ok(Some(decode_todo_row(row, clock)))
}

pub fn format_instant(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// Unparseable timestamps decode as absent rather than failing the row.
fn parse_local(value: &str, clock: &WallClock) -> Option<NaiveDateTime> {
    parse_instant(value).map(|instant| clock.to_local(instant))
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(parsed.with_timezone(&Utc));
    }
    // Timestamps without an offset are UTC.
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
