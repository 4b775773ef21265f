use crate::domain::models::Todo;
use crate::infrastructure::todo_mapper::format_instant;
use crate::infrastructure::wall_clock::WallClock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

const KEY_TODO_ID: &str = "todo_sync_todo_id";
const REMINDER_METHOD: &str = "popup";

/// What the calendar primitive needs to create an entry for a todo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEventFields {
    pub todo_id: i64,
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub time_zone: Option<String>,
    pub alarm_minutes_before: u32,
}

/// Zero-length entry at the due date with an alarm. `None` when the todo has no due date.
pub fn todo_event_fields(todo: &Todo, clock: &WallClock) -> Option<CalendarEventFields> {
    let due = clock.to_utc(todo.due_date?);
    Some(CalendarEventFields {
        todo_id: todo.id,
        title: todo.name.clone(),
        description: todo.description.clone(),
        start: due,
        end: due,
        time_zone: match clock {
            WallClock::Named(zone) => Some(zone.name().to_string()),
            WallClock::System => None,
        },
        alarm_minutes_before: todo.notification_minutes_before,
    })
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventReminders {
    #[serde(rename = "useDefault")]
    pub use_default: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventExtendedProperties {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub private: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<CalendarEventReminders>,
    #[serde(rename = "extendedProperties", skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<CalendarEventExtendedProperties>,
}

pub fn encode_todo_event(fields: &CalendarEventFields) -> GoogleCalendarEvent {
    let mut private = HashMap::new();
    private.insert(KEY_TODO_ID.to_string(), fields.todo_id.to_string());

    GoogleCalendarEvent {
        id: None,
        summary: Some(fields.title.clone()),
        description: Some(fields.description.clone()).filter(|value| !value.trim().is_empty()),
        start: CalendarEventDateTime {
            date_time: format_instant(fields.start),
            time_zone: fields.time_zone.clone(),
        },
        end: CalendarEventDateTime {
            date_time: format_instant(fields.end),
            time_zone: fields.time_zone.clone(),
        },
        reminders: Some(CalendarEventReminders {
            use_default: false,
            overrides: vec![ReminderOverride {
                method: REMINDER_METHOD.to_string(),
                minutes: fields.alarm_minutes_before,
            }],
        }),
        extended_properties: Some(CalendarEventExtendedProperties { private }),
    }
}

/// Todo id stored on an event created by this app, if any.
pub fn decode_todo_id(event: &GoogleCalendarEvent) -> Option<i64> {
    event
        .extended_properties
        .as_ref()?
        .private
        .get(KEY_TODO_ID)?
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_todo() -> Todo {
        Todo {
            id: 12,
            name: "Dentist".to_string(),
            description: "Bring insurance card".to_string(),
            due_date: NaiveDate::from_ymd_opt(2026, 1, 20).and_then(|date| date.and_hms_opt(14, 0, 0)),
            notification_minutes_before: 45,
            ..Todo::default()
        }
    }

    #[test]
    fn fields_span_zero_length_at_due_date() {
        let clock = WallClock::Named(chrono_tz::Europe::Amsterdam);
        let fields = todo_event_fields(&sample_todo(), &clock).expect("due date present");

        assert_eq!(fields.start, fields.end);
        assert_eq!(format_instant(fields.start), "2026-01-20T13:00:00Z");
        assert_eq!(fields.time_zone.as_deref(), Some("Europe/Amsterdam"));
        assert_eq!(fields.alarm_minutes_before, 45);
    }

    #[test]
    fn todo_without_due_date_has_no_event() {
        let todo = Todo {
            due_date: None,
            ..sample_todo()
        };
        assert!(todo_event_fields(&todo, &WallClock::System).is_none());
    }

    #[test]
    fn encoded_event_carries_alarm_and_todo_id() {
        let clock = WallClock::Named(chrono_tz::UTC);
        let fields = todo_event_fields(&sample_todo(), &clock).expect("fields");
        let event = encode_todo_event(&fields);
        let json = serde_json::to_value(&event).expect("serialize event");

        assert_eq!(json["summary"], "Dentist");
        assert_eq!(json["start"]["dateTime"], "2026-01-20T14:00:00Z");
        assert_eq!(json["reminders"]["useDefault"], false);
        assert_eq!(json["reminders"]["overrides"][0]["minutes"], 45);
        assert_eq!(decode_todo_id(&event), Some(12));
    }

    #[test]
    fn foreign_events_have_no_todo_id() {
        let clock = WallClock::Named(chrono_tz::UTC);
        let mut event = encode_todo_event(&todo_event_fields(&sample_todo(), &clock).expect("fields"));
        event.extended_properties = Some(CalendarEventExtendedProperties::default());
        assert_eq!(decode_todo_id(&event), None);
    }
}
