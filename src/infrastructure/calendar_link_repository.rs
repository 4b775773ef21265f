use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The calendar event created for a todo, kept so removal can target that exact event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarLink {
    pub todo_id: i64,
    pub event_id: String,
    pub calendar_id: String,
    pub created_at: DateTime<Utc>,
}

pub trait CalendarLinkRepository: Send + Sync {
    fn load(&self, todo_id: i64) -> Result<Option<CalendarLink>, InfraError>;
    fn save(&self, link: &CalendarLink) -> Result<(), InfraError>;
    fn remove(&self, todo_id: i64) -> Result<(), InfraError>;
    fn list_all(&self) -> Result<Vec<CalendarLink>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteCalendarLinkRepository {
    db_path: PathBuf,
}

impl SqliteCalendarLinkRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_database(&self.db_path)
    }

    fn row_to_link(
        todo_id: i64,
        event_id: String,
        calendar_id: String,
        created_at_raw: String,
    ) -> Result<CalendarLink, InfraError> {
        let created_at = DateTime::parse_from_rfc3339(&created_at_raw).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid calendar_links.created_at '{created_at_raw}': {error}"
            ))
        })?;
        Ok(CalendarLink {
            todo_id,
            event_id,
            calendar_id,
            created_at: created_at.with_timezone(&Utc),
        })
    }
}

impl CalendarLinkRepository for SqliteCalendarLinkRepository {
    fn load(&self, todo_id: i64) -> Result<Option<CalendarLink>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(String, String, String)> = connection
            .query_row(
                "SELECT event_id, calendar_id, created_at FROM calendar_links WHERE todo_id = ?1",
                params![todo_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((event_id, calendar_id, created_at)) = row else {
            return Ok(None);
        };
        Self::row_to_link(todo_id, event_id, calendar_id, created_at).map(Some)
    }

    fn save(&self, link: &CalendarLink) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO calendar_links (todo_id, event_id, calendar_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(todo_id) DO UPDATE SET
               event_id = excluded.event_id,
               calendar_id = excluded.calendar_id,
               created_at = excluded.created_at",
            params![
                link.todo_id,
                link.event_id,
                link.calendar_id,
                link.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn remove(&self, todo_id: i64) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM calendar_links WHERE todo_id = ?1", params![todo_id])?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<CalendarLink>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT todo_id, event_id, calendar_id, created_at FROM calendar_links ORDER BY todo_id",
        )?;
        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(todo_id, event_id, calendar_id, created_at)| {
                Self::row_to_link(todo_id, event_id, calendar_id, created_at)
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCalendarLinkRepository {
    links: Mutex<HashMap<i64, CalendarLink>>,
}

impl InMemoryCalendarLinkRepository {
    fn guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<i64, CalendarLink>>, InfraError> {
        self.links
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("calendar link lock poisoned: {error}")))
    }
}

impl CalendarLinkRepository for InMemoryCalendarLinkRepository {
    fn load(&self, todo_id: i64) -> Result<Option<CalendarLink>, InfraError> {
        Ok(self.guard()?.get(&todo_id).cloned())
    }

    fn save(&self, link: &CalendarLink) -> Result<(), InfraError> {
        self.guard()?.insert(link.todo_id, link.clone());
        Ok(())
    }

    fn remove(&self, todo_id: i64) -> Result<(), InfraError> {
        self.guard()?.remove(&todo_id);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<CalendarLink>, InfraError> {
        let mut links = self.guard()?.values().cloned().collect::<Vec<_>>();
        links.sort_by_key(|link| link.todo_id);
        Ok(links)
    }
}
