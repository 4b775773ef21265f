use crate::domain::models::Todo;
use crate::infrastructure::calendar_backend::CalendarBackend;
use crate::infrastructure::calendar_link_repository::{CalendarLink, CalendarLinkRepository};
use crate::infrastructure::event_mapper::todo_event_fields;
use crate::infrastructure::permissions::Permissions;
use crate::infrastructure::wall_clock::WallClock;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Mirrors todos into the device calendar and remembers which event belongs to which
/// todo, so removal deletes exactly that event.
pub struct CalendarMirror {
    backend: Arc<dyn CalendarBackend>,
    links: Arc<dyn CalendarLinkRepository>,
    permissions: Arc<dyn Permissions>,
    clock: WallClock,
    now_provider: NowProvider,
}

impl CalendarMirror {
    pub fn new(
        backend: Arc<dyn CalendarBackend>,
        links: Arc<dyn CalendarLinkRepository>,
        permissions: Arc<dyn Permissions>,
        clock: WallClock,
    ) -> Self {
        Self {
            backend,
            links,
            permissions,
            clock,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn has_permission(&self) -> bool {
        self.permissions.calendar_granted()
    }

    pub async fn add(&self, todo: &Todo) -> bool {
        if !self.has_permission() {
            warn!(todo_id = todo.id, "calendar permission missing");
            return false;
        }
        let Some(fields) = todo_event_fields(todo, &self.clock) else {
            debug!(todo_id = todo.id, "todo has no due date; nothing to mirror");
            return false;
        };

        // A todo maps to one event. The old link stays until its event is really gone.
        if !self.remove(todo).await {
            warn!(todo_id = todo.id, "previous calendar event could not be removed");
            return false;
        }

        let event_id = match self.backend.insert_event(&fields).await {
            Ok(event_id) => event_id,
            Err(error) => {
                warn!(todo_id = todo.id, %error, "calendar insert failed");
                return false;
            }
        };

        let link = CalendarLink {
            todo_id: todo.id,
            event_id: event_id.clone(),
            calendar_id: self.backend.calendar_id().to_string(),
            created_at: (self.now_provider)(),
        };
        if let Err(error) = self.links.save(&link) {
            warn!(todo_id = todo.id, %error, "failed to record calendar event; rolling back");
            if let Err(error) = self.backend.delete_event(&event_id).await {
                warn!(todo_id = todo.id, event_id = %event_id, %error, "rollback delete failed");
            }
            return false;
        }

        info!(todo_id = todo.id, event_id = %event_id, "todo mirrored to calendar");
        true
    }

    /// Deletes the event recorded for `todo`. A todo without a recorded event counts
    /// as removed.
    pub async fn remove(&self, todo: &Todo) -> bool {
        let link = match self.links.load(todo.id) {
            Ok(Some(link)) => link,
            Ok(None) => return true,
            Err(error) => {
                warn!(todo_id = todo.id, %error, "failed to read calendar link");
                return false;
            }
        };

        if let Err(error) = self.backend.delete_event(&link.event_id).await {
            warn!(todo_id = todo.id, event_id = %link.event_id, %error, "calendar delete failed");
            return false;
        }
        if let Err(error) = self.links.remove(todo.id) {
            warn!(todo_id = todo.id, %error, "failed to forget calendar link");
            return false;
        }
        info!(todo_id = todo.id, event_id = %link.event_id, "calendar event removed");
        true
    }

    pub fn linked_event(&self, todo_id: i64) -> Option<String> {
        match self.links.load(todo_id) {
            Ok(link) => link.map(|link| link.event_id),
            Err(error) => {
                warn!(todo_id, %error, "failed to read calendar link");
                None
            }
        }
    }
}
