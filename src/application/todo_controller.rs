use crate::application::calendar_mirror::CalendarMirror;
use crate::application::reminder_scheduler::ReminderScheduler;
use crate::domain::models::{NewTodo, Session, SharedContent, SortOrder, Todo};
use crate::infrastructure::credential_store::SessionStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::permissions::Permissions;
use crate::infrastructure::preferences::PreferencesStore;
use crate::infrastructure::todo_api_client::TodoApi;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const SESSION_EXPIRED: &str = "Session expired, please log in again";
const NOTIFICATION_PERMISSION_DENIED: &str = "Notification permission is required for reminders";
const EXACT_ALARM_PERMISSION_DENIED: &str = "Exact alarm permission is required for accurate reminders";
const CALENDAR_PERMISSION_REQUIRED: &str = "Calendar permission is required to add events";
const CALENDAR_ADD_FAILED: &str = "Failed to add event to calendar";
const REMINDER_WHILE_MIRRORED: &str = "Remove the task from the calendar before enabling reminders";

/// Everything the presentation layer observes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoViewState {
    pub todos: Vec<Todo>,
    /// True while any list/create/update/delete round trip is outstanding.
    pub is_loading: bool,
    pub error: Option<String>,
    pub show_notification_permission_request: bool,
    pub show_exact_alarm_permission_request: bool,
    /// Set when the backend rejected the stored token; the session was dropped.
    pub session_expired: bool,
}

pub struct TodoServices {
    pub api: Arc<dyn TodoApi>,
    pub sessions: Arc<dyn SessionStore>,
    pub preferences: Arc<dyn PreferencesStore>,
    pub permissions: Arc<dyn Permissions>,
    pub scheduler: Arc<ReminderScheduler>,
    pub calendar: Arc<CalendarMirror>,
}

/// Owns the authoritative todo list and keeps reminders and calendar entries in step
/// with what the server confirmed. Every server-side mutation is followed by a full
/// reload instead of a local merge, except deletes which apply locally.
pub struct TodoController {
    api: Arc<dyn TodoApi>,
    sessions: Arc<dyn SessionStore>,
    preferences: Arc<dyn PreferencesStore>,
    permissions: Arc<dyn Permissions>,
    scheduler: Arc<ReminderScheduler>,
    calendar: Arc<CalendarMirror>,
    state: watch::Sender<TodoViewState>,
    in_flight: AtomicUsize,
    list_generation: AtomicU64,
    applied_generation: AtomicU64,
}

struct LoadingGuard<'a> {
    controller: &'a TodoController,
}

impl<'a> LoadingGuard<'a> {
    fn begin(controller: &'a TodoController) -> Self {
        controller.in_flight.fetch_add(1, Ordering::SeqCst);
        controller.state.send_modify(|state| state.is_loading = true);
        Self { controller }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let in_flight = &self.controller.in_flight;
        in_flight.fetch_sub(1, Ordering::SeqCst);
        self.controller
            .state
            .send_modify(|state| state.is_loading = in_flight.load(Ordering::SeqCst) > 0);
    }
}

impl TodoController {
    pub fn new(services: TodoServices) -> Self {
        let (state, _) = watch::channel(TodoViewState::default());
        Self {
            api: services.api,
            sessions: services.sessions,
            preferences: services.preferences,
            permissions: services.permissions,
            scheduler: services.scheduler,
            calendar: services.calendar,
            state,
            in_flight: AtomicUsize::new(0),
            list_generation: AtomicU64::new(0),
            applied_generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TodoViewState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> TodoViewState {
        self.state.borrow().clone()
    }

    pub fn clear_error(&self) {
        self.set_error(None::<String>);
    }

    pub fn has_notification_permission(&self) -> bool {
        self.permissions.notifications_granted()
    }

    pub fn has_exact_alarm_permission(&self) -> bool {
        self.permissions.exact_alarms_granted()
    }

    pub fn on_notification_permission_result(&self, granted: bool) {
        self.state
            .send_modify(|state| state.show_notification_permission_request = false);
        if granted {
            self.reconcile_reminders(&self.snapshot().todos);
        } else {
            self.set_error(Some(NOTIFICATION_PERMISSION_DENIED));
        }
    }

    pub fn on_exact_alarm_permission_result(&self, granted: bool) {
        self.state
            .send_modify(|state| state.show_exact_alarm_permission_request = false);
        if granted {
            self.reconcile_reminders(&self.snapshot().todos);
        } else {
            self.set_error(Some(EXACT_ALARM_PERMISSION_DENIED));
        }
    }

    /// Replaces the list with the server's view. Without a session this does nothing.
    pub async fn load_todos(&self) {
        self.refresh(true).await;
    }

    /// Creates a todo and reloads. Returns the server's record, or the request echo
    /// when the server confirmed without a body and the reload could not locate it.
    pub async fn add_todo(&self, new_todo: NewTodo) -> Option<Todo> {
        self.create(new_todo, "Failed to create task").await
    }

    pub async fn update_todo(&self, todo: Todo) -> bool {
        if let Err(message) = todo.validate() {
            warn!(todo_id = todo.id, %message, "rejected invalid todo update");
            self.set_error(Some(message));
            return false;
        }
        let Some(session) = self.session() else {
            return false;
        };

        let _loading = LoadingGuard::begin(self);
        match self.api.update(&session.access_token, &todo).await {
            Ok(_) => {
                debug!(todo_id = todo.id, "todo updated");
                if !todo.notification_enabled {
                    self.cancel_reminder(todo.id);
                }
                self.refresh(true).await;
                true
            }
            Err(error) => {
                self.fail(error, "Failed to update task");
                false
            }
        }
    }

    pub async fn toggle_todo_completed(&self, todo: &Todo) -> bool {
        self.update_todo(todo.with_completed_toggled()).await
    }

    pub async fn toggle_notifications(&self, todo: &Todo) -> bool {
        if !todo.notification_enabled {
            if todo.added_to_calendar {
                self.set_error(Some(REMINDER_WHILE_MIRRORED));
                return false;
            }
            if !self.has_notification_permission() {
                debug!(todo_id = todo.id, "notification permission missing");
                self.state
                    .send_modify(|state| state.show_notification_permission_request = true);
                return false;
            }
            if !self.has_exact_alarm_permission() {
                debug!(todo_id = todo.id, "exact alarm permission missing");
                self.state
                    .send_modify(|state| state.show_exact_alarm_permission_request = true);
                return false;
            }
        }
        self.update_todo(todo.with_notifications_toggled()).await
    }

    pub async fn toggle_calendar_event(&self, todo: &Todo) -> bool {
        if !self.calendar.has_permission() {
            self.set_error(Some(CALENDAR_PERMISSION_REQUIRED));
            return false;
        }

        if todo.added_to_calendar {
            if !self.calendar.remove(todo).await {
                warn!(todo_id = todo.id, "calendar event removal failed; updating anyway");
            }
            return self.update_todo(todo.with_calendar_toggled()).await;
        }

        if !self.calendar.add(todo).await {
            self.set_error(Some(CALENDAR_ADD_FAILED));
            return false;
        }
        if self.update_todo(todo.with_calendar_toggled()).await {
            self.cancel_reminder(todo.id);
            return true;
        }
        // The server kept the old flags, so the calendar must not keep the event.
        if !self.calendar.remove(todo).await {
            warn!(todo_id = todo.id, "could not roll back calendar event");
        }
        false
    }

    pub async fn delete_todo(&self, todo: &Todo) -> bool {
        let Some(session) = self.session() else {
            return false;
        };

        let _loading = LoadingGuard::begin(self);
        self.set_error(None::<String>);
        match self.api.delete(&session.access_token, todo.id).await {
            Ok(true) => {
                // Any list still in flight predates the delete.
                let generation = self.next_generation();
                self.claim_generation(generation);
                self.state
                    .send_modify(|state| state.todos.retain(|item| item.id != todo.id));
                self.cancel_reminder(todo.id);
                if !self.calendar.remove(todo).await {
                    warn!(todo_id = todo.id, "calendar event of deleted todo was not removed");
                }
                info!(todo_id = todo.id, "todo deleted");
                true
            }
            Ok(false) => {
                warn!(todo_id = todo.id, "backend refused delete");
                self.refresh(false).await;
                self.set_error(Some("Failed to delete task"));
                false
            }
            Err(error) if error.is_authentication() => {
                self.fail(error, "Failed to delete todo");
                false
            }
            Err(error) => {
                error!(todo_id = todo.id, %error, "delete failed; resynchronizing");
                self.refresh(false).await;
                self.set_error(Some(format!("Failed to delete todo: {error}")));
                false
            }
        }
    }

    pub async fn set_sort_order(&self, sort_order: SortOrder) -> bool {
        if let Err(error) = self.preferences.set_sort_order(sort_order) {
            self.fail(error, "Failed to save sort order");
            return false;
        }
        info!(sort_order = %sort_order, "sort order changed");
        self.refresh(true).await;
        true
    }

    pub async fn handle_shared_content(&self, content: &str) -> Option<Todo> {
        let shared = match SharedContent::parse(content) {
            Ok(shared) => shared,
            Err(message) => {
                self.set_error(Some(message));
                return None;
            }
        };
        let new_todo = NewTodo {
            description: shared.description,
            ..NewTodo::named(shared.title)
        };
        self.create(new_todo, "Failed to create task from shared content")
            .await
    }

    pub fn send_test_notification(&self, todo: &Todo) -> bool {
        if !self.has_notification_permission() {
            self.state
                .send_modify(|state| state.show_notification_permission_request = true);
            return false;
        }
        match self.scheduler.present_now(todo) {
            Ok(()) => true,
            Err(error) => {
                self.set_error(Some(format!("Failed to show notification: {error}")));
                false
            }
        }
    }

    /// Drops the session and every local side effect tied to it.
    pub fn sign_out(&self) {
        if let Err(error) = self.sessions.clear_session() {
            warn!(%error, "failed to clear session");
        }
        if let Err(error) = self.scheduler.cancel_all() {
            warn!(%error, "failed to cancel reminders");
        }
        let generation = self.next_generation();
        self.claim_generation(generation);
        self.state.send_modify(|state| {
            state.todos.clear();
            state.error = None;
            state.session_expired = false;
        });
        info!("signed out");
    }

    async fn create(&self, new_todo: NewTodo, failure: &str) -> Option<Todo> {
        if let Err(message) = new_todo.validate() {
            warn!(%message, "rejected invalid new todo");
            self.set_error(Some(message));
            return None;
        }
        let session = self.session()?;
        let todo = new_todo.into_todo(session.user_id.clone());
        if todo.notification_enabled && !self.has_notification_permission() {
            self.state
                .send_modify(|state| state.show_notification_permission_request = true);
        }

        let _loading = LoadingGuard::begin(self);
        let created = match self
            .api
            .create(&session.access_token, &todo, session.user_id.as_deref())
            .await
        {
            Ok(created) => created,
            Err(error) => {
                self.fail(error, failure);
                return None;
            }
        };
        info!(todo_id = created.id, "todo created");

        self.refresh(true).await;
        let created = self.locate_created(created);
        if created.added_to_calendar {
            self.mirror_created(&created).await;
        }
        Some(created)
    }

    /// The server record for a create that may have been confirmed with an empty body.
    fn locate_created(&self, created: Todo) -> Todo {
        if created.is_persisted() {
            return created;
        }
        self.snapshot()
            .todos
            .into_iter()
            .filter(|todo| {
                todo.name == created.name
                    && todo.description == created.description
                    && todo.due_date == created.due_date
                    && todo.added_to_calendar == created.added_to_calendar
            })
            .max_by_key(|todo| todo.id)
            .unwrap_or(created)
    }

    async fn mirror_created(&self, created: &Todo) {
        if !created.is_persisted() {
            warn!("created todo has no id; calendar mirroring skipped");
            return;
        }
        let message = if !self.calendar.has_permission() {
            CALENDAR_PERMISSION_REQUIRED
        } else if self.calendar.add(created).await {
            return;
        } else {
            CALENDAR_ADD_FAILED
        };

        let reverted = Todo {
            added_to_calendar: false,
            ..created.clone()
        };
        self.update_todo(reverted).await;
        self.set_error(Some(message));
    }

    async fn refresh(&self, clear_error: bool) {
        let Some(session) = self.session() else {
            return;
        };
        let sort_order = self.current_sort_order();
        let generation = self.next_generation();

        let _loading = LoadingGuard::begin(self);
        if clear_error {
            self.set_error(None::<String>);
        }
        let result = self
            .api
            .list(&session.access_token, session.user_id.as_deref(), Some(sort_order))
            .await;

        if !self.claim_generation(generation) {
            debug!(generation, "discarding stale list result");
            return;
        }
        match result {
            Ok(todos) => {
                info!(count = todos.len(), sort_order = %sort_order, "todos loaded");
                self.reconcile_reminders(&todos);
                self.state.send_modify(|state| {
                    state.todos = todos;
                    state.session_expired = false;
                });
            }
            Err(error) => self.fail(error, "Failed to load tasks"),
        }
    }

    fn session(&self) -> Option<Session> {
        match self.sessions.load_session() {
            Ok(Some(session)) if !session.access_token.trim().is_empty() => Some(session),
            Ok(_) => {
                debug!("no session; skipping");
                None
            }
            Err(error) => {
                self.fail(error, "Failed to read session");
                None
            }
        }
    }

    fn current_sort_order(&self) -> SortOrder {
        self.preferences.sort_order().unwrap_or_else(|error| {
            warn!(%error, "failed to read sort order; using default");
            SortOrder::default()
        })
    }

    fn next_generation(&self) -> u64 {
        self.list_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True when `generation` is newer than anything already applied.
    fn claim_generation(&self, generation: u64) -> bool {
        self.applied_generation.fetch_max(generation, Ordering::SeqCst) < generation
    }

    fn reconcile_reminders(&self, todos: &[Todo]) {
        let result = if self.has_notification_permission() {
            self.scheduler.reconcile(todos)
        } else {
            self.scheduler.cancel_all()
        };
        if let Err(error) = result {
            warn!(%error, "failed to reconcile reminders");
        }
    }

    fn cancel_reminder(&self, todo_id: i64) {
        if let Err(error) = self.scheduler.cancel(todo_id) {
            warn!(todo_id, %error, "failed to cancel reminder");
        }
    }

    fn set_error<S: Into<String>>(&self, message: Option<S>) {
        let message = message.map(Into::into);
        self.state.send_modify(|state| state.error = message);
    }

    fn fail(&self, failure: InfraError, context: &str) {
        if failure.is_authentication() {
            warn!(error = %failure, context, "session rejected by backend");
            if let Err(error) = self.sessions.clear_session() {
                warn!(%error, "failed to clear rejected session");
            }
            if let Err(error) = self.scheduler.cancel_all() {
                warn!(%error, "failed to cancel reminders");
            }
            self.state.send_modify(|state| {
                state.todos.clear();
                state.session_expired = true;
                state.error = Some(SESSION_EXPIRED.to_string());
            });
            return;
        }
        error!(error = %failure, context, "operation failed");
        self.set_error(Some(format!("{context}: {failure}")));
    }
}
