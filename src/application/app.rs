use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::calendar_mirror::CalendarMirror;
use crate::application::reminder_scheduler::ReminderScheduler;
use crate::application::todo_controller::{TodoController, TodoServices};
use crate::domain::models::Session;
use crate::infrastructure::auth_client::{AuthApi, AuthUser, InMemoryAuthApi, ReqwestAuthClient, SignUpOutcome};
use crate::infrastructure::calendar_backend::{CalendarBackend, GoogleCalendarBackend, InMemoryCalendarBackend};
use crate::infrastructure::calendar_link_repository::SqliteCalendarLinkRepository;
use crate::infrastructure::config::{AppConfig, load_app_config};
use crate::infrastructure::credential_store::{InMemorySessionStore, KeyringSessionStore, SessionStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::TracingNotificationPresenter;
use crate::infrastructure::permissions::StaticPermissions;
use crate::infrastructure::preferences::JsonPreferencesStore;
use crate::infrastructure::todo_api_client::{InMemoryTodoApi, ReqwestTodoApiClient, TodoApi};
use crate::infrastructure::wall_clock::WallClock;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const OFFLINE_TOKEN: &str = "offline";
const OFFLINE_USER: &str = "offline-user";

#[derive(Debug, Clone, Copy, Default)]
pub struct AppOptions {
    /// Keep tasks, session and calendar in process memory instead of the backend.
    pub offline: bool,
}

/// Explicitly constructed services for one workspace.
pub struct TodoApp {
    bootstrap: BootstrapResult,
    config: AppConfig,
    clock: WallClock,
    sessions: Arc<dyn SessionStore>,
    auth: Arc<dyn AuthApi>,
    scheduler: Arc<ReminderScheduler>,
    controller: TodoController,
}

impl TodoApp {
    pub fn new(workspace_root: &Path, options: AppOptions) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(workspace_root)?;
        let config = load_app_config(&bootstrap.config_dir)?;
        let clock = WallClock::from_config(config.timezone.as_deref())?;

        let (api, sessions, auth): (Arc<dyn TodoApi>, Arc<dyn SessionStore>, Arc<dyn AuthApi>) =
            if options.offline {
                (
                    Arc::new(InMemoryTodoApi::new(clock)),
                    Arc::new(InMemorySessionStore::with_session(OFFLINE_TOKEN, Some(OFFLINE_USER))),
                    Arc::new(InMemoryAuthApi::with_session(OFFLINE_TOKEN, OFFLINE_USER)),
                )
            } else {
                let backend = config.backend_config()?;
                (
                    Arc::new(ReqwestTodoApiClient::new(&backend, clock)?),
                    Arc::new(KeyringSessionStore::default()),
                    Arc::new(ReqwestAuthClient::new(&backend)?),
                )
            };

        let calendar_backend: Arc<dyn CalendarBackend> = match (&config.google_access_token, options.offline) {
            (Some(token), false) => Arc::new(GoogleCalendarBackend::new(token.clone(), config.calendar_id.clone())?),
            _ => Arc::new(InMemoryCalendarBackend::default()),
        };
        let calendar_available = options.offline || config.google_access_token.is_some();
        let permissions = Arc::new(StaticPermissions::new(true, true, calendar_available));

        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::new(TracingNotificationPresenter),
            clock,
        ));
        let calendar = Arc::new(CalendarMirror::new(
            calendar_backend,
            Arc::new(SqliteCalendarLinkRepository::new(&bootstrap.database_path)),
            permissions.clone(),
            clock,
        ));

        let controller = TodoController::new(TodoServices {
            api,
            sessions: sessions.clone(),
            preferences: Arc::new(JsonPreferencesStore::new(&bootstrap.config_dir)),
            permissions,
            scheduler: scheduler.clone(),
            calendar,
        });

        info!(
            workspace = %bootstrap.workspace_root.display(),
            offline = options.offline,
            calendar = calendar_available,
            "todo app ready"
        );
        Ok(Self {
            bootstrap,
            config,
            clock,
            sessions,
            auth,
            scheduler,
            controller,
        })
    }

    pub fn controller(&self) -> &TodoController {
        &self.controller
    }

    pub fn scheduler(&self) -> &ReminderScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clock(&self) -> WallClock {
        self.clock
    }

    pub fn workspace(&self) -> &BootstrapResult {
        &self.bootstrap
    }

    pub fn has_session(&self) -> bool {
        matches!(self.sessions.load_session(), Ok(Some(_)))
    }

    /// Signs in with email and password and stores the returned session.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, InfraError> {
        let session = self.auth.sign_in(email, password).await?;
        self.sessions.save_session(&session)?;
        info!(user_id = ?session.user_id, "session stored");
        Ok(session)
    }

    /// Creates an account. The session is stored when the server issues one right away.
    pub async fn register(&self, email: &str, password: &str) -> Result<SignUpOutcome, InfraError> {
        let outcome = self.auth.sign_up(email, password).await?;
        match &outcome {
            SignUpOutcome::SignedIn(session) => {
                self.sessions.save_session(session)?;
                info!(user_id = ?session.user_id, "registered and signed in");
            }
            SignUpOutcome::ConfirmationRequired(user) => {
                info!(user_id = %user.id, "registered; email confirmation pending");
            }
        }
        Ok(outcome)
    }

    pub async fn current_user(&self) -> Result<AuthUser, InfraError> {
        let session = self
            .sessions
            .load_session()?
            .ok_or_else(|| InfraError::Unauthorized("not logged in".to_string()))?;
        self.auth.current_user(&session.access_token).await
    }

    /// Stores a token obtained outside the app.
    pub fn login(&self, access_token: &str, user_id: Option<&str>) -> Result<(), InfraError> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(InfraError::Unauthorized("access token must not be empty".to_string()));
        }
        self.sessions.save_session(&Session {
            access_token: access_token.to_string(),
            user_id: user_id
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
        })?;
        info!("session stored");
        Ok(())
    }

    /// Revokes the token on the server, then always drops the local session. Returns
    /// whether the server confirmed the revocation.
    pub async fn logout(&self) -> bool {
        let revoked = match self.sessions.load_session() {
            Ok(Some(session)) => match self.auth.sign_out(&session.access_token).await {
                Ok(()) => true,
                Err(error) => {
                    warn!(%error, "server sign-out failed; clearing the local session anyway");
                    false
                }
            },
            Ok(None) => false,
            Err(error) => {
                warn!(%error, "failed to read session before sign-out");
                false
            }
        };
        self.controller.sign_out();
        revoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::NewTodo;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "todo-sync-app-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            Self { path }
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[tokio::test]
    async fn offline_app_round_trips_a_todo() {
        let workspace = TempWorkspace::new();
        let app = TodoApp::new(&workspace.path, AppOptions { offline: true }).expect("app");

        let created = app
            .controller()
            .add_todo(NewTodo::named("Offline task"))
            .await
            .expect("created");
        assert!(created.is_persisted());
        assert_eq!(app.controller().snapshot().todos.len(), 1);
        assert!(workspace.path.join("state").join("todo-sync.sqlite").exists());
    }

    #[tokio::test]
    async fn offline_register_sign_in_and_logout() {
        let workspace = TempWorkspace::new();
        let app = TodoApp::new(&workspace.path, AppOptions { offline: true }).expect("app");

        let outcome = app.register("ada@example.com", "pw").await.expect("register");
        assert!(matches!(outcome, SignUpOutcome::SignedIn(_)));

        let session = app.sign_in("ada@example.com", "pw").await.expect("sign in");
        assert!(app.has_session());
        let user = app.current_user().await.expect("current user");
        assert_eq!(Some(user.id), session.user_id);

        assert!(app.logout().await);
        assert!(!app.has_session());
        assert!(matches!(app.current_user().await, Err(InfraError::Unauthorized(_))));
        // Logging out again has nothing to revoke.
        assert!(!app.logout().await);
    }

    #[tokio::test]
    async fn wrong_password_keeps_the_existing_session() {
        let workspace = TempWorkspace::new();
        let app = TodoApp::new(&workspace.path, AppOptions { offline: true }).expect("app");

        app.register("ada@example.com", "pw").await.expect("register");
        assert!(matches!(
            app.sign_in("ada@example.com", "nope").await,
            Err(InfraError::Unauthorized(_))
        ));
        assert!(app.has_session());
    }

    #[test]
    fn online_app_requires_backend_settings() {
        let workspace = TempWorkspace::new();
        // Environment overrides may be present on a developer machine.
        if std::env::var("TODO_SYNC_BASE_URL").is_ok() || std::env::var("SUPABASE_URL").is_ok() {
            return;
        }
        let result = TodoApp::new(&workspace.path, AppOptions::default());
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));
    }
}
