pub mod application;
pub mod domain;
pub mod infrastructure;

use application::app::{AppOptions, TodoApp};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use domain::models::{NewTodo, SortOrder, Todo};
use infrastructure::auth_client::SignUpOutcome;
use infrastructure::error::InfraError;
use infrastructure::logging::init_logging;
use infrastructure::wall_clock::WallClock;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

const WATCH_REFRESH: Duration = Duration::from_secs(60);
const DUE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

#[derive(Debug, Parser)]
#[command(name = "todo-sync", version, about = "Keep todos, reminders and calendar entries in sync")]
pub struct Cli {
    /// Directory holding config/, state/ and logs/ (defaults to the current directory).
    #[arg(long, env = "TODO_SYNC_WORKSPACE")]
    pub workspace: Option<PathBuf>,
    /// Use an in-process backend instead of the configured REST API.
    #[arg(long)]
    pub offline: bool,
    #[arg(long, default_value = "info")]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the task list in the saved sort order.
    List,
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// RFC 3339 instant or local `YYYY-MM-DD HH:MM`.
        #[arg(long)]
        due: Option<String>,
        /// Enable a reminder this many minutes before the due date.
        #[arg(long)]
        remind: Option<u32>,
        #[arg(long)]
        calendar: bool,
    },
    /// Toggle the completed flag.
    Done { id: i64 },
    /// Toggle the reminder.
    Remind {
        id: i64,
        #[arg(long)]
        minutes: Option<u32>,
    },
    /// Toggle calendar mirroring.
    Calendar { id: i64 },
    Delete { id: i64 },
    /// Present the reminder for a task right now.
    Notify { id: i64 },
    Sort { order: SortOrder },
    /// Create a task from shared text or a URL.
    Share { text: String },
    /// Sign in with email and password.
    Login {
        email: String,
        #[arg(long, env = "TODO_SYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account; signs in when the server does not ask for confirmation.
    Register {
        email: String,
        #[arg(long, env = "TODO_SYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Store an access token obtained elsewhere.
    Token {
        token: String,
        user_id: Option<String>,
    },
    /// Show the signed-in account.
    Whoami,
    /// Revoke the session on the server and forget it locally.
    Logout,
    /// Keep reminders armed and refreshed until Ctrl-C.
    Watch,
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = match cli.workspace.clone() {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(path) => path,
            Err(error) => {
                eprintln!("error: failed to resolve current directory: {error}");
                return ExitCode::FAILURE;
            }
        },
    };

    let _log_guard = match init_logging(&workspace_root.join("logs"), &cli.log_level) {
        Ok(guard) => Some(guard),
        Err(error) => {
            eprintln!("warning: file logging disabled: {error}");
            None
        }
    };

    let app = match TodoApp::new(&workspace_root, AppOptions { offline: cli.offline }) {
        Ok(app) => app,
        Err(error) => {
            eprintln!("error: {}", command_error("startup", &error));
            return ExitCode::FAILURE;
        }
    };

    match execute(&app, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(app: &TodoApp, command: Command) -> Result<(), String> {
    let controller = app.controller();
    match command {
        Command::List => {
            require_session(app)?;
            controller.load_todos().await;
            ensure_no_error(app, "list")?;
            print_todos(&controller.snapshot().todos);
        }
        Command::Add {
            name,
            description,
            due,
            remind,
            calendar,
        } => {
            require_session(app)?;
            let due_date = due
                .as_deref()
                .map(|raw| parse_due(raw, app.clock()))
                .transpose()?;
            let new_todo = NewTodo {
                description,
                due_date,
                notification_enabled: remind.is_some(),
                notification_minutes_before: remind
                    .unwrap_or(app.config().default_notification_minutes),
                added_to_calendar: calendar,
                ..NewTodo::named(name)
            };
            let created = controller
                .add_todo(new_todo)
                .await
                .ok_or_else(|| failure(app, "add"))?;
            ensure_no_error(app, "add")?;
            println!("created {}", describe(&created));
        }
        Command::Done { id } => {
            let todo = find_todo(app, id).await?;
            succeed(app, "done", controller.toggle_todo_completed(&todo).await)?;
            println!("{} marked {}", todo.id, if todo.completed { "open" } else { "done" });
        }
        Command::Remind { id, minutes } => {
            let mut todo = find_todo(app, id).await?;
            match reminder_change(&todo, minutes) {
                ReminderChange::LeadTime(minutes) => {
                    let updated = Todo {
                        notification_minutes_before: minutes,
                        ..todo.clone()
                    };
                    succeed(app, "remind", controller.update_todo(updated).await)?;
                }
                ReminderChange::Toggle => {
                    if let Some(minutes) = minutes {
                        todo.notification_minutes_before = minutes;
                    }
                    succeed(app, "remind", controller.toggle_notifications(&todo).await)?;
                }
            }
            let fire_at = app
                .scheduler()
                .pending_fire_time(todo.id)
                .map_err(|error| command_error("remind", &error))?;
            match fire_at {
                Some(fire_at) => println!("reminder for {} at {}", todo.id, format_local(app.clock(), fire_at)),
                None => println!("no reminder pending for {}", todo.id),
            }
        }
        Command::Calendar { id } => {
            let todo = find_todo(app, id).await?;
            succeed(app, "calendar", controller.toggle_calendar_event(&todo).await)?;
            println!(
                "{} {} the calendar",
                todo.id,
                if todo.added_to_calendar { "removed from" } else { "added to" }
            );
        }
        Command::Delete { id } => {
            let todo = find_todo(app, id).await?;
            succeed(app, "delete", controller.delete_todo(&todo).await)?;
            println!("deleted {}", todo.id);
        }
        Command::Notify { id } => {
            let todo = find_todo(app, id).await?;
            succeed(app, "notify", controller.send_test_notification(&todo))?;
        }
        Command::Sort { order } => {
            succeed(app, "sort", controller.set_sort_order(order).await)?;
            ensure_no_error(app, "sort")?;
            println!("sort order set to {order}");
            print_todos(&controller.snapshot().todos);
        }
        Command::Share { text } => {
            require_session(app)?;
            let created = controller
                .handle_shared_content(&text)
                .await
                .ok_or_else(|| failure(app, "share"))?;
            println!("created {}", describe(&created));
        }
        Command::Login { email, password } => {
            let session = app
                .sign_in(&email, &password)
                .await
                .map_err(|error| command_error("login", &error))?;
            println!("signed in as {}", session.user_id.as_deref().unwrap_or(email.as_str()));
        }
        Command::Register { email, password } => {
            match app
                .register(&email, &password)
                .await
                .map_err(|error| command_error("register", &error))?
            {
                SignUpOutcome::SignedIn(_) => println!("registered and signed in as {email}"),
                SignUpOutcome::ConfirmationRequired(_) => {
                    println!("registered; confirm {email} before logging in")
                }
            }
        }
        Command::Token { token, user_id } => {
            app.login(&token, user_id.as_deref())
                .map_err(|error| command_error("token", &error))?;
            println!("session stored");
        }
        Command::Whoami => {
            require_session(app)?;
            let user = app
                .current_user()
                .await
                .map_err(|error| command_error("whoami", &error))?;
            println!("{} {}", user.id, user.email.as_deref().unwrap_or(""));
        }
        Command::Logout => {
            if app.logout().await {
                println!("signed out");
            } else {
                println!("signed out locally; the server did not confirm");
            }
        }
        Command::Watch => watch(app).await?,
    }
    Ok(())
}

async fn watch(app: &TodoApp) -> Result<(), String> {
    require_session(app)?;
    let controller = app.controller();
    controller.load_todos().await;
    ensure_no_error(app, "watch")?;

    let armed = app
        .scheduler()
        .pending_count()
        .map_err(|error| command_error("watch", &error))?;
    println!(
        "watching {} task(s), {armed} reminder(s) armed; press Ctrl-C to stop",
        controller.snapshot().todos.len()
    );

    let mut refresh = tokio::time::interval(WATCH_REFRESH);
    refresh.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|error| format!("failed to listen for Ctrl-C: {error}"))?;
                break;
            }
            _ = refresh.tick() => {
                controller.load_todos().await;
                let state = controller.snapshot();
                if state.session_expired {
                    return Err(failure(app, "watch"));
                }
                if let Some(message) = state.error {
                    warn!(%message, "refresh failed; keeping armed reminders");
                }
            }
        }
    }

    if let Err(error) = app.scheduler().cancel_all() {
        warn!(%error, "failed to cancel reminders on shutdown");
    }
    info!("watch stopped");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReminderChange {
    Toggle,
    LeadTime(u32),
}

/// `--minutes` on a task whose reminder is already on only moves the reminder.
fn reminder_change(todo: &Todo, minutes: Option<u32>) -> ReminderChange {
    match minutes {
        Some(minutes) if todo.notification_enabled => ReminderChange::LeadTime(minutes),
        _ => ReminderChange::Toggle,
    }
}

/// Accepts an RFC 3339 instant or a local `YYYY-MM-DD HH:MM[:SS]` wall-clock time.
pub fn parse_due(raw: &str, clock: WallClock) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(clock.to_local(instant.with_timezone(&Utc)));
    }
    DUE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .ok_or_else(|| format!("invalid due date '{raw}': expected RFC 3339 or YYYY-MM-DD HH:MM"))
}

fn command_error(command: &str, error: &InfraError) -> String {
    error!(command, %error, "command failed");
    error.to_string()
}

fn failure(app: &TodoApp, command: &str) -> String {
    let message = app
        .controller()
        .snapshot()
        .error
        .unwrap_or_else(|| format!("{command} did not complete"));
    error!(command, %message, "command failed");
    message
}

fn succeed(app: &TodoApp, command: &str, succeeded: bool) -> Result<(), String> {
    if succeeded {
        return Ok(());
    }
    Err(failure(app, command))
}

fn ensure_no_error(app: &TodoApp, command: &str) -> Result<(), String> {
    match app.controller().snapshot().error {
        Some(message) => {
            error!(command, %message, "command failed");
            Err(message)
        }
        None => Ok(()),
    }
}

fn require_session(app: &TodoApp) -> Result<(), String> {
    if app.has_session() {
        return Ok(());
    }
    Err("not logged in; run `todo-sync login <email> --password <password>` first".to_string())
}

async fn find_todo(app: &TodoApp, id: i64) -> Result<Todo, String> {
    require_session(app)?;
    app.controller().load_todos().await;
    ensure_no_error(app, "load")?;
    app.controller()
        .snapshot()
        .todos
        .into_iter()
        .find(|todo| todo.id == id)
        .ok_or_else(|| format!("no task with id {id}"))
}

fn format_local(clock: WallClock, instant: DateTime<Utc>) -> String {
    clock.to_local(instant).format("%Y-%m-%d %H:%M").to_string()
}

fn describe(todo: &Todo) -> String {
    let mut line = format!(
        "{:>5}  [{}] {}",
        todo.id,
        if todo.completed { "x" } else { " " },
        todo.name
    );
    if let Some(due) = todo.due_date {
        line.push_str(&format!("  due {}", due.format("%Y-%m-%d %H:%M")));
    }
    if todo.notification_enabled {
        line.push_str(&format!("  (reminder {}m)", todo.notification_minutes_before));
    }
    if todo.added_to_calendar {
        line.push_str("  (calendar)");
    }
    line
}

fn print_todos(todos: &[Todo]) {
    if todos.is_empty() {
        println!("no tasks");
        return;
    }
    for todo in todos {
        println!("{}", describe(todo));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn due_accepts_local_and_rfc3339_forms() {
        let clock = WallClock::Named(chrono_tz::Europe::Amsterdam);
        let expected = NaiveDate::from_ymd_opt(2026, 1, 20)
            .and_then(|date| date.and_hms_opt(14, 0, 0))
            .expect("valid date");

        assert_eq!(parse_due("2026-01-20 14:00", clock), Ok(expected));
        assert_eq!(parse_due("2026-01-20T14:00:00", clock), Ok(expected));
        assert_eq!(parse_due("2026-01-20T13:00:00Z", clock), Ok(expected));
        assert!(parse_due("next tuesday", clock).is_err());
    }

    #[test]
    fn cli_parses_global_flags_and_sort_order() {
        let cli = Cli::try_parse_from(["todo-sync", "--offline", "sort", "due-soon-first"])
            .expect("parse");
        assert!(cli.offline);
        assert!(matches!(
            cli.command,
            Command::Sort {
                order: SortOrder::DueSoonFirst
            }
        ));

        let cli = Cli::try_parse_from([
            "todo-sync",
            "add",
            "Buy milk",
            "--due",
            "2026-01-20 14:00",
            "--remind",
            "15",
        ])
        .expect("parse add");
        match cli.command {
            Command::Add { name, remind, calendar, .. } => {
                assert_eq!(name, "Buy milk");
                assert_eq!(remind, Some(15));
                assert!(!calendar);
            }
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn remind_minutes_on_an_armed_task_keeps_the_reminder_on() {
        let armed = Todo {
            id: 4,
            notification_enabled: true,
            ..Todo::default()
        };
        assert_eq!(reminder_change(&armed, Some(10)), ReminderChange::LeadTime(10));
        assert_eq!(reminder_change(&armed, None), ReminderChange::Toggle);

        let idle = Todo {
            notification_enabled: false,
            ..armed
        };
        assert_eq!(reminder_change(&idle, Some(10)), ReminderChange::Toggle);
    }

    #[test]
    fn cli_parses_login_and_token_commands() {
        let cli = Cli::try_parse_from(["todo-sync", "login", "ada@example.com", "--password", "pw"])
            .expect("parse login");
        assert!(matches!(
            cli.command,
            Command::Login { ref email, ref password } if email == "ada@example.com" && password == "pw"
        ));

        let cli = Cli::try_parse_from(["todo-sync", "token", "jwt", "user-1"]).expect("parse token");
        assert!(matches!(
            cli.command,
            Command::Token { ref token, user_id: Some(ref user_id) } if token == "jwt" && user_id == "user-1"
        ));
    }

    #[test]
    fn describe_marks_flags() {
        let todo = Todo {
            id: 3,
            name: "Pay rent".to_string(),
            completed: true,
            added_to_calendar: true,
            ..Todo::default()
        };
        assert_eq!(describe(&todo), "    3  [x] Pay rent  (calendar)");
    }
}
