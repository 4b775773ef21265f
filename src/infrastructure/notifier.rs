use crate::infrastructure::error::InfraError;
use std::sync::Mutex;
use tracing::info;

pub const REMINDER_TITLE: &str = "Task Reminder";

/// A user-visible reminder ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub todo_id: i64,
    pub title: String,
    pub body: String,
}

impl Reminder {
    pub fn for_todo(todo_id: i64, name: &str, minutes_before: u32) -> Self {
        Self {
            todo_id,
            title: REMINDER_TITLE.to_string(),
            body: format!("{name} is due in {minutes_before} minutes"),
        }
    }
}

pub trait NotificationPresenter: Send + Sync {
    fn present(&self, reminder: &Reminder) -> Result<(), InfraError>;
}

/// Presents reminders as log events; the CLI's `watch` mode prints them through the
/// console layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationPresenter;

impl NotificationPresenter for TracingNotificationPresenter {
    fn present(&self, reminder: &Reminder) -> Result<(), InfraError> {
        info!(
            target: "todo_sync::reminder",
            todo_id = reminder.todo_id,
            title = %reminder.title,
            "{}",
            reminder.body
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotificationPresenter {
    presented: Mutex<Vec<Reminder>>,
    failing: Mutex<bool>,
}

impl RecordingNotificationPresenter {
    pub fn presented(&self) -> Vec<Reminder> {
        self.presented
            .lock()
            .map(|presented| presented.clone())
            .unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut current) = self.failing.lock() {
            *current = failing;
        }
    }
}

impl NotificationPresenter for RecordingNotificationPresenter {
    fn present(&self, reminder: &Reminder) -> Result<(), InfraError> {
        let failing = self
            .failing
            .lock()
            .map_err(|error| InfraError::Notification(format!("presenter lock poisoned: {error}")))?;
        if *failing {
            return Err(InfraError::Notification("notification channel unavailable".to_string()));
        }
        self.presented
            .lock()
            .map_err(|error| InfraError::Notification(format!("presenter lock poisoned: {error}")))?
            .push(reminder.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_text_names_task_and_lead_time() {
        let reminder = Reminder::for_todo(3, "Pay rent", 15);
        assert_eq!(reminder.title, "Task Reminder");
        assert_eq!(reminder.body, "Pay rent is due in 15 minutes");
    }

    #[test]
    fn recording_presenter_can_fail() {
        let presenter = RecordingNotificationPresenter::default();
        presenter.set_failing(true);
        assert!(presenter.present(&Reminder::for_todo(1, "x", 1)).is_err());
        presenter.set_failing(false);
        presenter.present(&Reminder::for_todo(1, "x", 1)).expect("present");
        assert_eq!(presenter.presented().len(), 1);
    }
}
