use crate::domain::models::Todo;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notifier::{NotificationPresenter, Reminder};
use crate::infrastructure::wall_clock::WallClock;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type PendingMap = Arc<Mutex<HashMap<i64, PendingReminder>>>;

#[derive(Debug)]
struct PendingReminder {
    fire_at: DateTime<Utc>,
    generation: u64,
    handle: JoinHandle<()>,
}

/// One-shot reminder timers keyed by todo id. At most one timer is pending per id;
/// scheduling again replaces the previous timer.
pub struct ReminderScheduler {
    presenter: Arc<dyn NotificationPresenter>,
    clock: WallClock,
    now_provider: NowProvider,
    pending: PendingMap,
    next_generation: AtomicU64,
}

impl ReminderScheduler {
    pub fn new(presenter: Arc<dyn NotificationPresenter>, clock: WallClock) -> Self {
        Self {
            presenter,
            clock,
            now_provider: Arc::new(Utc::now),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// When the reminder for `todo` should fire, if it wants one at all. Calendar
    /// mirrored todos never get one, even if the server row carries both flags.
    pub fn fire_time(&self, todo: &Todo) -> Option<DateTime<Utc>> {
        if !todo.notification_enabled || todo.added_to_calendar || !todo.is_persisted() {
            return None;
        }
        let due = self.clock.to_utc(todo.due_date?);
        Some(due - Duration::minutes(i64::from(todo.notification_minutes_before)))
    }

    /// Arms a timer for `todo`. Returns the fire time, or `None` when the todo does
    /// not qualify or the fire time already passed; in both cases no timer is left
    /// pending for its id.
    pub fn schedule(&self, todo: &Todo) -> Result<Option<DateTime<Utc>>, InfraError> {
        let Some(fire_at) = self.fire_time(todo) else {
            self.cancel(todo.id)?;
            return Ok(None);
        };
        let now = (self.now_provider)();
        if fire_at <= now {
            debug!(todo_id = todo.id, %fire_at, "reminder time already passed; not scheduling");
            self.cancel(todo.id)?;
            return Ok(None);
        }
        let delay = (fire_at - now)
            .to_std()
            .map_err(|error| InfraError::Notification(format!("invalid reminder delay: {error}")))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|error| InfraError::Notification(format!("no async runtime for reminders: {error}")))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let reminder = Reminder::for_todo(todo.id, &todo.name, todo.notification_minutes_before);
        let presenter = Arc::clone(&self.presenter);
        let pending = Arc::clone(&self.pending);
        let todo_id = todo.id;

        let mut guard = lock_pending(&self.pending)?;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_current = match pending.lock() {
                Ok(mut map) => match map.get(&todo_id) {
                    Some(entry) if entry.generation == generation => {
                        map.remove(&todo_id);
                        true
                    }
                    _ => false,
                },
                Err(_) => false,
            };
            if still_current {
                present_quietly(presenter.as_ref(), &reminder);
            }
        });
        if let Some(previous) = guard.insert(
            todo_id,
            PendingReminder {
                fire_at,
                generation,
                handle,
            },
        ) {
            previous.handle.abort();
            debug!(todo_id, previous = %previous.fire_at, "replaced pending reminder");
        }
        drop(guard);

        info!(todo_id, %fire_at, "reminder scheduled");
        Ok(Some(fire_at))
    }

    /// Drops the pending timer for `todo_id`, if any.
    pub fn cancel(&self, todo_id: i64) -> Result<(), InfraError> {
        if let Some(entry) = lock_pending(&self.pending)?.remove(&todo_id) {
            entry.handle.abort();
            debug!(todo_id, "reminder cancelled");
        }
        Ok(())
    }

    pub fn cancel_all(&self) -> Result<(), InfraError> {
        let drained = lock_pending(&self.pending)?.drain().collect::<Vec<_>>();
        for (_, entry) in &drained {
            entry.handle.abort();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "all reminders cancelled");
        }
        Ok(())
    }

    /// Presents the reminder for `todo` now. Presentation failures are logged and
    /// dropped; the reminder is not rescheduled.
    pub fn fire(&self, todo: &Todo) {
        let reminder = Reminder::for_todo(todo.id, &todo.name, todo.notification_minutes_before);
        present_quietly(self.presenter.as_ref(), &reminder);
    }

    /// Presents immediately and reports failures to the caller.
    pub fn present_now(&self, todo: &Todo) -> Result<(), InfraError> {
        let reminder = Reminder::for_todo(todo.id, &todo.name, todo.notification_minutes_before);
        self.presenter.present(&reminder)
    }

    pub fn pending_fire_time(&self, todo_id: i64) -> Result<Option<DateTime<Utc>>, InfraError> {
        Ok(lock_pending(&self.pending)?
            .get(&todo_id)
            .map(|entry| entry.fire_at))
    }

    pub fn pending_count(&self) -> Result<usize, InfraError> {
        Ok(lock_pending(&self.pending)?.len())
    }

    /// Brings the timers in line with a freshly loaded list: every todo that wants a
    /// reminder has exactly one, everything else has none.
    pub fn reconcile(&self, todos: &[Todo]) -> Result<(), InfraError> {
        let mut wanted = HashSet::new();
        for todo in todos {
            let Some(fire_at) = self.fire_time(todo) else {
                continue;
            };
            wanted.insert(todo.id);
            if self.pending_fire_time(todo.id)? == Some(fire_at) {
                continue;
            }
            self.schedule(todo)?;
        }

        let stale = lock_pending(&self.pending)?
            .keys()
            .copied()
            .filter(|id| !wanted.contains(id))
            .collect::<Vec<_>>();
        for todo_id in stale {
            self.cancel(todo_id)?;
        }
        Ok(())
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        if let Ok(mut map) = self.pending.lock() {
            for (_, entry) in map.drain() {
                entry.handle.abort();
            }
        }
    }
}

fn lock_pending(pending: &PendingMap) -> Result<MutexGuard<'_, HashMap<i64, PendingReminder>>, InfraError> {
    pending
        .lock()
        .map_err(|error| InfraError::Notification(format!("reminder lock poisoned: {error}")))
}

fn present_quietly(presenter: &dyn NotificationPresenter, reminder: &Reminder) {
    match presenter.present(reminder) {
        Ok(()) => info!(todo_id = reminder.todo_id, "reminder presented"),
        Err(error) => warn!(todo_id = reminder.todo_id, %error, "reminder could not be presented"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::notifier::RecordingNotificationPresenter;
    use chrono::NaiveDateTime;
    use std::time::Duration as StdDuration;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T12:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn in_minutes(minutes: i64) -> Option<NaiveDateTime> {
        Some((fixed_time() + Duration::minutes(minutes)).naive_utc())
    }

    fn reminder_todo(id: i64, due_in_minutes: i64, minutes_before: u32) -> Todo {
        Todo {
            id,
            name: format!("task-{id}"),
            due_date: in_minutes(due_in_minutes),
            notification_enabled: true,
            notification_minutes_before: minutes_before,
            ..Todo::default()
        }
    }

    fn scheduler() -> (ReminderScheduler, Arc<RecordingNotificationPresenter>) {
        let presenter = Arc::new(RecordingNotificationPresenter::default());
        let scheduler = ReminderScheduler::new(presenter.clone(), WallClock::Named(chrono_tz::UTC))
            .with_now_provider(Arc::new(fixed_time));
        (scheduler, presenter)
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_pending_timer() {
        let (scheduler, presenter) = scheduler();

        scheduler.schedule(&reminder_todo(1, 120, 30)).expect("first");
        scheduler.schedule(&reminder_todo(1, 120, 60)).expect("second");

        assert_eq!(scheduler.pending_count().expect("count"), 1);
        assert_eq!(
            scheduler.pending_fire_time(1).expect("fire time"),
            Some(fixed_time() + Duration::minutes(60))
        );

        tokio::time::sleep(StdDuration::from_secs(100 * 60)).await;
        assert_eq!(presenter.presented().len(), 1);
        assert_eq!(presenter.presented()[0].body, "task-1 is due in 60 minutes");
        assert_eq!(scheduler.pending_count().expect("count"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn past_fire_time_leaves_nothing_pending() {
        let (scheduler, presenter) = scheduler();

        scheduler.schedule(&reminder_todo(2, 120, 30)).expect("future");
        let outcome = scheduler.schedule(&reminder_todo(2, 10, 30)).expect("past");

        assert_eq!(outcome, None);
        assert_eq!(scheduler.pending_fire_time(2).expect("fire time"), None);
        tokio::time::sleep(StdDuration::from_secs(3 * 60 * 60)).await;
        assert!(presenter.presented().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_a_noop_without_a_timer() {
        let (scheduler, presenter) = scheduler();
        scheduler.cancel(42).expect("cancel missing");

        scheduler.schedule(&reminder_todo(3, 60, 5)).expect("schedule");
        scheduler.cancel(3).expect("cancel");
        tokio::time::sleep(StdDuration::from_secs(2 * 60 * 60)).await;

        assert!(presenter.presented().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn presentation_failures_are_swallowed_at_fire_time() {
        let (scheduler, presenter) = scheduler();
        presenter.set_failing(true);

        scheduler.schedule(&reminder_todo(4, 31, 30)).expect("schedule");
        tokio::time::sleep(StdDuration::from_secs(5 * 60)).await;

        assert!(presenter.presented().is_empty());
        assert_eq!(scheduler.pending_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn todos_without_due_date_or_opt_in_are_not_scheduled() {
        let (scheduler, _) = scheduler();
        let undated = Todo {
            due_date: None,
            ..reminder_todo(5, 60, 5)
        };
        let opted_out = Todo {
            notification_enabled: false,
            ..reminder_todo(6, 60, 5)
        };
        let unsaved = reminder_todo(0, 60, 5);

        for todo in [&undated, &opted_out, &unsaved] {
            assert_eq!(scheduler.schedule(todo).expect("schedule"), None);
        }
        assert_eq!(scheduler.pending_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn reconcile_arms_wanted_and_drops_stale_timers() {
        let (scheduler, _) = scheduler();
        scheduler.schedule(&reminder_todo(7, 90, 10)).expect("stale timer");
        scheduler.schedule(&reminder_todo(8, 90, 10)).expect("kept timer");

        let loaded = vec![
            reminder_todo(8, 90, 10),
            reminder_todo(9, 240, 30),
            Todo {
                notification_enabled: false,
                ..reminder_todo(10, 240, 30)
            },
        ];
        scheduler.reconcile(&loaded).expect("reconcile");

        assert_eq!(scheduler.pending_count().expect("count"), 2);
        assert_eq!(scheduler.pending_fire_time(7).expect("stale"), None);
        assert!(scheduler.pending_fire_time(9).expect("armed").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_skips_rows_that_are_also_mirrored() {
        let (scheduler, _) = scheduler();
        scheduler.schedule(&reminder_todo(12, 90, 10)).expect("armed");

        let both_flags = Todo {
            added_to_calendar: true,
            ..reminder_todo(12, 90, 10)
        };
        scheduler.reconcile(&[both_flags.clone()]).expect("reconcile");

        assert_eq!(scheduler.pending_fire_time(12).expect("pending"), None);
        assert_eq!(scheduler.fire_time(&both_flags), None);
    }

    #[test]
    fn fire_presents_without_rescheduling() {
        let (scheduler, presenter) = scheduler();
        scheduler.fire(&reminder_todo(11, 60, 15));

        assert_eq!(presenter.presented().len(), 1);
        assert_eq!(presenter.presented()[0].title, "Task Reminder");
        assert_eq!(scheduler.pending_count().expect("count"), 0);
    }
}
