use std::sync::atomic::{AtomicBool, Ordering};

/// Runtime permission state of the host device.
pub trait Permissions: Send + Sync {
    fn notifications_granted(&self) -> bool;
    fn exact_alarms_granted(&self) -> bool;
    fn calendar_granted(&self) -> bool;
}

/// Permission flags set by the embedding host (or by the CLI, which has no prompts).
#[derive(Debug)]
pub struct StaticPermissions {
    notifications: AtomicBool,
    exact_alarms: AtomicBool,
    calendar: AtomicBool,
}

impl Default for StaticPermissions {
    fn default() -> Self {
        Self::all_granted()
    }
}

impl StaticPermissions {
    pub fn all_granted() -> Self {
        Self::new(true, true, true)
    }

    pub fn new(notifications: bool, exact_alarms: bool, calendar: bool) -> Self {
        Self {
            notifications: AtomicBool::new(notifications),
            exact_alarms: AtomicBool::new(exact_alarms),
            calendar: AtomicBool::new(calendar),
        }
    }

    pub fn set_notifications(&self, granted: bool) {
        self.notifications.store(granted, Ordering::SeqCst);
    }

    pub fn set_exact_alarms(&self, granted: bool) {
        self.exact_alarms.store(granted, Ordering::SeqCst);
    }

    pub fn set_calendar(&self, granted: bool) {
        self.calendar.store(granted, Ordering::SeqCst);
    }
}

impl Permissions for StaticPermissions {
    fn notifications_granted(&self) -> bool {
        self.notifications.load(Ordering::SeqCst)
    }

    fn exact_alarms_granted(&self) -> bool {
        self.exact_alarms.load(Ordering::SeqCst)
    }

    fn calendar_granted(&self) -> bool {
        self.calendar.load(Ordering::SeqCst)
    }
}
