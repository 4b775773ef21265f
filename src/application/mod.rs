pub mod app;
pub mod bootstrap;
pub mod calendar_mirror;
pub mod reminder_scheduler;
pub mod todo_controller;
