pub mod auth_client;
pub mod calendar_backend;
pub mod calendar_link_repository;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod event_mapper;
pub mod logging;
pub mod notifier;
pub mod permissions;
pub mod preferences;
pub mod storage;
pub mod todo_api_client;
pub mod todo_mapper;
pub mod wall_clock;
