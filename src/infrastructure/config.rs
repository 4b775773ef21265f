use crate::domain::models::{DEFAULT_NOTIFICATION_MINUTES, SortOrder};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::todo_api_client::BackendConfig;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const PREFERENCES_JSON: &str = "preferences.json";
const DEFAULT_CALENDAR_ID: &str = "primary";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

const BASE_URL_KEYS: &[&str] = &["TODO_SYNC_BASE_URL", "SUPABASE_URL"];
const API_KEY_KEYS: &[&str] = &["TODO_SYNC_API_KEY", "SUPABASE_API_KEY"];
const TIMEZONE_KEYS: &[&str] = &["TODO_SYNC_TIMEZONE"];
const GOOGLE_TOKEN_KEYS: &[&str] = &["TODO_SYNC_GOOGLE_ACCESS_TOKEN"];

/// Resolved `app.json` plus environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub timezone: Option<String>,
    pub default_notification_minutes: u32,
    pub calendar_id: String,
    pub google_access_token: Option<String>,
}

impl AppConfig {
    pub fn backend_config(&self) -> Result<BackendConfig, InfraError> {
        let base_url = self.base_url.clone().ok_or_else(|| missing("backend base url", BASE_URL_KEYS))?;
        let api_key = self.api_key.clone().ok_or_else(|| missing("backend api key", API_KEY_KEYS))?;
        Ok(BackendConfig {
            base_url,
            api_key,
            timeout_secs: self.timeout_secs,
        })
    }
}

fn missing(field_name: &str, keys: &[&str]) -> InfraError {
    InfraError::InvalidConfig(format!(
        "missing {} (set it in {APP_JSON} or one of: {})",
        field_name,
        keys.join(", ")
    ))
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "todo-sync",
                "timezone": null,
                "defaultNotificationMinutes": DEFAULT_NOTIFICATION_MINUTES,
                "backend": {
                    "baseUrl": "",
                    "apiKey": "",
                    "timeoutSecs": DEFAULT_TIMEOUT_SECS
                },
                "calendar": {
                    "calendarId": DEFAULT_CALENDAR_ID
                }
            }),
        ),
        (
            PREFERENCES_JSON,
            serde_json::json!({
                "schema": 1,
                "sortOrder": SortOrder::default().as_str()
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn non_empty_str(value: Option<&serde_json::Value>) -> Option<String> {
    value
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_app_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_app_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;
    let backend = app.get("backend");

    let default_notification_minutes = match app.get("defaultNotificationMinutes") {
        None | Some(serde_json::Value::Null) => DEFAULT_NOTIFICATION_MINUTES,
        Some(value) => value
            .as_u64()
            .and_then(|minutes| u32::try_from(minutes).ok())
            .ok_or_else(|| {
                InfraError::InvalidConfig(format!(
                    "defaultNotificationMinutes must be a non-negative integer in {APP_JSON}"
                ))
            })?,
    };

    Ok(AppConfig {
        base_url: lookup_value(&lookup, BASE_URL_KEYS)
            .or_else(|| non_empty_str(backend.and_then(|value| value.get("baseUrl")))),
        api_key: lookup_value(&lookup, API_KEY_KEYS)
            .or_else(|| non_empty_str(backend.and_then(|value| value.get("apiKey")))),
        timeout_secs: backend
            .and_then(|value| value.get("timeoutSecs"))
            .and_then(serde_json::Value::as_u64)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
        timezone: lookup_value(&lookup, TIMEZONE_KEYS).or_else(|| non_empty_str(app.get("timezone"))),
        default_notification_minutes,
        calendar_id: non_empty_str(app.get("calendar").and_then(|value| value.get("calendarId")))
            .unwrap_or_else(|| DEFAULT_CALENDAR_ID.to_string()),
        google_access_token: lookup_value(&lookup, GOOGLE_TOKEN_KEYS),
    })
}

fn lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

pub fn read_sort_order(config_dir: &Path) -> Result<SortOrder, InfraError> {
    let path = config_dir.join(PREFERENCES_JSON);
    let preferences = read_config(&path)?;
    match non_empty_str(preferences.get("sortOrder")) {
        Some(raw) => raw
            .parse::<SortOrder>()
            .map_err(|error| InfraError::InvalidConfig(format!("{error} in {}", path.display()))),
        None => Ok(SortOrder::default()),
    }
}

pub fn save_sort_order(config_dir: &Path, sort_order: SortOrder) -> Result<(), InfraError> {
    let path = config_dir.join(PREFERENCES_JSON);
    let mut preferences = read_config(&path)?;
    let object = preferences.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert(
        "sortOrder".to_string(),
        serde_json::Value::String(sort_order.as_str().to_string()),
    );
    write_config(&path, &preferences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DIR: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "todo-sync-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            ensure_default_configs(&path).expect("write defaults");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_load_without_backend_settings() {
        let dir = TempConfigDir::new();
        let config = load_app_config_with_lookup(&dir.path, |_| None).expect("load defaults");

        assert_eq!(config.calendar_id, "primary");
        assert_eq!(config.default_notification_minutes, 30);
        assert_eq!(config.timeout_secs, 15);
        assert_eq!(config.timezone, None);
        match config.backend_config() {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("base url")),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = TempConfigDir::new();
        let config = load_app_config_with_lookup(&dir.path, |key| match key {
            "TODO_SYNC_BASE_URL" => Some("https://example.supabase.co".to_string()),
            "SUPABASE_API_KEY" => Some("anon-key".to_string()),
            "TODO_SYNC_TIMEZONE" => Some(" Europe/Amsterdam ".to_string()),
            _ => None,
        })
        .expect("load with env");

        let backend = config.backend_config().expect("backend config");
        assert_eq!(backend.base_url, "https://example.supabase.co");
        assert_eq!(backend.api_key, "anon-key");
        assert_eq!(config.timezone.as_deref(), Some("Europe/Amsterdam"));
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        fs::write(dir.path.join(APP_JSON), r#"{"schema": 2}"#).expect("overwrite app.json");

        let result = load_app_config_with_lookup(&dir.path, |_| None);
        assert!(matches!(result, Err(InfraError::InvalidConfig(message)) if message.contains("schema 2")));
    }

    #[test]
    fn sort_order_persists_across_reads() {
        let dir = TempConfigDir::new();
        assert_eq!(read_sort_order(&dir.path).expect("default"), SortOrder::DueDateAsc);

        save_sort_order(&dir.path, SortOrder::NameDesc).expect("save");
        assert_eq!(read_sort_order(&dir.path).expect("reread"), SortOrder::NameDesc);
    }
}
