use crate::domain::models::SortOrder;
use crate::infrastructure::config::{read_sort_order, save_sort_order};
use crate::infrastructure::error::InfraError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait PreferencesStore: Send + Sync {
    fn sort_order(&self) -> Result<SortOrder, InfraError>;
    fn set_sort_order(&self, sort_order: SortOrder) -> Result<(), InfraError>;
}

/// Preferences kept in `config/preferences.json`.
#[derive(Debug, Clone)]
pub struct JsonPreferencesStore {
    config_dir: PathBuf,
}

impl JsonPreferencesStore {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }
}

impl PreferencesStore for JsonPreferencesStore {
    fn sort_order(&self) -> Result<SortOrder, InfraError> {
        read_sort_order(&self.config_dir)
    }

    fn set_sort_order(&self, sort_order: SortOrder) -> Result<(), InfraError> {
        save_sort_order(&self.config_dir, sort_order)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPreferencesStore {
    sort_order: Mutex<SortOrder>,
}

impl InMemoryPreferencesStore {
    pub fn with_sort_order(sort_order: SortOrder) -> Self {
        Self {
            sort_order: Mutex::new(sort_order),
        }
    }
}

impl PreferencesStore for InMemoryPreferencesStore {
    fn sort_order(&self) -> Result<SortOrder, InfraError> {
        let sort_order = self
            .sort_order
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("preferences lock poisoned: {error}")))?;
        Ok(*sort_order)
    }

    fn set_sort_order(&self, sort_order: SortOrder) -> Result<(), InfraError> {
        let mut current = self
            .sort_order
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("preferences lock poisoned: {error}")))?;
        *current = sort_order;
        Ok(())
    }
}
