//! Audit settings
//!
//! Which classes and fields are audited, how audit tables are named, and
//! where audit rows are stored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::paths::AuditPaths;
use crate::error::AuditError;

/// Audit store implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database (default)
    #[default]
    Sqlite,
    /// Single JSON document
    Json,
}

/// Audit store settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Overrides the default store location under the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Per-class audit settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fields of this class that are never audited
    #[serde(default)]
    pub ignored_columns: Vec<String>,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ignored_columns: Vec::new(),
        }
    }
}

/// Settings for audit-trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Prepended to the source table name
    #[serde(default)]
    pub table_prefix: String,

    /// Appended to the source table name
    #[serde(default = "default_table_suffix")]
    pub table_suffix: String,

    /// Fields never audited, whatever their class
    #[serde(default)]
    pub ignored_columns: Vec<String>,

    /// Audited classes, keyed by class name
    #[serde(default)]
    pub entities: BTreeMap<String, EntitySettings>,

    #[serde(default)]
    pub storage: StorageSettings,

    /// Default page size of history listings
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_schema_version() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

fn default_table_suffix() -> String {
    "_audit".to_string()
}

fn default_page_size() -> usize {
    50
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            table_prefix: String::new(),
            table_suffix: default_table_suffix(),
            ignored_columns: Vec::new(),
            entities: BTreeMap::new(),
            storage: StorageSettings::default(),
            page_size: default_page_size(),
        }
    }
}

impl AuditSettings {
    /// Load settings from disk, or return defaults if the file doesn't exist
    pub fn load_or_create(paths: &AuditPaths) -> Result<Self, AuditError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            Self::load_from(&settings_path)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(AuditSettings::default())
        }
    }

    /// Load and validate settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self, AuditError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuditError::Io(format!("Failed to read settings file: {}", e)))?;

        let settings: AuditSettings = serde_json::from_str(&contents).map_err(|e| {
            AuditError::Configuration(format!("Failed to parse settings file: {}", e))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, paths: &AuditPaths) -> Result<(), AuditError> {
        self.validate()?;
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            AuditError::Configuration(format!("Failed to serialize settings: {}", e))
        })?;

        std::fs::write(paths.settings_file(), contents)
            .map_err(|e| AuditError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        if self.table_prefix.is_empty() && self.table_suffix.is_empty() {
            return Err(AuditError::Configuration(
                "table_prefix and table_suffix cannot both be empty".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(AuditError::Configuration(
                "page_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Whether a class is listed and enabled
    pub fn is_audited(&self, class_name: &str) -> bool {
        self.entities
            .get(class_name)
            .map(|entity| entity.enabled)
            .unwrap_or(false)
    }

    /// Whether a field of an audited class is outside both ignore lists
    pub fn is_audited_field(&self, class_name: &str, field: &str) -> bool {
        if self.ignored_columns.iter().any(|c| c == field) {
            return false;
        }
        match self.entities.get(class_name) {
            Some(entity) if entity.enabled => !entity.ignored_columns.iter().any(|c| c == field),
            _ => false,
        }
    }

    /// Store location, honoring the configured override
    pub fn storage_path(&self, paths: &AuditPaths) -> PathBuf {
        match (&self.storage.path, self.storage.backend) {
            (Some(path), _) => path.clone(),
            (None, StorageBackend::Sqlite) => paths.sqlite_file(),
            (None, StorageBackend::Json) => paths.json_store_file(),
        }
    }
}
