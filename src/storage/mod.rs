//! Audit stores
//!
//! One physical audit table per audited source table. Stores append rows in
//! atomic batches and answer the read-side queries; rows are never updated
//! or deleted.

pub mod file_io;
pub mod json_file;
pub mod sqlite;

use std::fmt;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::audit::ActionKind;
use crate::config::{AuditSettings, StorageBackend};
use crate::error::AuditResult;

pub use file_io::{read_json, write_json_atomic};
pub use json_file::JsonAuditStore;
pub use sqlite::SqliteAuditStore;

/// Text form of `created_at`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Name of an audit table, optionally schema-qualified
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuditTableName {
    pub schema: Option<String>,
    pub name: String,
}

impl AuditTableName {
    pub fn new(schema: Option<String>, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
        }
    }

    /// Split `schema.table` at the first dot
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once('.') {
            Some((schema, name)) if !schema.is_empty() => {
                Self::new(Some(schema.to_string()), name)
            }
            _ => Self::new(None, qualified),
        }
    }
}

impl fmt::Display for AuditTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Derives audit table names from source table names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNaming {
    pub prefix: String,
    pub suffix: String,
}

impl TableNaming {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn from_settings(settings: &AuditSettings) -> Self {
        Self::new(&settings.table_prefix, &settings.table_suffix)
    }

    /// `[schema.]prefix + table + suffix`
    ///
    /// A source table that is already schema-qualified keeps its schema
    /// when no explicit schema is given.
    pub fn audit_table(&self, schema: Option<&str>, source_table: &str) -> AuditTableName {
        let (schema, table) = match schema {
            Some(schema) => (Some(schema.to_string()), source_table),
            None => match source_table.split_once('.') {
                Some((schema, table)) if !schema.is_empty() => (Some(schema.to_string()), table),
                _ => (None, source_table),
            },
        };
        AuditTableName::new(schema, format!("{}{}{}", self.prefix, table, self.suffix))
    }
}

impl Default for TableNaming {
    fn default() -> Self {
        Self::from_settings(&AuditSettings::default())
    }
}

/// A persisted audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    pub id: i64,
    #[serde(rename = "type")]
    pub action: ActionKind,
    pub object_id: String,
    pub diff: Option<serde_json::Value>,
    pub changer: Option<String>,
    pub created_at: NaiveDateTime,
}

/// A row waiting to be written, with its target table
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditRow {
    pub table: AuditTableName,
    pub action: ActionKind,
    pub object_id: String,
    /// JSON text of the change payload
    pub diff: String,
    pub changer: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Filters and window of a history query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub object_id: Option<String>,
    pub action: Option<ActionKind>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    pub fn with_action(mut self, action: Option<ActionKind>) -> Self {
        self.action = action;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether a row passes the filters, ignoring the window
    pub fn matches(&self, row: &AuditRow) -> bool {
        self.object_id.as_ref().map_or(true, |id| *id == row.object_id)
            && self.action.map_or(true, |action| action == row.action)
    }
}

/// Durable storage for audit rows
pub trait AuditStore {
    /// Create an audit table if missing; returns whether it was created
    fn create_table(&mut self, table: &AuditTableName) -> AuditResult<bool>;

    fn has_table(&self, table: &AuditTableName) -> AuditResult<bool>;

    fn tables(&self) -> AuditResult<Vec<AuditTableName>>;

    /// Append rows in order, all or none; returns the new row ids
    fn insert_batch(&mut self, rows: &[NewAuditRow]) -> AuditResult<Vec<i64>>;

    /// Matching rows, newest first (`created_at DESC, id DESC`)
    fn fetch(&self, table: &AuditTableName, query: &AuditQuery) -> AuditResult<Vec<AuditRow>>;

    /// Number of matching rows, ignoring the window
    fn count(&self, table: &AuditTableName, query: &AuditQuery) -> AuditResult<usize>;

    fn fetch_by_id(
        &self,
        table: &AuditTableName,
        id: i64,
        action: Option<ActionKind>,
    ) -> AuditResult<Option<AuditRow>>;
}

/// Open the store configured in `settings` at `path`
pub fn open_store(settings: &AuditSettings, path: &Path) -> AuditResult<Box<dyn AuditStore>> {
    let store: Box<dyn AuditStore> = match settings.storage.backend {
        StorageBackend::Sqlite => Box::new(SqliteAuditStore::open(path)?),
        StorageBackend::Json => Box::new(JsonAuditStore::open(path)?),
    };
    Ok(store)
}

impl<S: AuditStore + ?Sized> AuditStore for Box<S> {
    fn create_table(&mut self, table: &AuditTableName) -> AuditResult<bool> {
        (**self).create_table(table)
    }

    fn has_table(&self, table: &AuditTableName) -> AuditResult<bool> {
        (**self).has_table(table)
    }

    fn tables(&self) -> AuditResult<Vec<AuditTableName>> {
        (**self).tables()
    }

    fn insert_batch(&mut self, rows: &[NewAuditRow]) -> AuditResult<Vec<i64>> {
        (**self).insert_batch(rows)
    }

    fn fetch(&self, table: &AuditTableName, query: &AuditQuery) -> AuditResult<Vec<AuditRow>> {
        (**self).fetch(table, query)
    }

    fn count(&self, table: &AuditTableName, query: &AuditQuery) -> AuditResult<usize> {
        (**self).count(table, query)
    }

    fn fetch_by_id(
        &self,
        table: &AuditTableName,
        id: i64,
        action: Option<ActionKind>,
    ) -> AuditResult<Option<AuditRow>> {
        (**self).fetch_by_id(table, id, action)
    }
}
