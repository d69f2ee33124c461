//! JSON-file audit store
//!
//! All audit tables live in one JSON document. Every batch rewrites the
//! document atomically, so a batch is either fully on disk or not at all.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::file_io::{read_json, write_json_atomic};
use super::{AuditQuery, AuditRow, AuditStore, AuditTableName, NewAuditRow};
use crate::audit::ActionKind;
use crate::error::{AuditError, AuditResult};

/// One audit table and its id sequence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TableData {
    #[serde(default)]
    last_id: i64,
    #[serde(default)]
    rows: Vec<AuditRow>,
}

/// Serializable container for the whole store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    tables: BTreeMap<String, TableData>,
}

/// Audit store backed by a single JSON document
pub struct JsonAuditStore {
    path: PathBuf,
    data: StoreData,
}

impl JsonAuditStore {
    /// Load the document, or start empty if it doesn't exist yet
    pub fn open(path: &Path) -> AuditResult<Self> {
        let data: StoreData = read_json(path)?;
        debug!(path = %path.display(), tables = data.tables.len(), "opened json audit store");
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self, table: &AuditTableName) -> AuditResult<&TableData> {
        self.data
            .tables
            .get(&table.to_string())
            .ok_or_else(|| AuditError::Storage(format!("No such audit table: {}", table)))
    }

    /// Matching rows of a table, newest first
    fn sorted_matches(&self, table: &AuditTableName, query: &AuditQuery) -> AuditResult<Vec<&AuditRow>> {
        let mut rows: Vec<&AuditRow> = self
            .table(table)?
            .rows
            .iter()
            .filter(|row| query.matches(row))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }
}

impl AuditStore for JsonAuditStore {
    fn create_table(&mut self, table: &AuditTableName) -> AuditResult<bool> {
        let key = table.to_string();
        if self.data.tables.contains_key(&key) {
            return Ok(false);
        }

        let mut next = self.data.clone();
        next.tables.insert(key, TableData::default());
        write_json_atomic(&self.path, &next)?;
        self.data = next;
        Ok(true)
    }

    fn has_table(&self, table: &AuditTableName) -> AuditResult<bool> {
        Ok(self.data.tables.contains_key(&table.to_string()))
    }

    fn tables(&self) -> AuditResult<Vec<AuditTableName>> {
        Ok(self
            .data
            .tables
            .keys()
            .map(|key| AuditTableName::parse(key))
            .collect())
    }

    fn insert_batch(&mut self, rows: &[NewAuditRow]) -> AuditResult<Vec<i64>> {
        // Work on a copy; only a fully applied batch replaces the document
        let mut next = self.data.clone();
        let mut ids = Vec::with_capacity(rows.len());

        for row in rows {
            let diff: serde_json::Value = serde_json::from_str(&row.diff)
                .map_err(|e| AuditError::Persistence(format!("Invalid diff payload: {}", e)))?;
            let table = next.tables.get_mut(&row.table.to_string()).ok_or_else(|| {
                AuditError::Persistence(format!("No such audit table: {}", row.table))
            })?;

            table.last_id += 1;
            table.rows.push(AuditRow {
                id: table.last_id,
                action: row.action,
                object_id: row.object_id.clone(),
                diff: Some(diff),
                changer: row.changer.clone(),
                created_at: row.created_at,
            });
            ids.push(table.last_id);
        }

        write_json_atomic(&self.path, &next)
            .map_err(|e| AuditError::Persistence(e.to_string()))?;
        self.data = next;
        Ok(ids)
    }

    fn fetch(&self, table: &AuditTableName, query: &AuditQuery) -> AuditResult<Vec<AuditRow>> {
        let rows = self.sorted_matches(table, query)?;
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn count(&self, table: &AuditTableName, query: &AuditQuery) -> AuditResult<usize> {
        Ok(self.sorted_matches(table, query)?.len())
    }

    fn fetch_by_id(
        &self,
        table: &AuditTableName,
        id: i64,
        action: Option<ActionKind>,
    ) -> AuditResult<Option<AuditRow>> {
        Ok(self
            .table(table)?
            .rows
            .iter()
            .find(|row| row.id == id && action.map_or(true, |a| a == row.action))
            .cloned())
    }
}
