//! SQLite audit store
//!
//! Each audit table is a plain SQLite table. Schema-qualified names are kept
//! as a single quoted identifier (`"app.users_audit"`), since SQLite schemas
//! are attached databases rather than namespaces.

use std::path::Path;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use tracing::{debug, info};

use super::{AuditQuery, AuditRow, AuditStore, AuditTableName, NewAuditRow, TIMESTAMP_FORMAT};
use crate::audit::ActionKind;
use crate::error::{AuditError, AuditResult};

/// Indexed columns of every audit table
const INDEXED_COLUMNS: [&str; 4] = ["type", "object_id", "changer", "created_at"];

const SELECT_COLUMNS: &str = "id, type, object_id, diff, changer, created_at";

/// Audit store backed by a SQLite database
pub struct SqliteAuditStore {
    conn: Connection,
}

impl SqliteAuditStore {
    /// Open or create the database file
    pub fn open(path: &Path) -> AuditResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuditError::Io(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened sqlite audit store");
        Ok(Self { conn })
    }

    /// In-memory database (for tests)
    pub fn in_memory() -> AuditResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Dynamic WHERE clause and parameters for a query
    fn filters(query: &AuditQuery) -> (String, Vec<Box<dyn ToSql>>) {
        let mut sql = String::from(" WHERE 1=1");
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref object_id) = query.object_id {
            sql.push_str(" AND object_id = ?");
            params_vec.push(Box::new(object_id.clone()));
        }
        if let Some(action) = query.action {
            sql.push_str(" AND type = ?");
            params_vec.push(Box::new(action.code()));
        }

        (sql, params_vec)
    }
}

/// Quote an identifier for SQLite
fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// SQLite reads a negative OFFSET as zero, so large values must not wrap
fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn index_name(table: &str, column: &str) -> String {
    let sanitized: String = table
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("idx_{}_{}", sanitized, column)
}

/// Row as read back from SQLite, before decoding
struct StoredRow {
    id: i64,
    action: String,
    object_id: String,
    diff: Option<String>,
    changer: Option<String>,
    created_at: String,
}

impl StoredRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            action: row.get(1)?,
            object_id: row.get(2)?,
            diff: row.get(3)?,
            changer: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> AuditResult<AuditRow> {
        let created_at = NaiveDateTime::parse_from_str(&self.created_at, TIMESTAMP_FORMAT)
            .map_err(|e| {
                AuditError::Storage(format!(
                    "Invalid created_at '{}' in row {}: {}",
                    self.created_at, self.id, e
                ))
            })?;
        Ok(AuditRow {
            id: self.id,
            action: self.action.parse()?,
            object_id: self.object_id,
            diff: self.diff.map(|d| serde_json::from_str(&d)).transpose()?,
            changer: self.changer,
            created_at,
        })
    }
}

impl AuditStore for SqliteAuditStore {
    fn create_table(&mut self, table: &AuditTableName) -> AuditResult<bool> {
        if self.has_table(table)? {
            return Ok(false);
        }

        let name = table.to_string();
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type VARCHAR(10) NOT NULL,
                object_id VARCHAR(255) NOT NULL,
                diff TEXT DEFAULT NULL,
                changer VARCHAR(255) DEFAULT NULL,
                created_at DATETIME NOT NULL
            );",
            quote(&name)
        );
        for column in INDEXED_COLUMNS {
            ddl.push_str(&format!(
                "\nCREATE INDEX IF NOT EXISTS {} ON {} ({});",
                quote(&index_name(&name, column)),
                quote(&name),
                column
            ));
        }
        self.conn.execute_batch(&ddl)?;

        info!(table = %name, "audit table created");
        Ok(true)
    }

    fn has_table(&self, table: &AuditTableName) -> AuditResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn tables(&self) -> AuditResult<Vec<AuditTableName>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names.iter().map(|name| AuditTableName::parse(name)).collect())
    }

    fn insert_batch(&mut self, rows: &[NewAuditRow]) -> AuditResult<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(rows.len());

        for row in rows {
            let sql = format!(
                "INSERT INTO {} (type, object_id, diff, changer, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                quote(&row.table.to_string())
            );
            tx.execute(
                &sql,
                params![
                    row.action.code(),
                    row.object_id,
                    row.diff,
                    row.changer,
                    row.created_at.format(TIMESTAMP_FORMAT).to_string(),
                ],
            )?;
            let id = tx.last_insert_rowid();
            debug!(table = %row.table, id, action = %row.action, "audit row inserted");
            ids.push(id);
        }

        // dropping an uncommitted transaction rolls it back
        tx.commit()?;
        Ok(ids)
    }

    fn fetch(&self, table: &AuditTableName, query: &AuditQuery) -> AuditResult<Vec<AuditRow>> {
        let (filters, mut params_vec) = Self::filters(query);
        let mut sql = format!(
            "SELECT {} FROM {}{} ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS,
            quote(&table.to_string()),
            filters
        );

        if query.limit.is_some() || query.offset > 0 {
            sql.push_str(" LIMIT ? OFFSET ?");
            let limit = query.limit.map_or(-1, saturating_i64);
            params_vec.push(Box::new(limit));
            params_vec.push(Box::new(saturating_i64(query.offset)));
        }

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let stored = stmt
            .query_map(params_refs.as_slice(), StoredRow::from_row)?
            .collect::<rusqlite::Result<Vec<StoredRow>>>()?;

        stored.into_iter().map(StoredRow::decode).collect()
    }

    fn count(&self, table: &AuditTableName, query: &AuditQuery) -> AuditResult<usize> {
        let (filters, params_vec) = Self::filters(query);
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            quote(&table.to_string()),
            filters
        );
        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let count: i64 = self
            .conn
            .query_row(&sql, params_refs.as_slice(), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn fetch_by_id(
        &self,
        table: &AuditTableName,
        id: i64,
        action: Option<ActionKind>,
    ) -> AuditResult<Option<AuditRow>> {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            SELECT_COLUMNS,
            quote(&table.to_string())
        );
        if action.is_some() {
            sql.push_str(" AND type = ?2");
        }

        let stored = match action {
            Some(action) => self
                .conn
                .query_row(&sql, params![id, action.code()], StoredRow::from_row)
                .optional()?,
            None => self
                .conn
                .query_row(&sql, params![id], StoredRow::from_row)
                .optional()?,
        };

        stored.map(StoredRow::decode).transpose()
    }
}
