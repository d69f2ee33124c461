//! Audit writer for the drain phase
//!
//! Turns the records of a session into audit rows and hands them to the
//! store as one atomic batch, after the host has committed its own changes.

use chrono::{SubsecRound, Utc};
use tracing::{info, warn};

use super::entry::{ChangeRecord, SubjectId};
use super::normalizer::ValueNormalizer;
use super::session::AuditSession;
use super::summary::EntitySummarizer;
use crate::error::{AuditError, AuditResult};
use crate::host::MetadataSource;
use crate::storage::{AuditStore, AuditTableName, NewAuditRow, TableNaming};

/// Outcome of one drain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    pub rows_written: usize,
    /// Ids of the new rows, in write order
    pub row_ids: Vec<i64>,
    /// Distinct audit tables written to, in first-use order
    pub tables: Vec<AuditTableName>,
}

/// Writes pending change records to an audit store
#[derive(Debug)]
pub struct AuditWriter<'a> {
    naming: TableNaming,
    normalizer: &'a ValueNormalizer,
    provision_tables: bool,
}

impl<'a> AuditWriter<'a> {
    pub fn new(naming: TableNaming, normalizer: &'a ValueNormalizer) -> Self {
        Self {
            naming,
            normalizer,
            provision_tables: true,
        }
    }

    /// Whether missing audit tables are created before writing (default: on)
    pub fn provision_tables(mut self, enabled: bool) -> Self {
        self.provision_tables = enabled;
        self
    }

    /// Write every pending record in order, all or nothing
    ///
    /// On success the session is cleared. On failure it is left as is and
    /// nothing from this drain is visible in the store; the host's own,
    /// already committed changes are not rolled back.
    pub fn drain<H, S>(
        &self,
        session: &mut AuditSession,
        host: &H,
        store: &mut S,
    ) -> AuditResult<WriteResult>
    where
        H: MetadataSource + ?Sized,
        S: AuditStore + ?Sized,
    {
        if session.is_empty() {
            return Ok(WriteResult::default());
        }

        let result = self
            .build_rows(session.records(), host)
            .and_then(|rows| self.write(rows, store));

        match result {
            Ok(result) => {
                session.clear();
                let tables: Vec<String> = result.tables.iter().map(ToString::to_string).collect();
                info!(rows = result.rows_written, tables = ?tables, "audit rows written");
                Ok(result)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    pending = session.len(),
                    "audit drain failed; committed changes of this cycle have no audit rows"
                );
                Err(err)
            }
        }
    }

    /// Audit table of a record: `[schema.]prefix + table + suffix`
    pub fn audit_table(&self, record: &ChangeRecord) -> AuditTableName {
        self.naming
            .audit_table(record.schema_name.as_deref(), &record.table_name)
    }

    fn build_rows<H>(&self, records: &[ChangeRecord], host: &H) -> AuditResult<Vec<NewAuditRow>>
    where
        H: MetadataSource + ?Sized,
    {
        // one timestamp per drain
        let created_at = Utc::now().naive_utc().trunc_subsecs(0);

        records
            .iter()
            .map(|record| {
                Ok(NewAuditRow {
                    table: self.audit_table(record),
                    action: record.action(),
                    object_id: self.object_id(&record.subject, host)?,
                    diff: record.change.to_json()?,
                    changer: record.actor.clone(),
                    created_at,
                })
            })
            .collect()
    }

    /// Stringified subject identity, resolving deferred keys now
    fn object_id<H>(&self, subject: &SubjectId, host: &H) -> AuditResult<String>
    where
        H: MetadataSource + ?Sized,
    {
        match subject {
            SubjectId::Assigned(id) => Ok(id.to_string()),
            SubjectId::Deferred(entity) => {
                let id = EntitySummarizer::new(self.normalizer).identity(host, entity)?;
                if id.is_null() {
                    return Err(AuditError::identity(
                        entity.class_name(),
                        "primary key still unassigned after commit",
                    ));
                }
                Ok(id.to_string())
            }
        }
    }

    fn write<S>(&self, rows: Vec<NewAuditRow>, store: &mut S) -> AuditResult<WriteResult>
    where
        S: AuditStore + ?Sized,
    {
        let mut tables: Vec<AuditTableName> = Vec::new();
        for row in &rows {
            if !tables.contains(&row.table) {
                tables.push(row.table.clone());
            }
        }

        if self.provision_tables {
            for table in &tables {
                store.create_table(table)?;
            }
        }

        let row_ids = store.insert_batch(&rows)?;
        Ok(WriteResult {
            rows_written: row_ids.len(),
            row_ids,
            tables,
        })
    }
}
