//! Read side of the audit trail
//!
//! Paginated, newest-first access to audit rows, addressed either by
//! audited class (through the host's metadata) or by audit table name.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::audit::ActionKind;
use crate::error::{AuditError, AuditResult};
use crate::host::MetadataSource;
use crate::policy::AuditPolicy;
use crate::storage::{AuditQuery, AuditRow, AuditStore, AuditTableName, TableNaming};

/// Default number of rows per page
pub const PAGE_SIZE: usize = 50;

/// One page of audit history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditPage {
    pub rows: Vec<AuditRow>,
    pub page: usize,
    pub page_size: usize,
    /// Matching rows over all pages
    pub total: usize,
}

impl AuditPage {
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// An audited class with its audit table and row count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditedEntity {
    pub table: AuditTableName,
    pub audits_count: usize,
}

/// Queries audit rows from a store
pub struct AuditReader<'a, S: AuditStore + ?Sized> {
    store: &'a S,
    naming: TableNaming,
    filter: Option<ActionKind>,
}

impl<'a, S: AuditStore + ?Sized> AuditReader<'a, S> {
    pub fn new(store: &'a S, naming: TableNaming) -> Self {
        Self {
            store,
            naming,
            filter: None,
        }
    }

    /// Restrict every query to one action kind (`None` clears it)
    pub fn filter_by(mut self, action: Option<ActionKind>) -> Self {
        self.filter = action;
        self
    }

    pub fn filter(&self) -> Option<ActionKind> {
        self.filter
    }

    /// Audit table of a mapped class
    pub fn table_for<H>(&self, host: &H, class_name: &str) -> AuditResult<AuditTableName>
    where
        H: MetadataSource + ?Sized,
    {
        let meta = host.require_metadata(class_name)?;
        Ok(self
            .naming
            .audit_table(meta.schema_name.as_deref(), &meta.table_name))
    }

    /// One page of a class's history, optionally for a single subject
    pub fn audits<H>(
        &self,
        host: &H,
        class_name: &str,
        object_id: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> AuditResult<Vec<AuditRow>>
    where
        H: MetadataSource + ?Sized,
    {
        let table = self.table_for(host, class_name)?;
        self.table_audits(&table, object_id, page, page_size)
    }

    /// Like `audits`, with the total count for paging
    pub fn audits_pager<H>(
        &self,
        host: &H,
        class_name: &str,
        object_id: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> AuditResult<AuditPage>
    where
        H: MetadataSource + ?Sized,
    {
        let table = self.table_for(host, class_name)?;
        self.table_pager(&table, object_id, page, page_size)
    }

    pub fn audits_count<H>(
        &self,
        host: &H,
        class_name: &str,
        object_id: Option<&str>,
    ) -> AuditResult<usize>
    where
        H: MetadataSource + ?Sized,
    {
        let table = self.table_for(host, class_name)?;
        self.table_count(&table, object_id)
    }

    /// A single row of a class's audit table, honoring the action filter
    pub fn audit<H>(&self, host: &H, class_name: &str, row_id: i64) -> AuditResult<Option<AuditRow>>
    where
        H: MetadataSource + ?Sized,
    {
        let table = self.table_for(host, class_name)?;
        self.table_audit(&table, row_id)
    }

    /// Audited classes with their audit table and row count, by class name
    ///
    /// A class whose audit table was never created counts zero rows.
    pub fn audited_entities<H, P>(
        &self,
        host: &H,
        policy: &P,
    ) -> AuditResult<BTreeMap<String, AuditedEntity>>
    where
        H: MetadataSource + ?Sized,
        P: AuditPolicy + ?Sized,
    {
        let mut entities = BTreeMap::new();
        for class_name in host.class_names() {
            if !policy.is_audited(&class_name) {
                continue;
            }
            let table = self.table_for(host, &class_name)?;
            let audits_count = if self.store.has_table(&table)? {
                self.store.count(&table, &self.query(None))?
            } else {
                0
            };
            entities.insert(
                class_name,
                AuditedEntity {
                    table,
                    audits_count,
                },
            );
        }
        Ok(entities)
    }

    pub fn table_audits(
        &self,
        table: &AuditTableName,
        object_id: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> AuditResult<Vec<AuditRow>> {
        let offset = window_offset(page, page_size)?;
        self.require_table(table)?;
        let query = self
            .query(object_id)
            .with_limit(page_size)
            .with_offset(offset);
        self.store.fetch(table, &query)
    }

    pub fn table_pager(
        &self,
        table: &AuditTableName,
        object_id: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> AuditResult<AuditPage> {
        let rows = self.table_audits(table, object_id, page, page_size)?;
        let total = self.store.count(table, &self.query(object_id))?;
        Ok(AuditPage {
            rows,
            page,
            page_size,
            total,
        })
    }

    pub fn table_count(&self, table: &AuditTableName, object_id: Option<&str>) -> AuditResult<usize> {
        self.require_table(table)?;
        self.store.count(table, &self.query(object_id))
    }

    pub fn table_audit(&self, table: &AuditTableName, row_id: i64) -> AuditResult<Option<AuditRow>> {
        self.require_table(table)?;
        self.store.fetch_by_id(table, row_id, self.filter)
    }

    fn query(&self, object_id: Option<&str>) -> AuditQuery {
        let query = AuditQuery::new().with_action(self.filter);
        match object_id {
            Some(id) => query.with_object_id(id),
            None => query,
        }
    }

    fn require_table(&self, table: &AuditTableName) -> AuditResult<()> {
        if self.store.has_table(table)? {
            Ok(())
        } else {
            Err(AuditError::Validation(format!(
                "Audit table '{}' does not exist",
                table
            )))
        }
    }
}

/// Row offset of a page, rejecting windows that cannot be addressed
fn window_offset(page: usize, page_size: usize) -> AuditResult<usize> {
    if page < 1 {
        return Err(AuditError::Validation(
            "Page number has to be an integer greater than or equal to 1".into(),
        ));
    }
    if page_size < 1 {
        return Err(AuditError::Validation(
            "Page size has to be an integer greater than or equal to 1".into(),
        ));
    }
    (page - 1)
        .checked_mul(page_size)
        .ok_or_else(|| AuditError::Validation(format!("Page {} is out of range", page)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditSettings, EntitySettings};
    use crate::host::{ClassMetadata, MemoryUnitOfWork};
    use crate::policy::ConfiguredPolicy;
    use crate::storage::{NewAuditRow, SqliteAuditStore, TIMESTAMP_FORMAT};
    use chrono::NaiveDateTime;

    fn host() -> MemoryUnitOfWork {
        MemoryUnitOfWork::new()
            .with_metadata(ClassMetadata::new("App\\User", "users"))
            .with_metadata(ClassMetadata::new("App\\Group", "groups"))
            .with_metadata(ClassMetadata::new("App\\Tag", "tags"))
    }

    fn row(action: ActionKind, object_id: &str, at: &str) -> NewAuditRow {
        NewAuditRow {
            table: AuditTableName::new(None, "users_audit"),
            action,
            object_id: object_id.to_string(),
            diff: "{}".to_string(),
            changer: None,
            created_at: NaiveDateTime::parse_from_str(at, TIMESTAMP_FORMAT).unwrap(),
        }
    }

    /// Five user rows: ids 1..=5, one per day, user 1 except row 4
    fn seeded_store() -> SqliteAuditStore {
        let mut store = SqliteAuditStore::in_memory().unwrap();
        store
            .create_table(&AuditTableName::new(None, "users_audit"))
            .unwrap();
        store
            .insert_batch(&[
                row(ActionKind::Insert, "1", "2024-03-01 09:00:00"),
                row(ActionKind::Update, "1", "2024-03-02 09:00:00"),
                row(ActionKind::Update, "1", "2024-03-03 09:00:00"),
                row(ActionKind::Insert, "2", "2024-03-04 09:00:00"),
                row(ActionKind::Delete, "1", "2024-03-05 09:00:00"),
            ])
            .unwrap();
        store
    }

    fn ids(rows: &[AuditRow]) -> Vec<i64> {
        rows.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_history_is_newest_first_and_paginated() {
        let store = seeded_store();
        let reader = AuditReader::new(&store, TableNaming::default());

        let first = reader.audits(&host(), "App\\User", None, 1, 2).unwrap();
        assert_eq!(ids(&first), vec![5, 4]);
        let third = reader.audits(&host(), "App\\User", None, 3, 2).unwrap();
        assert_eq!(ids(&third), vec![1]);
    }

    #[test]
    fn test_subject_and_type_filters() {
        let store = seeded_store();
        let reader =
            AuditReader::new(&store, TableNaming::default()).filter_by(Some(ActionKind::Update));

        let rows = reader
            .audits(&host(), "App\\User", Some("1"), 1, PAGE_SIZE)
            .unwrap();
        assert_eq!(ids(&rows), vec![3, 2]);
        assert_eq!(reader.audits_count(&host(), "App\\User", Some("2")).unwrap(), 0);

        // a row of another type is hidden by the filter
        assert!(reader.audit(&host(), "App\\User", 5).unwrap().is_none());
        assert!(reader.audit(&host(), "App\\User", 2).unwrap().is_some());
    }

    #[test]
    fn test_pager_totals() {
        let store = seeded_store();
        let reader = AuditReader::new(&store, TableNaming::default());
        let page = reader
            .audits_pager(&host(), "App\\User", Some("1"), 1, 3)
            .unwrap();

        assert_eq!(page.total, 4);
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.total_pages(), 2);
        assert!(page.has_next());
        assert!(!page.has_previous());
    }

    #[test]
    fn test_invalid_window_is_rejected() {
        let store = seeded_store();
        let reader = AuditReader::new(&store, TableNaming::default());
        let err = reader.audits(&host(), "App\\User", None, 0, 10).unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));
        let err = reader.audits(&host(), "App\\User", None, 1, 0).unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));
    }

    #[test]
    fn test_out_of_range_page_is_rejected() {
        let store = seeded_store();
        let reader = AuditReader::new(&store, TableNaming::default());
        let table = AuditTableName::new(None, "users_audit");

        let err = reader.table_audits(&table, None, usize::MAX, 50).unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));
        let err = reader.table_pager(&table, None, usize::MAX, 2).unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));

        // a far page that still fits is just empty
        let rows = reader.table_audits(&table, None, 1_000, 50).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_missing_table_and_unknown_class() {
        let store = seeded_store();
        let reader = AuditReader::new(&store, TableNaming::default());
        let err = reader.audits(&host(), "App\\Group", None, 1, 10).unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));
        let err = reader.audits(&host(), "App\\Nope", None, 1, 10).unwrap_err();
        assert!(matches!(err, AuditError::Metadata { .. }));
    }

    #[test]
    fn test_audited_entities() {
        let store = seeded_store();
        let mut settings = AuditSettings::default();
        for class in ["App\\User", "App\\Group"] {
            settings
                .entities
                .insert(class.to_string(), EntitySettings::default());
        }
        let policy = ConfiguredPolicy::new(settings);
        let reader = AuditReader::new(&store, TableNaming::default());

        let entities = reader.audited_entities(&host(), &policy).unwrap();
        let classes: Vec<&String> = entities.keys().collect();
        assert_eq!(classes, vec!["App\\Group", "App\\User"]);
        assert_eq!(entities["App\\User"].audits_count, 5);
        assert_eq!(entities["App\\User"].table.to_string(), "users_audit");
        assert_eq!(entities["App\\Group"].audits_count, 0);
    }
}
