//! Capture, diff and write of audit records
//!
//! An audit cycle mirrors the host's commit cycle and runs in two phases:
//!
//! - **prepare** (`ChangeCollector`, during the host's flush): walks the
//!   pending mutations, computes field and relation diffs through the
//!   `DiffEngine`, and fills the session's pending records. No I/O.
//! - **drain** (`AuditWriter`, after the host's commit): writes one audit
//!   row per record, in order, inside one store transaction.
//!
//! `Auditor` bundles the policy, the value normalizer and the store, and
//! exposes both phases as the two host hooks.
//!
//! # Example
//!
//! ```rust,ignore
//! use audit_trail::audit::{AuditSession, Auditor};
//! use audit_trail::policy::ConfiguredPolicy;
//! use audit_trail::storage::SqliteAuditStore;
//!
//! let mut auditor = Auditor::new(ConfiguredPolicy::new(settings), SqliteAuditStore::open(&path)?);
//! let mut session = AuditSession::new();
//!
//! auditor.on_flush(&uow, &mut session)?;
//! // host commits its own transaction here
//! auditor.post_flush(&mut session, &uow)?;
//! ```

mod collector;
mod diff;
mod entry;
mod normalizer;
mod session;
mod summary;
mod value;
mod writer;

pub use collector::ChangeCollector;
pub use diff::{DiffEngine, FieldDiff, RelationDiff, ValueChange};
pub use entry::{ActionKind, Change, ChangeRecord, SubjectId};
pub use normalizer::{
    convert_big_int, convert_binary, convert_boolean, convert_decimal, convert_float,
    convert_integer, convert_storable, ValueConverter, ValueNormalizer,
};
pub use session::AuditSession;
pub use summary::{EntitySummarizer, EntitySummary};
pub use value::NormalizedValue;
pub use writer::{AuditWriter, WriteResult};

use crate::error::AuditResult;
use crate::host::{MetadataSource, UnitOfWork};
use crate::policy::AuditPolicy;
use crate::storage::{AuditStore, TableNaming};

/// Policy, normalizer and store of one audited host
pub struct Auditor<P, S> {
    policy: P,
    normalizer: ValueNormalizer,
    store: S,
    provision_tables: bool,
}

impl<P: AuditPolicy, S: AuditStore> Auditor<P, S> {
    pub fn new(policy: P, store: S) -> Self {
        Self {
            policy,
            normalizer: ValueNormalizer::new(),
            store,
            provision_tables: true,
        }
    }

    /// Replace the value normalizer, e.g. one with extra converters
    pub fn with_normalizer(mut self, normalizer: ValueNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Whether missing audit tables are created while draining
    pub fn with_table_provisioning(mut self, enabled: bool) -> Self {
        self.provision_tables = enabled;
        self
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn normalizer_mut(&mut self) -> &mut ValueNormalizer {
        &mut self.normalizer
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Prepare phase: collect the host's pending mutations
    pub fn on_flush<U>(&self, uow: &U, session: &mut AuditSession) -> AuditResult<usize>
    where
        U: UnitOfWork + ?Sized,
    {
        ChangeCollector::new(&self.policy, &self.normalizer).collect(uow, session)
    }

    /// Drain phase: write the session's records after the host commit
    pub fn post_flush<H>(&mut self, session: &mut AuditSession, host: &H) -> AuditResult<WriteResult>
    where
        H: MetadataSource + ?Sized,
    {
        let naming = TableNaming::new(self.policy.table_prefix(), self.policy.table_suffix());
        AuditWriter::new(naming, &self.normalizer)
            .provision_tables(self.provision_tables)
            .drain(session, host, &mut self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditSettings, EntitySettings};
    use crate::host::{ChangeSet, ClassMetadata, DynamicEntity, MemoryUnitOfWork, TypeKind};
    use crate::policy::ConfiguredPolicy;
    use crate::storage::{AuditQuery, AuditTableName, SqliteAuditStore};

    #[test]
    fn test_flush_cycle() {
        let mut settings = AuditSettings::default();
        settings
            .entities
            .insert("App\\User".to_string(), EntitySettings::default());
        let mut auditor = Auditor::new(
            ConfiguredPolicy::new(settings).with_actor(|| Some("alice".to_string())),
            SqliteAuditStore::in_memory().unwrap(),
        );

        let mut uow = MemoryUnitOfWork::new().with_metadata(
            ClassMetadata::new("App\\User", "users")
                .with_identifier("id")
                .with_field("id", TypeKind::Integer)
                .with_field("name", TypeKind::String),
        );
        let user = DynamicEntity::new("App\\User")
            .with("id", 1)
            .with("name", "Bob")
            .into_ref();
        uow.schedule_update(user, ChangeSet::new().with("name", "Rob", "Bob"));

        let mut session = AuditSession::new();
        assert_eq!(auditor.on_flush(&uow, &mut session).unwrap(), 1);
        let result = auditor.post_flush(&mut session, &uow).unwrap();

        assert_eq!(result.rows_written, 1);
        assert!(session.is_empty());
        let table = AuditTableName::new(None, "users_audit");
        let rows = auditor.store().fetch(&table, &AuditQuery::new()).unwrap();
        assert_eq!(rows[0].action, ActionKind::Update);
        assert_eq!(rows[0].changer.as_deref(), Some("alice"));
        assert_eq!(rows[0].diff.as_ref().unwrap()["name"]["old"], "Rob");
    }
}
