//! Audit table provisioning
//!
//! Decides which mapped classes get an audit table and creates the missing
//! ones in the audit store.

use tracing::{debug, info};

use crate::error::{AuditError, AuditResult};
use crate::host::{ClassMetadata, InheritanceType, MetadataSource};
use crate::policy::AuditPolicy;
use crate::storage::{AuditStore, AuditTableName, TableNaming};

/// Outcome of provisioning one audit table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTable {
    pub table: AuditTableName,
    /// False if the table already existed
    pub created: bool,
}

/// Whether a class needs its own audit table
///
/// A class qualifies when it is audited itself, or when it is the root of a
/// joined or single-table hierarchy and one of its sub-classes is audited.
/// Table-per-class hierarchies are rejected.
pub fn needs_audit_table<H, P>(host: &H, policy: &P, meta: &ClassMetadata) -> AuditResult<bool>
where
    H: MetadataSource + ?Sized,
    P: AuditPolicy + ?Sized,
{
    let audited = policy.is_audited(&meta.name) || audited_sub_class(host, policy, meta);
    if audited && meta.inheritance == InheritanceType::TablePerClass {
        return Err(AuditError::Configuration(format!(
            "Inheritance type \"{}\" of {} is not supported",
            meta.inheritance, meta.name
        )));
    }
    Ok(audited)
}

fn audited_sub_class<H, P>(host: &H, policy: &P, meta: &ClassMetadata) -> bool
where
    H: MetadataSource + ?Sized,
    P: AuditPolicy + ?Sized,
{
    let hierarchy = matches!(
        meta.inheritance,
        InheritanceType::Joined | InheritanceType::SingleTable
    );
    hierarchy
        && meta.is_root()
        && meta.sub_classes.iter().any(|sub| {
            policy.is_audited(sub)
                || host
                    .class_metadata(sub)
                    .is_some_and(|sub_meta| audited_sub_class(host, policy, sub_meta))
        })
}

/// Create the audit table of a source table if it is missing
pub fn provision_table<S>(
    store: &mut S,
    naming: &TableNaming,
    schema: Option<&str>,
    source_table: &str,
) -> AuditResult<ProvisionedTable>
where
    S: AuditStore + ?Sized,
{
    let table = naming.audit_table(schema, source_table);
    let created = store.create_table(&table)?;
    debug!(table = %table, created, "audit table provisioned");
    Ok(ProvisionedTable { table, created })
}

/// Create the audit tables of every mapped class that needs one
///
/// Classes sharing a source table (single-table hierarchies) yield one
/// entry. Returns the tables in class-name order.
pub fn provision<H, P, S>(host: &H, policy: &P, store: &mut S) -> AuditResult<Vec<ProvisionedTable>>
where
    H: MetadataSource + ?Sized,
    P: AuditPolicy + ?Sized,
    S: AuditStore + ?Sized,
{
    let naming = TableNaming::new(policy.table_prefix(), policy.table_suffix());
    let mut class_names = host.class_names();
    class_names.sort();

    let mut provisioned: Vec<ProvisionedTable> = Vec::new();
    for class_name in class_names {
        let meta = host.require_metadata(&class_name)?;
        if !needs_audit_table(host, policy, meta)? {
            continue;
        }

        let table = naming.audit_table(meta.schema_name.as_deref(), &meta.table_name);
        if provisioned.iter().any(|p| p.table == table) {
            continue;
        }
        provisioned.push(provision_table(
            store,
            &naming,
            meta.schema_name.as_deref(),
            &meta.table_name,
        )?);
    }

    let created = provisioned.iter().filter(|p| p.created).count();
    info!(tables = provisioned.len(), created, "audit schema provisioned");
    Ok(provisioned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditSettings, EntitySettings};
    use crate::host::MemoryUnitOfWork;
    use crate::policy::ConfiguredPolicy;
    use crate::storage::SqliteAuditStore;

    fn policy(audited: &[&str]) -> ConfiguredPolicy {
        let mut settings = AuditSettings::default();
        for class in audited {
            settings
                .entities
                .insert(class.to_string(), EntitySettings::default());
        }
        ConfiguredPolicy::new(settings)
    }

    fn hierarchy(inheritance: InheritanceType) -> MemoryUnitOfWork {
        let mut vehicle = ClassMetadata::new("App\\Vehicle", "vehicles")
            .with_inheritance(inheritance, &["App\\Car"]);
        vehicle.root_entity = Some("App\\Vehicle".to_string());
        let mut car = ClassMetadata::new("App\\Car", "cars").with_inheritance(inheritance, &[]);
        car.root_entity = Some("App\\Vehicle".to_string());

        MemoryUnitOfWork::new()
            .with_metadata(vehicle)
            .with_metadata(car)
            .with_metadata(ClassMetadata::new("App\\Tag", "tags"))
    }

    #[test]
    fn test_audited_class_needs_table() {
        let host = hierarchy(InheritanceType::None);
        let meta = host.class_metadata("App\\Tag").unwrap();
        assert!(needs_audit_table(&host, &policy(&["App\\Tag"]), meta).unwrap());
        assert!(!needs_audit_table(&host, &policy(&[]), meta).unwrap());
    }

    #[test]
    fn test_root_with_audited_sub_class_needs_table() {
        let host = hierarchy(InheritanceType::Joined);
        let root = host.class_metadata("App\\Vehicle").unwrap();
        assert!(needs_audit_table(&host, &policy(&["App\\Car"]), root).unwrap());

        // only hierarchies get the sub-class rule
        let flat = hierarchy(InheritanceType::None);
        let root = flat.class_metadata("App\\Vehicle").unwrap();
        assert!(!needs_audit_table(&flat, &policy(&["App\\Car"]), root).unwrap());
    }

    #[test]
    fn test_table_per_class_is_rejected() {
        let host = hierarchy(InheritanceType::TablePerClass);
        let car = host.class_metadata("App\\Car").unwrap();
        let err = needs_audit_table(&host, &policy(&["App\\Car"]), car).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_provision_creates_missing_tables_once() {
        let mut host = hierarchy(InheritanceType::Joined);
        host.register(ClassMetadata::new("App\\Invoice", "invoices").with_schema("billing"));
        let policy = policy(&["App\\Car", "App\\Invoice"]);
        let mut store = SqliteAuditStore::in_memory().unwrap();

        let first = provision(&host, &policy, &mut store).unwrap();
        let names: Vec<String> = first.iter().map(|p| p.table.to_string()).collect();
        assert_eq!(
            names,
            vec!["cars_audit", "billing.invoices_audit", "vehicles_audit"]
        );
        assert!(first.iter().all(|p| p.created));

        let second = provision(&host, &policy, &mut store).unwrap();
        assert!(second.iter().all(|p| !p.created));
    }

    #[test]
    fn test_provision_table_uses_naming() {
        let mut store = SqliteAuditStore::in_memory().unwrap();
        let naming = TableNaming::new("log_", "");
        let result = provision_table(&mut store, &naming, None, "orders").unwrap();
        assert_eq!(result.table.to_string(), "log_orders");
        assert!(store.has_table(&result.table).unwrap());
    }
}
