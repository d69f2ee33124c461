//! Prepare and drain against the in-memory host and a SQLite store

use std::rc::Rc;

use audit_trail::audit::{ActionKind, AuditSession, Auditor};
use audit_trail::config::{AuditSettings, EntitySettings};
use audit_trail::host::{
    AssociationKind, ChangeSet, ClassMetadata, DynamicEntity, EntityRef, MemoryUnitOfWork,
    PersistentCollection, TypeKind,
};
use audit_trail::policy::ConfiguredPolicy;
use audit_trail::reader::AuditReader;
use audit_trail::schema::provision;
use audit_trail::storage::{AuditRow, AuditStore, AuditTableName, SqliteAuditStore, TableNaming};
use serde_json::json;

fn settings() -> AuditSettings {
    let mut settings = AuditSettings::default();
    settings.ignored_columns.push("updated_at".to_string());
    for class in ["App\\User", "App\\Group"] {
        settings
            .entities
            .insert(class.to_string(), EntitySettings::default());
    }
    settings
}

fn host() -> MemoryUnitOfWork {
    MemoryUnitOfWork::new()
        .with_metadata(
            ClassMetadata::new("App\\User", "users")
                .with_identifier("id")
                .with_field("id", TypeKind::Integer)
                .with_field("name", TypeKind::String)
                .with_field("updated_at", TypeKind::DateTime)
                .with_many_to_many("groups", "App\\Group", "user_groups")
                .with_association("manager", "App\\User", AssociationKind::ManyToOne),
        )
        .with_metadata(
            ClassMetadata::new("App\\Group", "groups")
                .with_identifier("id")
                .with_field("id", TypeKind::Integer)
                .with_field("name", TypeKind::String),
        )
}

fn auditor(store: SqliteAuditStore) -> Auditor<ConfiguredPolicy, SqliteAuditStore> {
    Auditor::new(
        ConfiguredPolicy::new(settings()).with_actor(|| Some("admin".to_string())),
        store,
    )
}

fn group(id: i64, name: &str) -> EntityRef {
    DynamicEntity::new("App\\Group")
        .with("id", id)
        .with("name", name)
        .with_label_field("name")
        .into_ref()
}

/// Rows of an audit table in write order
fn rows(store: &SqliteAuditStore, table: &str) -> Vec<AuditRow> {
    let reader = AuditReader::new(store, TableNaming::default());
    let mut rows = reader
        .table_audits(&AuditTableName::parse(table), None, 1, 100)
        .unwrap();
    rows.sort_by_key(|r| r.id);
    rows
}

#[test]
fn test_insert_then_association_resolves_generated_id() {
    let mut uow = host();
    let user = Rc::new(
        DynamicEntity::new("App\\User")
            .with("name", "Alice")
            .with_label_field("name"),
    );
    let user_ref: EntityRef = user.clone();
    uow.schedule_insert(
        user_ref.clone(),
        ChangeSet::new().with("name", None::<String>, "Alice"),
    );
    uow.schedule_collection_update(
        PersistentCollection::new(user_ref, "groups").with_inserted(vec![group(2, "Admins")]),
    );

    let mut auditor = auditor(SqliteAuditStore::in_memory().unwrap());
    let mut session = AuditSession::new();
    assert_eq!(auditor.on_flush(&uow, &mut session).unwrap(), 2);

    // host commit assigns the generated key
    user.set("id", 10);
    let result = auditor.post_flush(&mut session, &uow).unwrap();
    assert_eq!(result.rows_written, 2);

    let rows = rows(auditor.store(), "users_audit");
    assert_eq!(rows[0].action, ActionKind::Insert);
    assert_eq!(rows[0].object_id, "10");
    assert_eq!(rows[0].diff, Some(json!({"name": {"old": null, "new": "Alice"}})));
    assert_eq!(rows[1].action, ActionKind::Associate);
    assert_eq!(rows[1].object_id, "10");

    let diff = rows[1].diff.as_ref().unwrap();
    assert_eq!(diff["source"]["label"], "Alice");
    assert_eq!(diff["target"]["label"], "Admins");
    assert_eq!(diff["target"]["id"], 2);
    assert_eq!(diff["table"], "user_groups");
}

#[test]
fn test_update_and_delete_across_tables() {
    let mut uow = host();
    let bob = DynamicEntity::new("App\\User")
        .with("id", 1)
        .with("name", "Bob")
        .into_ref();
    uow.schedule_update(
        bob,
        ChangeSet::new()
            .with("name", "Rob", "Bob")
            .with("updated_at", None::<String>, "2024-03-01"),
    );
    uow.schedule_delete(group(3, "Guests"));

    let mut auditor = auditor(SqliteAuditStore::in_memory().unwrap());
    let mut session = AuditSession::new();
    auditor.on_flush(&uow, &mut session).unwrap();
    let result = auditor.post_flush(&mut session, &uow).unwrap();

    assert_eq!(
        result.tables,
        vec![
            AuditTableName::new(None, "users_audit"),
            AuditTableName::new(None, "groups_audit")
        ]
    );

    let users = rows(auditor.store(), "users_audit");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].diff, Some(json!({"name": {"old": "Rob", "new": "Bob"}})));
    assert_eq!(users[0].changer.as_deref(), Some("admin"));

    let groups = rows(auditor.store(), "groups_audit");
    assert_eq!(groups[0].action, ActionKind::Delete);
    assert_eq!(
        groups[0].diff,
        Some(json!({
            "id": {"old": 3, "new": null},
            "name": {"old": "Guests", "new": null}
        }))
    );
}

#[test]
fn test_failed_drain_writes_nothing_and_keeps_session() {
    let mut uow = host();
    uow.schedule_update(
        DynamicEntity::new("App\\User")
            .with("id", 1)
            .with("name", "Bob")
            .into_ref(),
        ChangeSet::new().with("name", "Rob", "Bob"),
    );
    uow.schedule_delete(group(3, "Guests"));

    let mut store = SqliteAuditStore::in_memory().unwrap();
    store
        .create_table(&AuditTableName::new(None, "users_audit"))
        .unwrap();
    let mut auditor = auditor(store).with_table_provisioning(false);

    let mut session = AuditSession::new();
    auditor.on_flush(&uow, &mut session).unwrap();
    let err = auditor.post_flush(&mut session, &uow).unwrap_err();

    assert!(err.is_persistence());
    assert_eq!(session.len(), 2);
    assert!(rows(auditor.store(), "users_audit").is_empty());
}

#[test]
fn test_relation_changes_are_symmetric() {
    let mut uow = host();
    let user = DynamicEntity::new("App\\User").with("id", 1).into_ref();
    let admins = group(2, "Admins");
    uow.schedule_collection_update(
        PersistentCollection::new(user.clone(), "groups").with_deleted(vec![admins.clone()]),
    );
    uow.schedule_collection_update(
        PersistentCollection::new(user, "groups").with_inserted(vec![admins]),
    );

    let mut auditor = auditor(SqliteAuditStore::in_memory().unwrap());
    let mut session = AuditSession::new();
    auditor.on_flush(&uow, &mut session).unwrap();
    auditor.post_flush(&mut session, &uow).unwrap();

    let rows = rows(auditor.store(), "users_audit");
    assert_eq!(rows[0].action, ActionKind::Dissociate);
    assert_eq!(rows[1].action, ActionKind::Associate);
    assert_eq!(rows[0].diff, rows[1].diff);
}

#[test]
fn test_provisioned_schema_and_reader_listing() {
    let uow = host();
    let policy = ConfiguredPolicy::new(settings());
    let mut store = SqliteAuditStore::in_memory().unwrap();

    let tables = provision(&uow, &policy, &mut store).unwrap();
    assert_eq!(tables.len(), 2);

    let reader = AuditReader::new(&store, TableNaming::default());
    let entities = reader.audited_entities(&uow, &policy).unwrap();
    assert_eq!(entities["App\\Group"].table.to_string(), "groups_audit");
    assert_eq!(entities["App\\User"].audits_count, 0);
}
