//! Change collection for the prepare phase
//!
//! Walks the host's pending mutations in a fixed order and turns each
//! audited one into a `ChangeRecord`:
//!
//! 1. updates
//! 2. insertions
//! 3. deletions
//! 4. relation-collection deletions
//! 5. relation-collection updates
//!
//! Records of one pass are built locally and only appended to the session
//! once the whole pass succeeded.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::diff::{DiffEngine, RelationDiff};
use super::entry::{Change, ChangeRecord, SubjectId};
use super::normalizer::ValueNormalizer;
use super::session::AuditSession;
use super::summary::EntitySummarizer;
use crate::error::{AuditError, AuditResult};
use crate::host::{ClassMetadata, EntityRef, PersistentCollection, UnitOfWork};
use crate::policy::AuditPolicy;

/// Values shared by every record of one collect pass
struct Cycle {
    actor: Option<String>,
    captured_at: DateTime<Utc>,
}

/// Collects pending mutations into change records
pub struct ChangeCollector<'a, P: AuditPolicy + ?Sized> {
    policy: &'a P,
    normalizer: &'a ValueNormalizer,
}

impl<'a, P: AuditPolicy + ?Sized> ChangeCollector<'a, P> {
    pub fn new(policy: &'a P, normalizer: &'a ValueNormalizer) -> Self {
        Self { policy, normalizer }
    }

    /// Collect the pending mutations of one cycle into `session`
    ///
    /// Returns the number of records added. On error the session is
    /// discarded: a cycle is either captured completely or not at all.
    pub fn collect<U>(&self, uow: &U, session: &mut AuditSession) -> AuditResult<usize>
    where
        U: UnitOfWork + ?Sized,
    {
        let cycle = Cycle {
            actor: self.policy.current_actor(),
            captured_at: Utc::now(),
        };

        let mut records = Vec::new();
        match self.collect_all(uow, &cycle, &mut records) {
            Ok(()) => {
                let count = records.len();
                session.extend(records);
                debug!(records = count, pending = session.len(), "collected audit records");
                Ok(count)
            }
            Err(err) => {
                let discarded = session.discard() + records.len();
                warn!(error = %err, discarded, "audit prepare phase failed, cycle discarded");
                Err(err)
            }
        }
    }

    fn collect_all<U>(&self, uow: &U, cycle: &Cycle, out: &mut Vec<ChangeRecord>) -> AuditResult<()>
    where
        U: UnitOfWork + ?Sized,
    {
        self.collect_updates(uow, cycle, out)?;
        self.collect_insertions(uow, cycle, out)?;
        self.collect_deletions(uow, cycle, out)?;
        self.collect_collection_deletions(uow, cycle, out)?;
        self.collect_collection_updates(uow, cycle, out)
    }

    fn collect_updates<U>(&self, uow: &U, cycle: &Cycle, out: &mut Vec<ChangeRecord>) -> AuditResult<()>
    where
        U: UnitOfWork + ?Sized,
    {
        for entity in uow.scheduled_entity_updates() {
            if !self.policy.is_audited(entity.class_name()) {
                continue;
            }
            let meta = uow.require_metadata(entity.class_name())?;
            let diff = self.diff_engine().diff(uow, meta, &uow.entity_change_set(&entity))?;
            if diff.is_empty() {
                debug!(class = %meta.name, "update without audited changes skipped");
                continue;
            }
            let subject = self.required_subject(uow, &entity)?;
            out.push(self.record(meta, subject, Change::Update(diff), cycle));
        }
        Ok(())
    }

    fn collect_insertions<U>(&self, uow: &U, cycle: &Cycle, out: &mut Vec<ChangeRecord>) -> AuditResult<()>
    where
        U: UnitOfWork + ?Sized,
    {
        for entity in uow.scheduled_entity_insertions() {
            if !self.policy.is_audited(entity.class_name()) {
                continue;
            }
            let meta = uow.require_metadata(entity.class_name())?;
            let diff = self.diff_engine().diff(uow, meta, &uow.entity_change_set(&entity))?;
            let subject = self.subject(uow, &entity)?;
            out.push(self.record(meta, subject, Change::Insert(diff), cycle));
        }
        Ok(())
    }

    fn collect_deletions<U>(&self, uow: &U, cycle: &Cycle, out: &mut Vec<ChangeRecord>) -> AuditResult<()>
    where
        U: UnitOfWork + ?Sized,
    {
        for entity in uow.scheduled_entity_deletions() {
            if !self.policy.is_audited(entity.class_name()) {
                continue;
            }
            uow.materialize(&entity)?;
            let meta = uow.require_metadata(entity.class_name())?;
            let subject = self.required_subject(uow, &entity)?;
            let diff = self.diff_engine().snapshot(uow, meta, &entity)?;
            out.push(self.record(meta, subject, Change::Delete(diff), cycle));
        }
        Ok(())
    }

    /// Every remaining element of a deleted collection is dissociated
    fn collect_collection_deletions<U>(
        &self,
        uow: &U,
        cycle: &Cycle,
        out: &mut Vec<ChangeRecord>,
    ) -> AuditResult<()>
    where
        U: UnitOfWork + ?Sized,
    {
        for collection in uow.scheduled_collection_deletions() {
            if !self.policy.is_audited(collection.owner.class_name()) {
                continue;
            }
            for element in &collection.elements {
                if let Some(change) = self.relation(uow, &collection, element, Change::Dissociate)? {
                    out.push(self.relation_record(uow, &collection, change, cycle)?);
                }
            }
        }
        Ok(())
    }

    fn collect_collection_updates<U>(
        &self,
        uow: &U,
        cycle: &Cycle,
        out: &mut Vec<ChangeRecord>,
    ) -> AuditResult<()>
    where
        U: UnitOfWork + ?Sized,
    {
        for collection in uow.scheduled_collection_updates() {
            if !self.policy.is_audited(collection.owner.class_name()) {
                continue;
            }
            for element in &collection.inserted {
                if let Some(change) = self.relation(uow, &collection, element, Change::Associate)? {
                    out.push(self.relation_record(uow, &collection, change, cycle)?);
                }
            }
            for element in &collection.deleted {
                if let Some(change) = self.relation(uow, &collection, element, Change::Dissociate)? {
                    out.push(self.relation_record(uow, &collection, change, cycle)?);
                }
            }
        }
        Ok(())
    }

    /// Relation change between a collection's owner and one element
    ///
    /// The join table is looked up from the owner's mapping for every
    /// element, never reused from a previous one.
    fn relation<U>(
        &self,
        uow: &U,
        collection: &PersistentCollection,
        element: &EntityRef,
        kind: fn(RelationDiff) -> Change,
    ) -> AuditResult<Option<Change>>
    where
        U: UnitOfWork + ?Sized,
    {
        if !self.policy.is_audited(element.class_name()) {
            return Ok(None);
        }
        let owner_meta = uow.require_metadata(collection.owner.class_name())?;
        let table = owner_meta
            .association_mapping(&collection.field_name)
            .and_then(|mapping| mapping.join_table.clone());

        let summarizer = EntitySummarizer::new(self.normalizer);
        Ok(Some(kind(RelationDiff {
            source: summarizer.summarize(uow, &collection.owner)?,
            target: summarizer.summarize(uow, element)?,
            table,
        })))
    }

    fn relation_record<U>(
        &self,
        uow: &U,
        collection: &PersistentCollection,
        change: Change,
        cycle: &Cycle,
    ) -> AuditResult<ChangeRecord>
    where
        U: UnitOfWork + ?Sized,
    {
        let meta = uow.require_metadata(collection.owner.class_name())?;
        let subject = self.subject(uow, &collection.owner)?;
        Ok(self.record(meta, subject, change, cycle))
    }

    /// Subject identity, deferred to the write phase if not assigned yet
    fn subject<U>(&self, uow: &U, entity: &EntityRef) -> AuditResult<SubjectId>
    where
        U: UnitOfWork + ?Sized,
    {
        let id = EntitySummarizer::new(self.normalizer).identity(uow, entity)?;
        if id.is_null() {
            Ok(SubjectId::Deferred(entity.clone()))
        } else {
            Ok(SubjectId::Assigned(id))
        }
    }

    /// Subject identity that must already be known
    fn required_subject<U>(&self, uow: &U, entity: &EntityRef) -> AuditResult<SubjectId>
    where
        U: UnitOfWork + ?Sized,
    {
        let id = EntitySummarizer::new(self.normalizer).identity(uow, entity)?;
        if id.is_null() {
            return Err(AuditError::identity(
                entity.class_name(),
                "primary key is not assigned",
            ));
        }
        Ok(SubjectId::Assigned(id))
    }

    fn diff_engine(&self) -> DiffEngine<'a, P> {
        DiffEngine::new(self.policy, self.normalizer)
    }

    fn record(
        &self,
        meta: &ClassMetadata,
        subject: SubjectId,
        change: Change,
        cycle: &Cycle,
    ) -> ChangeRecord {
        debug!(
            action = %change.action(),
            class = %meta.name,
            table = %meta.table_name,
            deferred = subject.is_deferred(),
            "audit record collected"
        );
        ChangeRecord {
            table_name: meta.table_name.clone(),
            schema_name: meta.schema_name.clone(),
            subject,
            change,
            actor: cycle.actor.clone(),
            captured_at: cycle.captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::ActionKind;
    use crate::audit::value::NormalizedValue;
    use crate::config::{AuditSettings, EntitySettings};
    use crate::host::{
        AssociationKind, ChangeSet, DynamicEntity, MemoryUnitOfWork, RawValue, TypeKind,
    };
    use crate::policy::ConfiguredPolicy;
    use serde_json::json;

    fn policy() -> ConfiguredPolicy {
        let mut settings = AuditSettings::default();
        for class in ["App\\User", "App\\Group", "App\\Post"] {
            settings
                .entities
                .insert(class.to_string(), EntitySettings::default());
        }
        settings.entities.insert(
            "App\\Secret".to_string(),
            EntitySettings {
                enabled: false,
                ignored_columns: Vec::new(),
            },
        );
        ConfiguredPolicy::new(settings).with_actor(|| Some("admin".to_string()))
    }

    fn host() -> MemoryUnitOfWork {
        MemoryUnitOfWork::new()
            .with_metadata(
                ClassMetadata::new("App\\User", "users")
                    .with_identifier("id")
                    .with_field("id", TypeKind::Integer)
                    .with_field("name", TypeKind::String)
                    .with_field("age", TypeKind::Integer)
                    .with_many_to_many("groups", "App\\Group", "user_groups")
                    .with_association("posts", "App\\Post", AssociationKind::OneToMany),
            )
            .with_metadata(
                ClassMetadata::new("App\\Group", "groups")
                    .with_identifier("id")
                    .with_field("id", TypeKind::Integer),
            )
            .with_metadata(
                ClassMetadata::new("App\\Post", "posts")
                    .with_identifier("id")
                    .with_field("id", TypeKind::Integer)
                    .with_field("title", TypeKind::String),
            )
            .with_metadata(
                ClassMetadata::new("App\\Secret", "secrets")
                    .with_identifier("id")
                    .with_field("id", TypeKind::Integer),
            )
    }

    fn user(id: i64) -> EntityRef {
        DynamicEntity::new("App\\User")
            .with("id", id)
            .with("name", "Alice")
            .with("age", 30)
            .into_ref()
    }

    fn group(id: i64) -> EntityRef {
        DynamicEntity::new("App\\Group").with("id", id).into_ref()
    }

    fn collect(uow: &MemoryUnitOfWork) -> AuditResult<AuditSession> {
        let policy = policy();
        let normalizer = ValueNormalizer::new();
        let mut session = AuditSession::new();
        ChangeCollector::new(&policy, &normalizer).collect(uow, &mut session)?;
        Ok(session)
    }

    fn actions(session: &AuditSession) -> Vec<ActionKind> {
        session.records().iter().map(|r| r.action()).collect()
    }

    #[test]
    fn test_fixed_processing_order() {
        let mut uow = host();
        uow.schedule_collection_update(
            PersistentCollection::new(user(1), "groups").with_inserted(vec![group(7)]),
        );
        uow.schedule_collection_deletion(
            PersistentCollection::new(user(3), "groups").with_elements(vec![group(8)]),
        );
        uow.schedule_delete(user(2));
        uow.schedule_insert(user(4), ChangeSet::new().with("name", None::<String>, "Dan"));
        uow.schedule_update(user(1), ChangeSet::new().with("age", 30, 31));

        let session = collect(&uow).unwrap();
        assert_eq!(
            actions(&session),
            vec![
                ActionKind::Update,
                ActionKind::Insert,
                ActionKind::Delete,
                ActionKind::Dissociate,
                ActionKind::Associate,
            ]
        );
        assert!(session
            .records()
            .iter()
            .all(|r| r.actor.as_deref() == Some("admin")));
    }

    #[test]
    fn test_noop_update_is_suppressed() {
        let mut uow = host();
        uow.schedule_update(user(1), ChangeSet::new().with("age", 30, 30));
        assert!(collect(&uow).unwrap().is_empty());
    }

    #[test]
    fn test_insert_with_empty_diff_is_kept() {
        let mut uow = host();
        uow.schedule_insert(user(5), ChangeSet::new());
        let session = collect(&uow).unwrap();
        assert_eq!(actions(&session), vec![ActionKind::Insert]);
    }

    #[test]
    fn test_unaudited_classes_are_skipped() {
        let mut uow = host();
        let secret = DynamicEntity::new("App\\Secret").with("id", 1).into_ref();
        uow.schedule_update(secret.clone(), ChangeSet::new().with("id", 1, 2));
        uow.schedule_collection_update(
            PersistentCollection::new(user(1), "groups").with_inserted(vec![secret]),
        );
        assert!(collect(&uow).unwrap().is_empty());
    }

    #[test]
    fn test_delete_snapshot() {
        let mut uow = host();
        let posts = vec![DynamicEntity::new("App\\Post").with("id", 1).into_ref()];
        let alice = DynamicEntity::new("App\\User")
            .with("id", 2)
            .with("name", "Alice")
            .with("age", 30)
            .with("posts", RawValue::Collection(posts))
            .into_ref();
        uow.schedule_delete(alice);

        let session = collect(&uow).unwrap();
        let record = &session.records()[0];
        match &record.change {
            Change::Delete(diff) => assert_eq!(
                serde_json::to_value(diff).unwrap(),
                json!({
                    "id": {"old": 2, "new": null},
                    "name": {"old": "Alice", "new": null},
                    "age": {"old": 30, "new": null}
                })
            ),
            other => panic!("unexpected change {:?}", other),
        }
        assert!(matches!(
            record.subject,
            SubjectId::Assigned(NormalizedValue::Integer(2))
        ));
    }

    #[test]
    fn test_lazy_deletion_is_materialized() {
        let mut uow = host();
        let lazy = DynamicEntity::lazy(
            "App\\User",
            "id",
            9,
            vec![("name".to_string(), RawValue::from("Zoe"))],
        )
        .into_ref();
        uow.schedule_delete(lazy);

        let session = collect(&uow).unwrap();
        match &session.records()[0].change {
            Change::Delete(diff) => {
                assert_eq!(diff.get("name").unwrap().old, NormalizedValue::text("Zoe"))
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_relation_symmetry() {
        let mut uow = host();
        let a = user(1);
        let b = group(2);
        uow.schedule_collection_update(
            PersistentCollection::new(a.clone(), "groups").with_inserted(vec![b.clone()]),
        );
        uow.schedule_collection_update(
            PersistentCollection::new(a, "groups").with_deleted(vec![b]),
        );

        let session = collect(&uow).unwrap();
        let (added, removed) = match (&session.records()[0].change, &session.records()[1].change) {
            (Change::Associate(added), Change::Dissociate(removed)) => (added, removed),
            other => panic!("unexpected changes {:?}", other),
        };
        assert_eq!(added, removed);
        let json = serde_json::to_value(added).unwrap();
        assert_eq!(json["source"]["id"], 1);
        assert_eq!(json["target"]["id"], 2);
        assert_eq!(json["table"], "user_groups");
    }

    #[test]
    fn test_join_table_is_resolved_per_element() {
        let mut uow = host();
        let post = DynamicEntity::new("App\\Post").with("id", 5).into_ref();
        uow.schedule_collection_update(
            PersistentCollection::new(user(1), "groups").with_inserted(vec![group(1), group(2)]),
        );
        uow.schedule_collection_update(
            PersistentCollection::new(user(1), "posts").with_inserted(vec![post]),
        );

        let session = collect(&uow).unwrap();
        let tables: Vec<Option<String>> = session
            .records()
            .iter()
            .map(|r| match &r.change {
                Change::Associate(relation) => relation.table.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(
            tables,
            vec![
                Some("user_groups".to_string()),
                Some("user_groups".to_string()),
                None
            ]
        );
    }

    #[test]
    fn test_unassigned_insert_identity_is_deferred() {
        let mut uow = host();
        let fresh = DynamicEntity::new("App\\User").with("name", "New").into_ref();
        uow.schedule_insert(fresh, ChangeSet::new().with("name", None::<String>, "New"));

        let session = collect(&uow).unwrap();
        assert!(session.records()[0].subject.is_deferred());
    }

    #[test]
    fn test_unassigned_update_identity_fails() {
        let mut uow = host();
        let fresh = DynamicEntity::new("App\\User").with("name", "New").into_ref();
        uow.schedule_update(fresh, ChangeSet::new().with("name", "Old", "New"));

        let err = collect(&uow).unwrap_err();
        assert!(matches!(err, AuditError::IdentityResolution { .. }));
    }

    #[test]
    fn test_failed_pass_discards_cycle() {
        let policy = policy();
        let normalizer = ValueNormalizer::new();
        let collector = ChangeCollector::new(&policy, &normalizer);
        let mut session = AuditSession::new();

        let mut uow = host();
        uow.schedule_insert(user(1), ChangeSet::new());
        collector.collect(&uow, &mut session).unwrap();
        assert_eq!(session.len(), 1);

        uow.clear();
        uow.schedule_insert(user(2), ChangeSet::new());
        // a deletion without identity fails after one good record
        uow.schedule_delete(DynamicEntity::new("App\\User").with("name", "x").into_ref());

        let err = collector.collect(&uow, &mut session).unwrap_err();
        assert!(err.is_prepare_failure());
        assert!(session.is_empty());
    }
}
