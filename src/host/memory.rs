//! In-memory host persistence layer
//!
//! A minimal unit of work over dynamically typed entities. Real adapters
//! implement the same traits over their ORM; this one backs the tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::{
    ChangeSet, ClassMetadata, Entity, EntityRef, MetadataSource, PersistentCollection, RawValue,
    UnitOfWork,
};
use crate::error::AuditResult;

/// An entity whose fields are held in an ordered list
///
/// A lazy entity only exposes its identifier until it is initialized.
#[derive(Debug)]
pub struct DynamicEntity {
    class_name: String,
    fields: RefCell<Vec<(String, RawValue)>>,
    label_field: Option<String>,
    unloaded: RefCell<Option<Vec<(String, RawValue)>>>,
}

impl DynamicEntity {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: RefCell::new(Vec::new()),
            label_field: None,
            unloaded: RefCell::new(None),
        }
    }

    /// A lazy reference: only `id_field` is readable until initialized
    pub fn lazy(
        class_name: impl Into<String>,
        id_field: impl Into<String>,
        id: impl Into<RawValue>,
        data: Vec<(String, RawValue)>,
    ) -> Self {
        let entity = Self::new(class_name).with(id_field, id);
        *entity.unloaded.borrow_mut() = Some(data);
        entity
    }

    pub fn with(self, field: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Use a field's value as the entity's human-readable label
    pub fn with_label_field(mut self, field: impl Into<String>) -> Self {
        self.label_field = Some(field.into());
        self
    }

    pub fn into_ref(self) -> EntityRef {
        Rc::new(self)
    }

    /// Set or replace a field value
    pub fn set(&self, field: impl Into<String>, value: impl Into<RawValue>) {
        let field = field.into();
        let value = value.into();
        let mut fields = self.fields.borrow_mut();
        match fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => fields.push((field, value)),
        }
    }
}

impl Entity for DynamicEntity {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn field(&self, name: &str) -> Option<RawValue> {
        self.fields
            .borrow()
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.clone())
    }

    fn declared_fields(&self) -> Vec<(String, RawValue)> {
        self.fields.borrow().clone()
    }

    fn display_label(&self) -> Option<String> {
        if !self.is_initialized() {
            return None;
        }
        match self.field(self.label_field.as_deref()?)? {
            RawValue::Text(text) => Some(text),
            RawValue::Int(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn is_initialized(&self) -> bool {
        self.unloaded.borrow().is_none()
    }

    fn initialize(&self) -> AuditResult<()> {
        if let Some(data) = self.unloaded.borrow_mut().take() {
            for (field, value) in data {
                self.set(field, value);
            }
        }
        Ok(())
    }
}

/// A unit of work whose pending lists are filled by hand
#[derive(Debug, Default)]
pub struct MemoryUnitOfWork {
    metadata: HashMap<String, ClassMetadata>,
    insertions: Vec<EntityRef>,
    updates: Vec<EntityRef>,
    deletions: Vec<EntityRef>,
    change_sets: Vec<(EntityRef, ChangeSet)>,
    collection_updates: Vec<PersistentCollection>,
    collection_deletions: Vec<PersistentCollection>,
}

impl MemoryUnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metadata: ClassMetadata) {
        self.metadata.insert(metadata.name.clone(), metadata);
    }

    pub fn with_metadata(mut self, metadata: ClassMetadata) -> Self {
        self.register(metadata);
        self
    }

    pub fn schedule_insert(&mut self, entity: EntityRef, change_set: ChangeSet) {
        self.change_sets.push((entity.clone(), change_set));
        self.insertions.push(entity);
    }

    pub fn schedule_update(&mut self, entity: EntityRef, change_set: ChangeSet) {
        self.change_sets.push((entity.clone(), change_set));
        self.updates.push(entity);
    }

    pub fn schedule_delete(&mut self, entity: EntityRef) {
        self.deletions.push(entity);
    }

    pub fn schedule_collection_update(&mut self, collection: PersistentCollection) {
        self.collection_updates.push(collection);
    }

    pub fn schedule_collection_deletion(&mut self, collection: PersistentCollection) {
        self.collection_deletions.push(collection);
    }

    /// Forget all pending mutations, as after a host commit
    pub fn clear(&mut self) {
        self.insertions.clear();
        self.updates.clear();
        self.deletions.clear();
        self.change_sets.clear();
        self.collection_updates.clear();
        self.collection_deletions.clear();
    }
}

impl MetadataSource for MemoryUnitOfWork {
    fn class_metadata(&self, class_name: &str) -> Option<&ClassMetadata> {
        self.metadata.get(class_name)
    }

    fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metadata.keys().cloned().collect();
        names.sort();
        names
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    fn scheduled_entity_insertions(&self) -> Vec<EntityRef> {
        self.insertions.clone()
    }

    fn scheduled_entity_updates(&self) -> Vec<EntityRef> {
        self.updates.clone()
    }

    fn scheduled_entity_deletions(&self) -> Vec<EntityRef> {
        self.deletions.clone()
    }

    fn scheduled_collection_updates(&self) -> Vec<PersistentCollection> {
        self.collection_updates.clone()
    }

    fn scheduled_collection_deletions(&self) -> Vec<PersistentCollection> {
        self.collection_deletions.clone()
    }

    fn entity_change_set(&self, entity: &EntityRef) -> ChangeSet {
        self.change_sets
            .iter()
            .find(|(tracked, _)| Rc::ptr_eq(tracked, entity))
            .map(|(_, change_set)| change_set.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_entity_loads_on_initialize() {
        let entity = DynamicEntity::lazy(
            "App\\User",
            "id",
            7,
            vec![("name".to_string(), RawValue::from("Alice"))],
        )
        .with_label_field("name")
        .into_ref();

        assert!(!entity.is_initialized());
        assert!(entity.field("name").is_none());
        assert!(entity.display_label().is_none());

        entity.initialize().unwrap();

        assert!(entity.is_initialized());
        assert_eq!(entity.display_label().as_deref(), Some("Alice"));
        assert_eq!(entity.declared_fields().len(), 2);
    }

    #[test]
    fn test_set_replaces_existing_field() {
        let entity = DynamicEntity::new("App\\User").with("id", RawValue::Null);
        entity.set("id", 42);
        assert!(matches!(entity.field("id"), Some(RawValue::Int(42))));
        assert_eq!(entity.declared_fields().len(), 1);
    }

    #[test]
    fn test_change_set_lookup_by_identity() {
        let a = DynamicEntity::new("App\\User").with("id", 1).into_ref();
        let b = DynamicEntity::new("App\\User").with("id", 1).into_ref();

        let mut uow = MemoryUnitOfWork::new();
        uow.schedule_update(a.clone(), ChangeSet::new().with("name", "x", "y"));

        assert_eq!(uow.entity_change_set(&a).len(), 1);
        assert!(uow.entity_change_set(&b).is_empty());
    }

    #[test]
    fn test_materialize_through_host() {
        let uow = MemoryUnitOfWork::new();
        let entity = DynamicEntity::lazy("App\\User", "id", 1, Vec::new()).into_ref();
        uow.materialize(&entity).unwrap();
        assert!(entity.is_initialized());
    }
}
