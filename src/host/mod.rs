//! Contract of the host persistence layer
//!
//! The audit core never talks to a database driver or an ORM directly. The
//! host exposes its unit of work, its mapping metadata and its entities
//! through the traits in this module; `memory` provides a small in-memory
//! implementation used by the tests and as a template for real adapters.

pub mod memory;
pub mod metadata;

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::audit::NormalizedValue;
use crate::error::{AuditError, AuditResult};

pub use memory::{DynamicEntity, MemoryUnitOfWork};
pub use metadata::{
    AssociationKind, AssociationMapping, ClassMetadata, FieldMapping, InheritanceType,
    MappingOptions, TypeKind,
};

/// Shared handle to a host entity
pub type EntityRef = Rc<dyn Entity>;

/// A persistent domain object as seen by the audit core
pub trait Entity: fmt::Debug {
    /// Mapped class name (the real class, never a proxy class)
    fn class_name(&self) -> &str;

    /// Current value of one field, `None` if the field is unknown or not loaded
    fn field(&self, name: &str) -> Option<RawValue>;

    /// The entity's own declared fields with their current values
    fn declared_fields(&self) -> Vec<(String, RawValue)>;

    /// Human-readable projection, if the type provides one
    fn display_label(&self) -> Option<String> {
        None
    }

    /// False for lazy references whose data has not been loaded yet
    fn is_initialized(&self) -> bool {
        true
    }

    /// Load the entity's data if it is a lazy reference
    fn initialize(&self) -> AuditResult<()> {
        Ok(())
    }
}

/// Something that can turn itself into a storable value
///
/// User-defined field types implement this so they can be normalized
/// without registering a dedicated converter.
pub trait StorableValue: fmt::Debug {
    fn to_storable(&self) -> AuditResult<NormalizedValue>;
}

/// Reader that can be rewound after it has been consumed
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// A binary value exposed as a readable stream
///
/// Clones share the same underlying stream.
#[derive(Clone)]
pub struct BlobStream(Rc<RefCell<Box<dyn ReadSeek>>>);

impl BlobStream {
    pub fn new(inner: impl Read + Seek + 'static) -> Self {
        Self(Rc::new(RefCell::new(Box::new(inner))))
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    /// Read the remaining content, then rewind so later readers see it all
    pub fn read_and_rewind(&self) -> io::Result<Vec<u8>> {
        let mut inner = self.0.try_borrow_mut().map_err(|_| {
            io::Error::new(io::ErrorKind::WouldBlock, "blob stream is already in use")
        })?;
        let mut buf = Vec::new();
        inner.read_to_end(&mut buf)?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(buf)
    }

    /// Read the remaining content without rewinding
    pub fn read_remaining(&self) -> io::Result<Vec<u8>> {
        let mut inner = self.0.try_borrow_mut().map_err(|_| {
            io::Error::new(io::ErrorKind::WouldBlock, "blob stream is already in use")
        })?;
        let mut buf = Vec::new();
        inner.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlobStream(..)")
    }
}

/// A raw field value as held by the host
#[derive(Debug, Clone)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    BigInt(i128),
    Float(f64),
    /// Decimal kept in its textual form to avoid precision loss
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Stream(BlobStream),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(serde_json::Value),
    Custom(Rc<dyn StorableValue>),
    Entity(EntityRef),
    Collection(Vec<EntityRef>),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Short name of the variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) => "int",
            RawValue::BigInt(_) => "big int",
            RawValue::Float(_) => "float",
            RawValue::Decimal(_) => "decimal",
            RawValue::Text(_) => "text",
            RawValue::Bytes(_) => "bytes",
            RawValue::Stream(_) => "stream",
            RawValue::DateTime(_) => "datetime",
            RawValue::Date(_) => "date",
            RawValue::Time(_) => "time",
            RawValue::Json(_) => "json",
            RawValue::Custom(_) => "custom value",
            RawValue::Entity(_) => "entity",
            RawValue::Collection(_) => "collection",
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<i32> for RawValue {
    fn from(value: i32) -> Self {
        RawValue::Int(i64::from(value))
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<Vec<u8>> for RawValue {
    fn from(value: Vec<u8>) -> Self {
        RawValue::Bytes(value)
    }
}

impl From<NaiveDateTime> for RawValue {
    fn from(value: NaiveDateTime) -> Self {
        RawValue::DateTime(value)
    }
}

impl From<EntityRef> for RawValue {
    fn from(value: EntityRef) -> Self {
        RawValue::Entity(value)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(RawValue::Null, Into::into)
    }
}

/// One changed field of an entity: `[old, new]`
#[derive(Debug, Clone)]
pub struct FieldChange {
    pub field: String,
    pub old: RawValue,
    pub new: RawValue,
}

/// Per-entity changes tracked by the host, in tracking order
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    entries: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append
    pub fn with(
        mut self,
        field: impl Into<String>,
        old: impl Into<RawValue>,
        new: impl Into<RawValue>,
    ) -> Self {
        self.push(field, old, new);
        self
    }

    pub fn push(&mut self, field: impl Into<String>, old: impl Into<RawValue>, new: impl Into<RawValue>) {
        self.entries.push(FieldChange {
            field: field.into(),
            old: old.into(),
            new: new.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldChange> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A relation collection scheduled for update or deletion
#[derive(Debug, Clone)]
pub struct PersistentCollection {
    pub owner: EntityRef,
    /// Relation field on the owner's class
    pub field_name: String,
    /// Current elements
    pub elements: Vec<EntityRef>,
    /// Elements added since the collection was loaded
    pub inserted: Vec<EntityRef>,
    /// Elements removed since the collection was loaded
    pub deleted: Vec<EntityRef>,
}

impl PersistentCollection {
    pub fn new(owner: EntityRef, field_name: impl Into<String>) -> Self {
        Self {
            owner,
            field_name: field_name.into(),
            elements: Vec::new(),
            inserted: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn with_elements(mut self, elements: Vec<EntityRef>) -> Self {
        self.elements = elements;
        self
    }

    pub fn with_inserted(mut self, inserted: Vec<EntityRef>) -> Self {
        self.inserted = inserted;
        self
    }

    pub fn with_deleted(mut self, deleted: Vec<EntityRef>) -> Self {
        self.deleted = deleted;
        self
    }
}

/// Access to mapping metadata and lazy-reference loading
pub trait MetadataSource {
    fn class_metadata(&self, class_name: &str) -> Option<&ClassMetadata>;

    /// Every mapped class name
    fn class_names(&self) -> Vec<String>;

    /// Force-load a lazy reference
    fn initialize_object(&self, entity: &EntityRef) -> AuditResult<()> {
        entity.initialize()
    }

    /// Metadata of a class, or an error if the host does not map it
    fn require_metadata(&self, class_name: &str) -> AuditResult<&ClassMetadata> {
        self.class_metadata(class_name)
            .ok_or_else(|| AuditError::metadata(class_name))
    }

    /// Force-load a lazy reference and verify it is no longer a placeholder
    fn materialize(&self, entity: &EntityRef) -> AuditResult<()> {
        if entity.is_initialized() {
            return Ok(());
        }
        self.initialize_object(entity)?;
        if entity.is_initialized() {
            Ok(())
        } else {
            Err(AuditError::Materialization {
                class: entity.class_name().to_string(),
            })
        }
    }
}

/// Pending mutations of one commit cycle
pub trait UnitOfWork: MetadataSource {
    fn scheduled_entity_insertions(&self) -> Vec<EntityRef>;

    fn scheduled_entity_updates(&self) -> Vec<EntityRef>;

    fn scheduled_entity_deletions(&self) -> Vec<EntityRef>;

    fn scheduled_collection_updates(&self) -> Vec<PersistentCollection>;

    fn scheduled_collection_deletions(&self) -> Vec<PersistentCollection>;

    /// Changed fields of an inserted or updated entity
    fn entity_change_set(&self, entity: &EntityRef) -> ChangeSet;
}
