//! Mapping metadata supplied by the host persistence layer
//!
//! Describes how an entity class maps onto its table: scalar fields with
//! their type kind and options, relations, embedded values and the
//! primary key.

use std::fmt;

use crate::error::{AuditError, AuditResult};

/// Storage type of a mapped scalar field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Integer,
    SmallInt,
    BigInt,
    Decimal,
    Float,
    Boolean,
    Blob,
    Binary,
    String,
    Text,
    Guid,
    DateTime,
    Date,
    Time,
    Json,
    /// A host- or user-defined type, identified by name
    Other(String),
}

impl TypeKind {
    /// Canonical type name
    pub fn name(&self) -> &str {
        match self {
            TypeKind::Integer => "integer",
            TypeKind::SmallInt => "smallint",
            TypeKind::BigInt => "bigint",
            TypeKind::Decimal => "decimal",
            TypeKind::Float => "float",
            TypeKind::Boolean => "boolean",
            TypeKind::Blob => "blob",
            TypeKind::Binary => "binary",
            TypeKind::String => "string",
            TypeKind::Text => "text",
            TypeKind::Guid => "guid",
            TypeKind::DateTime => "datetime",
            TypeKind::Date => "date",
            TypeKind::Time => "time",
            TypeKind::Json => "json",
            TypeKind::Other(name) => name,
        }
    }

    /// Parse a type name, falling back to `Other` for unknown names
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => TypeKind::Integer,
            "smallint" => TypeKind::SmallInt,
            "bigint" => TypeKind::BigInt,
            "decimal" => TypeKind::Decimal,
            "float" => TypeKind::Float,
            "boolean" | "bool" => TypeKind::Boolean,
            "blob" => TypeKind::Blob,
            "binary" => TypeKind::Binary,
            "string" => TypeKind::String,
            "text" => TypeKind::Text,
            "guid" => TypeKind::Guid,
            "datetime" => TypeKind::DateTime,
            "date" => TypeKind::Date,
            "time" => TypeKind::Time,
            "json" => TypeKind::Json,
            _ => TypeKind::Other(name.trim().to_string()),
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<&str> for TypeKind {
    fn from(name: &str) -> Self {
        TypeKind::from_name(name)
    }
}

/// Column options declared on a field mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingOptions {
    pub scale: Option<u32>,
    pub precision: Option<u32>,
    pub length: Option<u32>,
    pub nullable: bool,
}

impl MappingOptions {
    /// Options for a decimal column
    pub fn decimal(precision: u32, scale: u32) -> Self {
        Self {
            scale: Some(scale),
            precision: Some(precision),
            ..Self::default()
        }
    }
}

/// A mapped scalar field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub field_name: String,
    pub type_kind: TypeKind,
    pub options: MappingOptions,
}

/// Cardinality of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl AssociationKind {
    /// Whether the relation holds at most one entity
    pub fn is_single_valued(self) -> bool {
        matches!(self, AssociationKind::OneToOne | AssociationKind::ManyToOne)
    }
}

/// A mapped relation to another entity class
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationMapping {
    pub field_name: String,
    pub target_entity: String,
    pub kind: AssociationKind,
    /// Explicit join table, only meaningful for many-to-many relations
    pub join_table: Option<String>,
}

/// Inheritance strategy of a class hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritanceType {
    #[default]
    None,
    Joined,
    SingleTable,
    TablePerClass,
}

impl fmt::Display for InheritanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InheritanceType::None => write!(f, "NONE"),
            InheritanceType::Joined => write!(f, "JOINED"),
            InheritanceType::SingleTable => write!(f, "SINGLE_TABLE"),
            InheritanceType::TablePerClass => write!(f, "TABLE_PER_CLASS"),
        }
    }
}

/// Mapping metadata of one entity class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetadata {
    pub name: String,
    pub table_name: String,
    pub schema_name: Option<String>,
    pub identifier: Vec<String>,
    pub fields: Vec<FieldMapping>,
    pub associations: Vec<AssociationMapping>,
    pub embedded: Vec<String>,
    pub inheritance: InheritanceType,
    pub root_entity: Option<String>,
    pub sub_classes: Vec<String>,
}

impl ClassMetadata {
    /// Create metadata for a class stored in `table_name`
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            schema_name: None,
            identifier: Vec::new(),
            fields: Vec::new(),
            associations: Vec::new(),
            embedded: Vec::new(),
            inheritance: InheritanceType::None,
            root_entity: None,
            sub_classes: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema_name = Some(schema.into());
        self
    }

    pub fn with_identifier(mut self, field_name: impl Into<String>) -> Self {
        self.identifier.push(field_name.into());
        self
    }

    pub fn with_field(self, field_name: impl Into<String>, type_kind: TypeKind) -> Self {
        self.with_field_options(field_name, type_kind, MappingOptions::default())
    }

    pub fn with_field_options(
        mut self,
        field_name: impl Into<String>,
        type_kind: TypeKind,
        options: MappingOptions,
    ) -> Self {
        self.fields.push(FieldMapping {
            field_name: field_name.into(),
            type_kind,
            options,
        });
        self
    }

    pub fn with_association(
        mut self,
        field_name: impl Into<String>,
        target_entity: impl Into<String>,
        kind: AssociationKind,
    ) -> Self {
        self.associations.push(AssociationMapping {
            field_name: field_name.into(),
            target_entity: target_entity.into(),
            kind,
            join_table: None,
        });
        self
    }

    pub fn with_many_to_many(
        mut self,
        field_name: impl Into<String>,
        target_entity: impl Into<String>,
        join_table: impl Into<String>,
    ) -> Self {
        self.associations.push(AssociationMapping {
            field_name: field_name.into(),
            target_entity: target_entity.into(),
            kind: AssociationKind::ManyToMany,
            join_table: Some(join_table.into()),
        });
        self
    }

    pub fn with_embedded(mut self, field_name: impl Into<String>) -> Self {
        self.embedded.push(field_name.into());
        self
    }

    pub fn with_inheritance(mut self, inheritance: InheritanceType, sub_classes: &[&str]) -> Self {
        self.inheritance = inheritance;
        self.sub_classes = sub_classes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn field_mapping(&self, field_name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.field_name == field_name)
    }

    pub fn association_mapping(&self, field_name: &str) -> Option<&AssociationMapping> {
        self.associations.iter().find(|a| a.field_name == field_name)
    }

    pub fn has_field(&self, field_name: &str) -> bool {
        self.field_mapping(field_name).is_some()
    }

    pub fn is_single_valued_association(&self, field_name: &str) -> bool {
        self.association_mapping(field_name)
            .is_some_and(|a| a.kind.is_single_valued())
    }

    /// Whether the field is an embedded value or one of its flattened parts
    /// (`address` or `address.city`)
    pub fn is_embedded(&self, field_name: &str) -> bool {
        self.embedded.iter().any(|e| {
            field_name == e
                || field_name
                    .strip_prefix(e.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// Whether this class is the root of its hierarchy
    pub fn is_root(&self) -> bool {
        self.root_entity.as_deref().map_or(true, |root| root == self.name)
    }

    /// The single primary key field name
    pub fn single_identifier_field_name(&self) -> AuditResult<&str> {
        match self.identifier.as_slice() {
            [single] => Ok(single),
            [] => Err(AuditError::identity(&self.name, "class declares no identifier")),
            _ => Err(AuditError::identity(
                &self.name,
                format!(
                    "composite identifier ({}) is not supported",
                    self.identifier.join(", ")
                ),
            )),
        }
    }
}
