//! Entity identities and summaries
//!
//! A summary is an immutable snapshot of an entity's identity and label,
//! stored inside diffs in place of live references.

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::normalizer::ValueNormalizer;
use super::value::NormalizedValue;
use crate::error::{AuditError, AuditResult};
use crate::host::{EntityRef, MappingOptions, MetadataSource, RawValue};

/// Identity and label of an entity at capture time
///
/// Serializes as `{"label", "class", "table", <pk name>: <pk value>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySummary {
    pub label: String,
    pub class_name: String,
    pub table_name: String,
    pub primary_key_field: String,
    pub primary_key_value: NormalizedValue,
}

impl Serialize for EntitySummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("label", &self.label)?;
        map.serialize_entry("class", &self.class_name)?;
        map.serialize_entry("table", &self.table_name)?;
        map.serialize_entry(&self.primary_key_field, &self.primary_key_value)?;
        map.end()
    }
}

/// Builds summaries and resolves entity identities
#[derive(Debug, Clone, Copy)]
pub struct EntitySummarizer<'a> {
    normalizer: &'a ValueNormalizer,
}

impl<'a> EntitySummarizer<'a> {
    pub fn new(normalizer: &'a ValueNormalizer) -> Self {
        Self { normalizer }
    }

    /// Summarize an optional reference; `None` stays `None`
    pub fn summarize_optional<H>(
        &self,
        host: &H,
        entity: Option<&EntityRef>,
    ) -> AuditResult<Option<EntitySummary>>
    where
        H: MetadataSource + ?Sized,
    {
        entity.map(|e| self.summarize(host, e)).transpose()
    }

    pub fn summarize<H>(&self, host: &H, entity: &EntityRef) -> AuditResult<EntitySummary>
    where
        H: MetadataSource + ?Sized,
    {
        host.materialize(entity)?;
        let meta = host.require_metadata(entity.class_name())?;
        let pk_name = meta.single_identifier_field_name()?;
        let pk_value = self.identity(host, entity)?;

        let label = entity
            .display_label()
            .unwrap_or_else(|| format!("{}#{}", meta.name, pk_value));

        Ok(EntitySummary {
            label,
            class_name: meta.name.clone(),
            table_name: meta.table_name.clone(),
            primary_key_field: pk_name.to_string(),
            primary_key_value: pk_value,
        })
    }

    /// Normalized primary key of an entity
    ///
    /// A primary key that is itself a relation resolves one level into the
    /// referenced entity's own primary key. Returns `Null` when the key is
    /// mapped but not assigned yet.
    pub fn identity<H>(&self, host: &H, entity: &EntityRef) -> AuditResult<NormalizedValue>
    where
        H: MetadataSource + ?Sized,
    {
        host.materialize(entity)?;
        let meta = host.require_metadata(entity.class_name())?;
        let pk_name = meta.single_identifier_field_name()?;

        if let Some(mapping) = meta.field_mapping(pk_name) {
            let raw = entity.field(pk_name).unwrap_or(RawValue::Null);
            return self
                .normalizer
                .normalize(&mapping.type_kind, &raw, &MappingOptions::default());
        }

        let association = meta.association_mapping(pk_name).ok_or_else(|| {
            AuditError::identity(
                &meta.name,
                format!("identifier '{}' is neither a field nor a relation", pk_name),
            )
        })?;

        let target = match entity.field(pk_name) {
            Some(RawValue::Entity(target)) => target,
            _ => {
                return Err(AuditError::identity(
                    &meta.name,
                    format!("identifier relation '{}' holds no entity", pk_name),
                ))
            }
        };

        host.materialize(&target)?;
        let target_meta = host.require_metadata(&association.target_entity)?;
        let target_pk = target_meta.single_identifier_field_name()?;
        let target_mapping = target_meta.field_mapping(target_pk).ok_or_else(|| {
            AuditError::identity(
                &meta.name,
                format!(
                    "identifier of related {} is not a plain field",
                    target_meta.name
                ),
            )
        })?;

        let raw = target.field(target_pk).unwrap_or(RawValue::Null);
        self.normalizer
            .normalize(&target_mapping.type_kind, &raw, &MappingOptions::default())
    }
}
