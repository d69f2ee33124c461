//! Diff generation for audit records
//!
//! Computes field-level diffs of one entity mutation from the host's
//! changeset, and the source/target pair of a relation change.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::normalizer::ValueNormalizer;
use super::summary::{EntitySummarizer, EntitySummary};
use super::value::NormalizedValue;
use crate::error::AuditResult;
use crate::host::{ChangeSet, ClassMetadata, EntityRef, MetadataSource, RawValue};
use crate::policy::AuditPolicy;

/// Old and new value of one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueChange {
    pub old: NormalizedValue,
    pub new: NormalizedValue,
}

/// Changed fields of one entity, in changeset order
///
/// Serializes as a JSON object keyed by field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDiff {
    entries: Vec<(String, ValueChange)>,
}

impl FieldDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, old: NormalizedValue, new: NormalizedValue) {
        self.entries.push((field.into(), ValueChange { old, new }));
    }

    pub fn get(&self, field: &str) -> Option<&ValueChange> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, change)| change)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueChange)> {
        self.entries.iter().map(|(name, change)| (name.as_str(), change))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for FieldDiff {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (field, change) in &self.entries {
            map.serialize_entry(field, change)?;
        }
        map.end()
    }
}

/// Both ends of an association or dissociation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationDiff {
    pub source: EntitySummary,
    pub target: EntitySummary,
    /// Join table of a many-to-many relation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// Computes field diffs for one entity mutation
pub struct DiffEngine<'a, P: AuditPolicy + ?Sized> {
    policy: &'a P,
    normalizer: &'a ValueNormalizer,
}

impl<'a, P: AuditPolicy + ?Sized> DiffEngine<'a, P> {
    pub fn new(policy: &'a P, normalizer: &'a ValueNormalizer) -> Self {
        Self { policy, normalizer }
    }

    /// Diff a changeset against the class mapping
    ///
    /// Embedded values, fields rejected by the policy and multi-valued
    /// relations never appear in the result. A field is only included when
    /// its normalized old and new values differ.
    pub fn diff<H>(
        &self,
        host: &H,
        meta: &ClassMetadata,
        change_set: &ChangeSet,
    ) -> AuditResult<FieldDiff>
    where
        H: MetadataSource + ?Sized,
    {
        let summarizer = EntitySummarizer::new(self.normalizer);
        let mut diff = FieldDiff::new();

        for change in change_set.iter() {
            let field = change.field.as_str();
            if !self.policy.is_audited_field(&meta.name, field) || meta.is_embedded(field) {
                continue;
            }

            let (old, new) = if let Some(mapping) = meta.field_mapping(field) {
                (
                    self.normalizer
                        .normalize(&mapping.type_kind, &change.old, &mapping.options)?,
                    self.normalizer
                        .normalize(&mapping.type_kind, &change.new, &mapping.options)?,
                )
            } else if meta.is_single_valued_association(field) {
                (
                    summarizer
                        .summarize_optional(host, as_entity(&change.old))?
                        .into(),
                    summarizer
                        .summarize_optional(host, as_entity(&change.new))?
                        .into(),
                )
            } else {
                continue;
            };

            if old != new {
                diff.insert(field, old, new);
            }
        }

        Ok(diff)
    }

    /// Snapshot of an entity being deleted: `old` is the current value, `new` is null
    ///
    /// The entity is materialized first. Relation collections are skipped and
    /// related entities are reduced to their label.
    pub fn snapshot<H>(
        &self,
        host: &H,
        meta: &ClassMetadata,
        entity: &EntityRef,
    ) -> AuditResult<FieldDiff>
    where
        H: MetadataSource + ?Sized,
    {
        host.materialize(entity)?;
        let summarizer = EntitySummarizer::new(self.normalizer);
        let mut diff = FieldDiff::new();

        for (field, value) in entity.declared_fields() {
            if !self.policy.is_audited_field(&meta.name, &field) {
                continue;
            }

            let old = match &value {
                RawValue::Collection(_) => continue,
                RawValue::Entity(related) => {
                    NormalizedValue::Text(summarizer.summarize(host, related)?.label)
                }
                _ => match meta.field_mapping(&field) {
                    Some(mapping) => {
                        self.normalizer
                            .normalize(&mapping.type_kind, &value, &mapping.options)?
                    }
                    None => self.normalizer.normalize_unmapped(&value)?,
                },
            };

            diff.insert(field, old, NormalizedValue::Null);
        }

        Ok(diff)
    }
}

fn as_entity(value: &RawValue) -> Option<&EntityRef> {
    match value {
        RawValue::Entity(entity) => Some(entity),
        _ => None,
    }
}
