//! Change record data structures
//!
//! Defines the action kinds, the per-kind change payloads and the record
//! the collector hands over to the writer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diff::{FieldDiff, RelationDiff};
use super::value::NormalizedValue;
use crate::error::{AuditError, AuditResult};
use crate::host::EntityRef;

/// Kinds of mutations that can be audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Entity was created
    #[serde(rename = "INS")]
    Insert,
    /// Entity was updated
    #[serde(rename = "UPD")]
    Update,
    /// Entity was deleted
    #[serde(rename = "DEL")]
    Delete,
    /// Element added to a relation collection
    #[serde(rename = "CASC")]
    Associate,
    /// Element removed from a relation collection
    #[serde(rename = "CDSC")]
    Dissociate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Insert,
        ActionKind::Update,
        ActionKind::Delete,
        ActionKind::Associate,
        ActionKind::Dissociate,
    ];

    /// Code stored in the `type` column
    pub fn code(&self) -> &'static str {
        match self {
            ActionKind::Insert => "INS",
            ActionKind::Update => "UPD",
            ActionKind::Delete => "DEL",
            ActionKind::Associate => "CASC",
            ActionKind::Dissociate => "CDSC",
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Insert => "insert",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::Associate => "associate",
            ActionKind::Dissociate => "dissociate",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Accepts either the stored code or the lowercase name
impl FromStr for ActionKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(s) || kind.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| AuditError::Validation(format!("Unknown action type: {}", s)))
    }
}

/// Identity of the entity a record is about
#[derive(Debug, Clone)]
pub enum SubjectId {
    /// Resolved while collecting
    Assigned(NormalizedValue),
    /// Host-generated key, resolved from the entity when the record is written
    Deferred(EntityRef),
}

impl SubjectId {
    pub fn is_deferred(&self) -> bool {
        matches!(self, SubjectId::Deferred(_))
    }
}

/// Payload of a change record, one shape per action kind
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(FieldDiff),
    Update(FieldDiff),
    Delete(FieldDiff),
    Associate(RelationDiff),
    Dissociate(RelationDiff),
}

impl Change {
    pub fn action(&self) -> ActionKind {
        match self {
            Change::Insert(_) => ActionKind::Insert,
            Change::Update(_) => ActionKind::Update,
            Change::Delete(_) => ActionKind::Delete,
            Change::Associate(_) => ActionKind::Associate,
            Change::Dissociate(_) => ActionKind::Dissociate,
        }
    }

    /// JSON text stored in the `diff` column
    pub fn to_json(&self) -> AuditResult<String> {
        let json = match self {
            Change::Insert(diff) | Change::Update(diff) | Change::Delete(diff) => {
                serde_json::to_string(diff)?
            }
            Change::Associate(relation) | Change::Dissociate(relation) => {
                serde_json::to_string(relation)?
            }
        };
        Ok(json)
    }
}

/// One captured mutation, immutable once collected
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    /// Source table of the audited entity
    pub table_name: String,
    pub schema_name: Option<String>,
    pub subject: SubjectId,
    pub change: Change,
    /// Actor resolved at capture time
    pub actor: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn action(&self) -> ActionKind {
        self.change.action()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::summary::EntitySummary;

    fn summary(class: &str, id: i64) -> EntitySummary {
        EntitySummary {
            label: format!("{}#{}", class, id),
            class_name: class.to_string(),
            table_name: "t".to_string(),
            primary_key_field: "id".to_string(),
            primary_key_value: NormalizedValue::Integer(id),
        }
    }

    #[test]
    fn test_action_codes_fit_type_column() {
        for kind in ActionKind::ALL {
            assert!(kind.code().len() <= 10);
        }
        assert_eq!(ActionKind::Associate.to_string(), "CASC");
        assert_eq!(ActionKind::Dissociate.code(), "CDSC");
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("UPD".parse::<ActionKind>().unwrap(), ActionKind::Update);
        assert_eq!("ins".parse::<ActionKind>().unwrap(), ActionKind::Insert);
        assert_eq!("delete".parse::<ActionKind>().unwrap(), ActionKind::Delete);
        assert!("merge".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_action_serializes_as_code() {
        assert_eq!(
            serde_json::to_string(&ActionKind::Associate).unwrap(),
            "\"CASC\""
        );
        let kind: ActionKind = serde_json::from_str("\"DEL\"").unwrap();
        assert_eq!(kind, ActionKind::Delete);
    }

    #[test]
    fn test_change_payload_json() {
        let mut diff = FieldDiff::new();
        diff.insert("name", NormalizedValue::text("Alice"), NormalizedValue::Null);
        let change = Change::Delete(diff);
        assert_eq!(change.action(), ActionKind::Delete);
        assert_eq!(
            change.to_json().unwrap(),
            r#"{"name":{"old":"Alice","new":null}}"#
        );

        let relation = Change::Associate(RelationDiff {
            source: summary("A", 1),
            target: summary("B", 2),
            table: None,
        });
        let json: serde_json::Value = serde_json::from_str(&relation.to_json().unwrap()).unwrap();
        assert_eq!(json["source"]["id"], 1);
        assert_eq!(json["target"]["id"], 2);
        assert!(json.get("table").is_none());
    }
}
