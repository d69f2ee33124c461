//! Canonical, storable field values

use std::fmt;

use serde::Serialize;

use super::summary::EntitySummary;

/// A field value after type-aware normalization
///
/// Serializes to plain JSON: numbers stay numbers except decimals and big
/// integers, which are kept as strings so no precision is lost.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Null,
    Integer(i64),
    /// Fixed-point decimal with `.` separator and no grouping
    Decimal(String),
    BigInt(String),
    Boolean(bool),
    Float(f64),
    /// Base64-encoded binary content
    Binary(String),
    Summary(Box<EntitySummary>),
    /// Opaque fallback representation
    Text(String),
}

impl NormalizedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, NormalizedValue::Null)
    }

    pub fn text(value: impl Into<String>) -> Self {
        NormalizedValue::Text(value.into())
    }
}

impl From<Option<EntitySummary>> for NormalizedValue {
    fn from(summary: Option<EntitySummary>) -> Self {
        summary.map_or(NormalizedValue::Null, |s| NormalizedValue::Summary(Box::new(s)))
    }
}

/// String form used for `object_id` and synthesized labels
impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::Null => Ok(()),
            NormalizedValue::Integer(n) => write!(f, "{}", n),
            NormalizedValue::Decimal(s)
            | NormalizedValue::BigInt(s)
            | NormalizedValue::Binary(s)
            | NormalizedValue::Text(s) => f.write_str(s),
            NormalizedValue::Boolean(b) => write!(f, "{}", b),
            NormalizedValue::Float(x) => write!(f, "{}", x),
            NormalizedValue::Summary(summary) => f.write_str(&summary.label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_plain_json() {
        let values = vec![
            NormalizedValue::Null,
            NormalizedValue::Integer(30),
            NormalizedValue::Decimal("10.00".into()),
            NormalizedValue::BigInt("9223372036854775807".into()),
            NormalizedValue::Boolean(true),
            NormalizedValue::Float(1.5),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(
            json,
            r#"[null,30,"10.00","9223372036854775807",true,1.5]"#
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(NormalizedValue::Null.to_string(), "");
        assert_eq!(NormalizedValue::Integer(42).to_string(), "42");
        assert_eq!(NormalizedValue::text("abc").to_string(), "abc");
    }

    #[test]
    fn test_decimal_and_text_are_distinct() {
        // same digits, different kinds
        assert_ne!(
            NormalizedValue::Decimal("1".into()),
            NormalizedValue::Text("1".into())
        );
    }
}
