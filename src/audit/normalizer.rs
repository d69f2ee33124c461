//! Type-aware value normalization
//!
//! Converts raw host values into `NormalizedValue`s through a registry of
//! converters keyed by `TypeKind`. Types without a dedicated converter go
//! through the fallback entry, which delegates to the value's own storable
//! representation. New scalar types are supported by registering a
//! converter; the dispatch in `normalize` never changes.

use std::collections::HashMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};

use super::value::NormalizedValue;
use crate::error::{AuditError, AuditResult};
use crate::host::{MappingOptions, RawValue, TypeKind};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// Converts one raw value of a given type into its storable form
pub trait ValueConverter {
    fn convert(&self, value: &RawValue, options: &MappingOptions) -> AuditResult<NormalizedValue>;
}

impl<F> ValueConverter for F
where
    F: Fn(&RawValue, &MappingOptions) -> AuditResult<NormalizedValue>,
{
    fn convert(&self, value: &RawValue, options: &MappingOptions) -> AuditResult<NormalizedValue> {
        self(value, options)
    }
}

/// Registry-based value normalizer
pub struct ValueNormalizer {
    converters: HashMap<TypeKind, Box<dyn ValueConverter>>,
    fallback: Option<Box<dyn ValueConverter>>,
}

impl ValueNormalizer {
    /// Normalizer with the built-in converters and the storable-value fallback
    pub fn new() -> Self {
        let mut normalizer = Self::empty();
        normalizer.register(TypeKind::Decimal, convert_decimal);
        normalizer.register(TypeKind::BigInt, convert_big_int);
        normalizer.register(TypeKind::Integer, convert_integer);
        normalizer.register(TypeKind::SmallInt, convert_integer);
        normalizer.register(TypeKind::Float, convert_float);
        normalizer.register(TypeKind::Boolean, convert_boolean);
        normalizer.register(TypeKind::Blob, convert_binary);
        normalizer.register(TypeKind::Binary, convert_binary);
        normalizer.set_fallback(convert_storable);
        normalizer
    }

    /// Normalizer with no converters at all
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
            fallback: None,
        }
    }

    /// Drop the fallback entry so unregistered types are rejected
    pub fn without_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    /// Register (or replace) the converter for a type kind
    pub fn register(&mut self, kind: TypeKind, converter: impl ValueConverter + 'static) {
        self.converters.insert(kind, Box::new(converter));
    }

    pub fn set_fallback(&mut self, converter: impl ValueConverter + 'static) {
        self.fallback = Some(Box::new(converter));
    }

    pub fn has_converter(&self, kind: &TypeKind) -> bool {
        self.converters.contains_key(kind)
    }

    /// Normalize a value of a declared field type
    pub fn normalize(
        &self,
        kind: &TypeKind,
        value: &RawValue,
        options: &MappingOptions,
    ) -> AuditResult<NormalizedValue> {
        if value.is_null() {
            return Ok(NormalizedValue::Null);
        }

        let converter = self
            .converters
            .get(kind)
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                AuditError::unsupported(kind.name(), "no converter registered and no fallback")
            })?;

        converter.convert(value, options).map_err(|err| match err {
            AuditError::UnsupportedType { reason, .. } => AuditError::unsupported(kind.name(), reason),
            other => other,
        })
    }

    /// Normalize a value that has no field mapping, using the fallback entry
    pub fn normalize_unmapped(&self, value: &RawValue) -> AuditResult<NormalizedValue> {
        if value.is_null() {
            return Ok(NormalizedValue::Null);
        }
        let fallback = self.fallback.as_ref().ok_or_else(|| {
            AuditError::unsupported(value.kind_name(), "unmapped value and no fallback")
        })?;
        fallback.convert(value, &MappingOptions::default())
    }
}

impl Default for ValueNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValueNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.converters.keys().map(TypeKind::name).collect();
        kinds.sort_unstable();
        f.debug_struct("ValueNormalizer")
            .field("converters", &kinds)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

fn rejected(value: &RawValue) -> AuditError {
    AuditError::unsupported(
        value.kind_name(),
        format!("cannot convert a {} value", value.kind_name()),
    )
}

/// Fixed-point with the declared scale; plain string when no scale is mapped
pub fn convert_decimal(value: &RawValue, options: &MappingOptions) -> AuditResult<NormalizedValue> {
    let text = match value {
        RawValue::Int(n) => n.to_string(),
        RawValue::BigInt(n) => n.to_string(),
        RawValue::Float(x) if x.is_finite() => x.to_string(),
        RawValue::Decimal(s) | RawValue::Text(s) => s.trim().to_string(),
        other => return Err(rejected(other)),
    };

    let Some(scale) = options.scale else {
        return Ok(NormalizedValue::Decimal(text));
    };

    format_fixed(&text, scale as usize)
        .or_else(|| {
            text.parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .and_then(|x| format_fixed(&x.to_string(), scale as usize))
        })
        .map(NormalizedValue::Decimal)
        .ok_or_else(|| AuditError::unsupported("decimal", format!("'{}' is not a number", text)))
}

/// Always a string, never a native number
pub fn convert_big_int(value: &RawValue, _options: &MappingOptions) -> AuditResult<NormalizedValue> {
    let text = match value {
        RawValue::Int(n) => n.to_string(),
        RawValue::BigInt(n) => n.to_string(),
        RawValue::Decimal(s) | RawValue::Text(s) => s.trim().to_string(),
        RawValue::Float(x) if x.is_finite() && x.fract() == 0.0 => format!("{:.0}", x),
        RawValue::Bool(b) => u8::from(*b).to_string(),
        other => return Err(rejected(other)),
    };
    Ok(NormalizedValue::BigInt(text))
}

pub fn convert_integer(value: &RawValue, _options: &MappingOptions) -> AuditResult<NormalizedValue> {
    let n = match value {
        RawValue::Int(n) => *n,
        RawValue::BigInt(n) => i64::try_from(*n).map_err(|_| {
            AuditError::unsupported("integer", format!("{} does not fit in 64 bits", n))
        })?,
        RawValue::Bool(b) => i64::from(*b),
        RawValue::Float(x) if x.is_finite() => x.trunc() as i64,
        RawValue::Decimal(s) | RawValue::Text(s) => parse_integer(s).ok_or_else(|| {
            AuditError::unsupported("integer", format!("'{}' is not an integer", s))
        })?,
        other => return Err(rejected(other)),
    };
    Ok(NormalizedValue::Integer(n))
}

pub fn convert_float(value: &RawValue, _options: &MappingOptions) -> AuditResult<NormalizedValue> {
    let x = match value {
        RawValue::Float(x) => *x,
        RawValue::Int(n) => *n as f64,
        RawValue::BigInt(n) => *n as f64,
        RawValue::Bool(b) => f64::from(u8::from(*b)),
        RawValue::Decimal(s) | RawValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            AuditError::unsupported("float", format!("'{}' is not a number", s))
        })?,
        other => return Err(rejected(other)),
    };
    Ok(NormalizedValue::Float(x))
}

pub fn convert_boolean(value: &RawValue, _options: &MappingOptions) -> AuditResult<NormalizedValue> {
    let b = match value {
        RawValue::Bool(b) => *b,
        RawValue::Int(n) => *n != 0,
        RawValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" | "on" => true,
            "0" | "false" | "f" | "no" | "n" | "off" | "" => false,
            _ => {
                return Err(AuditError::unsupported(
                    "boolean",
                    format!("'{}' is not a boolean", s),
                ))
            }
        },
        other => return Err(rejected(other)),
    };
    Ok(NormalizedValue::Boolean(b))
}

/// Base64 of the full content; streams are rewound after reading
pub fn convert_binary(value: &RawValue, _options: &MappingOptions) -> AuditResult<NormalizedValue> {
    let encoded = match value {
        RawValue::Bytes(bytes) => STANDARD.encode(bytes),
        RawValue::Stream(stream) => STANDARD.encode(stream.read_and_rewind()?),
        RawValue::Text(s) => STANDARD.encode(s.as_bytes()),
        other => return Err(rejected(other)),
    };
    Ok(NormalizedValue::Binary(encoded))
}

/// Fallback: the value's own storable representation
pub fn convert_storable(value: &RawValue, _options: &MappingOptions) -> AuditResult<NormalizedValue> {
    let normalized = match value {
        RawValue::Null => NormalizedValue::Null,
        RawValue::Bool(b) => NormalizedValue::Boolean(*b),
        RawValue::Int(n) => NormalizedValue::Integer(*n),
        RawValue::BigInt(n) => NormalizedValue::BigInt(n.to_string()),
        RawValue::Float(x) => NormalizedValue::Float(*x),
        RawValue::Decimal(s) | RawValue::Text(s) => NormalizedValue::Text(s.clone()),
        RawValue::DateTime(dt) => NormalizedValue::Text(dt.format(DATETIME_FORMAT).to_string()),
        RawValue::Date(d) => NormalizedValue::Text(d.format(DATE_FORMAT).to_string()),
        RawValue::Time(t) => NormalizedValue::Text(t.format(TIME_FORMAT).to_string()),
        RawValue::Json(json) => NormalizedValue::Text(serde_json::to_string(json)?),
        RawValue::Custom(custom) => custom.to_storable()?,
        other => return Err(rejected(other)),
    };
    Ok(normalized)
}

fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|x| x.is_finite() && x.abs() < i64::MAX as f64)
            .map(|x| x.trunc() as i64)
    })
}

/// Round a plain decimal string to `scale` fractional digits, half away
/// from zero. Returns `None` if the text is not a plain decimal.
fn format_fixed(text: &str, scale: usize) -> Option<String> {
    let text = text.trim();
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut digits: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes().chain(std::iter::repeat(b'0')).take(scale))
        .map(|b| b - b'0')
        .collect();

    if frac_part.as_bytes().get(scale).is_some_and(|d| *d >= b'5') {
        let mut i = digits.len();
        loop {
            if i == 0 {
                digits.insert(0, 1);
                break;
            }
            i -= 1;
            if digits[i] == 9 {
                digits[i] = 0;
            } else {
                digits[i] += 1;
                break;
            }
        }
    }

    let split = digits.len() - scale;
    let int_digits: String = digits[..split].iter().map(|d| char::from(b'0' + d)).collect();
    let frac_digits: String = digits[split..].iter().map(|d| char::from(b'0' + d)).collect();
    let int_digits = int_digits.trim_start_matches('0');

    let mut out = String::new();
    if negative && digits.iter().any(|d| *d != 0) {
        out.push('-');
    }
    out.push_str(if int_digits.is_empty() { "0" } else { int_digits });
    if scale > 0 {
        out.push('.');
        out.push_str(&frac_digits);
    }
    Some(out)
}
