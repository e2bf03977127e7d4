//! Typed attribute values
//!
//! Candidate data arrives as loosely typed JSON. It is converted exactly once,
//! at the validation boundary, into a `TypedValue`; everything downstream
//! works with typed values only.
//!
//! Coercion policy: one attempt per value.
//! - numeric string -> integer / decimal
//! - integral float -> integer
//! - number -> decimal
//! - number / bool -> string
//! - "true" / "false" -> boolean
//! - JSON text -> document
//! - single id -> reference list of one

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::rules::DataType;

/// A decimal number with the digit counts needed for precision/scale rules
#[derive(Debug, Clone, PartialEq)]
pub struct DecimalValue {
    text: String,
    value: f64,
    integer_digits: u32,
    scale: u32,
}

impl DecimalValue {
    /// Parses plain decimal notation (`-12.50`, `.5`, `7`).
    ///
    /// Exponent notation is accepted through `f64` and re-rendered in
    /// plain notation before digit counting.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::parse_plain(raw).or_else(|| {
            let value: f64 = raw.parse().ok()?;
            if !value.is_finite() {
                return None;
            }
            Self::parse_plain(&format!("{}", value))
        })
    }

    fn parse_plain(raw: &str) -> Option<Self> {
        let (negative, unsigned) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.strip_prefix('+').unwrap_or(raw)),
        };
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return None;
        }

        let significant_int = int_part.trim_start_matches('0');
        let mut text = String::with_capacity(raw.len() + 1);
        if negative {
            text.push('-');
        }
        text.push_str(if significant_int.is_empty() { "0" } else { significant_int });
        if !frac_part.is_empty() {
            text.push('.');
            text.push_str(frac_part);
        }

        let value: f64 = text.parse().ok()?;
        Some(Self {
            value,
            integer_digits: significant_int.len() as u32,
            scale: frac_part.len() as u32,
            text,
        })
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Self::parse_plain(&format!("{}", value))
    }

    pub fn as_f64(&self) -> f64 {
        self.value
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Total significant digits (at least 1)
    pub fn precision(&self) -> u32 {
        (self.integer_digits + self.scale).max(1)
    }

    pub fn integer_digits(&self) -> u32 {
        self.integer_digits
    }

    /// Fractional digits as written
    pub fn scale(&self) -> u32 {
        self.scale
    }
}

impl fmt::Display for DecimalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for DecimalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// A validated attribute value, tagged by data type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    String(String),
    Integer(i64),
    Decimal(DecimalValue),
    Boolean(bool),
    Date(NaiveDate),
    Datetime(DateTime<Utc>),
    Document(Value),
    Reference(Vec<String>),
}

impl TypedValue {
    pub fn data_type(&self) -> DataType {
        match self {
            TypedValue::String(_) => DataType::String,
            TypedValue::Integer(_) => DataType::Integer,
            TypedValue::Decimal(_) => DataType::Decimal,
            TypedValue::Boolean(_) => DataType::Boolean,
            TypedValue::Date(_) => DataType::Date,
            TypedValue::Datetime(_) => DataType::Datetime,
            TypedValue::Document(_) => DataType::Document,
            TypedValue::Reference(_) => DataType::Reference,
        }
    }

    /// Renders the value as canonical JSON for storage
    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::String(v) => json!(v),
            TypedValue::Integer(v) => json!(v),
            TypedValue::Decimal(v) => json!(v.as_str()),
            TypedValue::Boolean(v) => json!(v),
            TypedValue::Date(v) => json!(v.to_string()),
            TypedValue::Datetime(v) => json!(v.to_rfc3339()),
            TypedValue::Document(v) => v.clone(),
            TypedValue::Reference(ids) => json!(ids),
        }
    }
}

/// Renders a typed record as plain JSON
pub fn record_to_json(values: &BTreeMap<String, TypedValue>) -> Value {
    Value::Object(
        values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    )
}

/// Converts a raw JSON value into the attribute's data type.
///
/// `timezone` interprets datetimes written without an offset.
/// On failure returns a short description of what was found.
pub fn coerce(data_type: DataType, raw: &Value, timezone: Option<Tz>) -> Result<TypedValue, String> {
    match data_type {
        DataType::String => match raw {
            Value::String(s) => Ok(TypedValue::String(s.clone())),
            Value::Number(n) => Ok(TypedValue::String(n.to_string())),
            Value::Bool(b) => Ok(TypedValue::String(b.to_string())),
            other => Err(json_kind(other)),
        },
        DataType::Integer => match raw {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(TypedValue::Integer(i))
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                            Ok(TypedValue::Integer(f as i64))
                        }
                        _ => Err(format!("number {}", n)),
                    }
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(TypedValue::Integer)
                .map_err(|_| format!("string '{}'", s)),
            other => Err(json_kind(other)),
        },
        DataType::Decimal => match raw {
            Value::Number(n) => {
                let parsed = match n.as_i64() {
                    Some(i) => DecimalValue::parse_plain(&i.to_string()),
                    None => n.as_f64().and_then(DecimalValue::from_f64),
                };
                parsed.map(TypedValue::Decimal).ok_or_else(|| format!("number {}", n))
            }
            Value::String(s) => DecimalValue::parse(s)
                .map(TypedValue::Decimal)
                .ok_or_else(|| format!("string '{}'", s)),
            other => Err(json_kind(other)),
        },
        DataType::Boolean => match raw {
            Value::Bool(b) => Ok(TypedValue::Boolean(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(TypedValue::Boolean(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(TypedValue::Boolean(false)),
            other => Err(json_kind(other)),
        },
        DataType::Date => match raw {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(TypedValue::Date)
                .map_err(|_| format!("string '{}'", s)),
            other => Err(json_kind(other)),
        },
        DataType::Datetime => match raw {
            Value::String(s) => parse_datetime(s.trim(), timezone)
                .map(TypedValue::Datetime)
                .ok_or_else(|| format!("string '{}'", s)),
            other => Err(json_kind(other)),
        },
        DataType::Document => match raw {
            Value::Object(_) | Value::Array(_) => Ok(TypedValue::Document(raw.clone())),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(doc @ (Value::Object(_) | Value::Array(_))) => Ok(TypedValue::Document(doc)),
                _ => Err(format!("string '{}'", s)),
            },
            other => Err(json_kind(other)),
        },
        DataType::Reference => match raw {
            Value::String(s) if !s.trim().is_empty() => Ok(TypedValue::Reference(vec![s.clone()])),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
                    other => Err(format!("array containing {}", json_kind(other))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(TypedValue::Reference),
            other => Err(json_kind(other)),
        },
    }
}

fn parse_datetime(raw: &str, timezone: Option<Tz>) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())?;
    match timezone {
        // Ambiguous or skipped local times are rejected rather than guessed
        Some(tz) => tz.from_local_datetime(&naive).single().map(|dt| dt.with_timezone(&Utc)),
        None => Some(Utc.from_utc_datetime(&naive)),
    }
}

/// Returns the JSON type name for error messages.
pub fn json_kind(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "boolean".into(),
        Value::Number(_) => "number".into(),
        Value::String(_) => "string".into(),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

/// Nesting depth of a JSON document; scalars have depth 0.
pub fn document_depth(value: &Value) -> u32 {
    match value {
        Value::Object(map) => 1 + map.values().map(document_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(document_depth).max().unwrap_or(0),
        _ => 0,
    }
}
