//! Rule type definitions
//!
//! Supported data types:
//! - string: UTF-8 text
//! - integer: 64-bit signed integer
//! - decimal: fixed-point decimal (precision/scale constrained)
//! - boolean
//! - date: calendar date
//! - datetime: instant with timezone interpretation
//! - document: structured JSON document
//! - reference: identifier(s) of other entities
//!
//! Every rule field is optional. An absent field means "unconstrained".

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{EngineError, EngineResult};

/// Attribute data type. Immutable once an attribute is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    Datetime,
    Document,
    Reference,
}

impl DataType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Datetime => "datetime",
            DataType::Document => "document",
            DataType::Reference => "reference",
        }
    }

    pub fn all() -> [DataType; 8] {
        [
            DataType::String,
            DataType::Integer,
            DataType::Decimal,
            DataType::Boolean,
            DataType::Date,
            DataType::Datetime,
            DataType::Document,
            DataType::Reference,
        ]
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StringRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntegerRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<BTreeSet<i64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecimalRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<f64>,
    /// Maximum number of significant digits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Maximum number of fractional digits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BooleanRules {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DateRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DateTimeRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<DateTime<Utc>>,
    /// IANA zone used to interpret candidates that carry no offset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_keys: Option<BTreeSet<String>>,
}

/// How many entities a reference value may point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::One => "one",
            Cardinality::Many => "many",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReferenceRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_class: Option<String>,
}

/// A type-specific validation rule set.
///
/// Serialized with an explicit `type` tag so a rule set is never applied
/// to an attribute of another data type by accident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleSet {
    String(StringRules),
    Integer(IntegerRules),
    Decimal(DecimalRules),
    Boolean(BooleanRules),
    Date(DateRules),
    Datetime(DateTimeRules),
    Document(DocumentRules),
    Reference(ReferenceRules),
}

impl RuleSet {
    /// The empty rule set for a data type
    pub fn unconstrained(data_type: DataType) -> Self {
        match data_type {
            DataType::String => RuleSet::String(StringRules::default()),
            DataType::Integer => RuleSet::Integer(IntegerRules::default()),
            DataType::Decimal => RuleSet::Decimal(DecimalRules::default()),
            DataType::Boolean => RuleSet::Boolean(BooleanRules::default()),
            DataType::Date => RuleSet::Date(DateRules::default()),
            DataType::Datetime => RuleSet::Datetime(DateTimeRules::default()),
            DataType::Document => RuleSet::Document(DocumentRules::default()),
            DataType::Reference => RuleSet::Reference(ReferenceRules::default()),
        }
    }

    /// Parse an untagged rule object for a known data type.
    ///
    /// Serde failures (unknown or misspelled keys, unknown cardinality,
    /// wrong JSON types) surface as `InvalidRuleSet`, never as a panic.
    pub fn from_json(data_type: DataType, raw: &Value) -> EngineResult<Self> {
        let mut tagged = match raw {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(EngineError::InvalidRuleSet(format!(
                    "rules must be an object, got {}",
                    other
                )))
            }
        };
        match tagged.get("type") {
            Some(Value::String(tag)) if tag != data_type.type_name() => {
                return Err(EngineError::InvalidRuleSet(format!(
                    "rule set is tagged '{}' but the data type is '{}'",
                    tag, data_type
                )));
            }
            _ => {}
        }
        tagged.insert("type".into(), json!(data_type.type_name()));
        serde_json::from_value(Value::Object(tagged))
            .map_err(|e| EngineError::InvalidRuleSet(e.to_string()))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            RuleSet::String(_) => DataType::String,
            RuleSet::Integer(_) => DataType::Integer,
            RuleSet::Decimal(_) => DataType::Decimal,
            RuleSet::Boolean(_) => DataType::Boolean,
            RuleSet::Date(_) => DataType::Date,
            RuleSet::Datetime(_) => DataType::Datetime,
            RuleSet::Document(_) => DataType::Document,
            RuleSet::Reference(_) => DataType::Reference,
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.constraints().is_empty()
    }

    /// Flattens the rule set into named constraints for comparison.
    pub fn constraints(&self) -> Vec<Constraint> {
        let mut out = Vec::new();
        match self {
            RuleSet::String(r) => {
                push(&mut out, "min_length", Bound::Lower, r.min_length.map(|v| RuleValue::Int(v as i64)));
                push(&mut out, "max_length", Bound::Upper, r.max_length.map(|v| RuleValue::Int(v as i64)));
                push(&mut out, "pattern", Bound::Exact, r.pattern.clone().map(RuleValue::Text));
                push(&mut out, "allowed_values", Bound::OneOf, r.allowed_values.clone().map(RuleValue::TextSet));
            }
            RuleSet::Integer(r) => {
                push(&mut out, "min", Bound::Lower, r.min.map(RuleValue::Int));
                push(&mut out, "max", Bound::Upper, r.max.map(RuleValue::Int));
                push(&mut out, "multiple_of", Bound::Step, r.multiple_of.map(RuleValue::Int));
                push(&mut out, "allowed_values", Bound::OneOf, r.allowed_values.clone().map(RuleValue::IntSet));
            }
            RuleSet::Decimal(r) => {
                push(&mut out, "min", Bound::Lower, r.min.map(RuleValue::Number));
                push(&mut out, "max", Bound::Upper, r.max.map(RuleValue::Number));
                push(&mut out, "multiple_of", Bound::Step, r.multiple_of.map(RuleValue::Number));
                push(&mut out, "precision", Bound::Upper, r.precision.map(|v| RuleValue::Int(v as i64)));
                push(&mut out, "scale", Bound::Upper, r.scale.map(|v| RuleValue::Int(v as i64)));
            }
            RuleSet::Boolean(_) => {}
            RuleSet::Date(r) => {
                push(&mut out, "min", Bound::Lower, r.min.map(RuleValue::Date));
                push(&mut out, "max", Bound::Upper, r.max.map(RuleValue::Date));
            }
            RuleSet::Datetime(r) => {
                push(&mut out, "min", Bound::Lower, r.min.map(RuleValue::DateTime));
                push(&mut out, "max", Bound::Upper, r.max.map(RuleValue::DateTime));
                push(&mut out, "timezone", Bound::Exact, r.timezone.clone().map(RuleValue::Text));
            }
            RuleSet::Document(r) => {
                push(&mut out, "max_depth", Bound::Upper, r.max_depth.map(|v| RuleValue::Int(v as i64)));
                push(&mut out, "required_keys", Bound::AllOf, r.required_keys.clone().map(RuleValue::TextSet));
            }
            RuleSet::Reference(r) => {
                push(
                    &mut out,
                    "cardinality",
                    Bound::Upper,
                    r.cardinality.map(|c| RuleValue::Int(if c == Cardinality::One { 1 } else { 2 })),
                );
                push(&mut out, "target_class", Bound::Exact, r.target_class.clone().map(RuleValue::Text));
            }
        }
        out
    }

    /// Renders the rule set without its type tag
    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("type");
        }
        value
    }
}

fn push(out: &mut Vec<Constraint>, name: &'static str, bound: Bound, value: Option<RuleValue>) {
    if let Some(value) = value {
        out.push(Constraint { name, bound, value });
    }
}

/// How a constraint restricts the value space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Larger is stricter
    Lower,
    /// Smaller is stricter
    Upper,
    /// Value must be a multiple of the step
    Step,
    /// Value must be one of the set; a subset is stricter
    OneOf,
    /// Value must contain all of the set; a superset is stricter
    AllOf,
    /// Any different value is incomparable
    Exact,
}

/// A single named rule value
#[derive(Debug, Clone, PartialEq)]
pub enum RuleValue {
    Int(i64),
    Number(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    TextSet(BTreeSet<String>),
    IntSet(BTreeSet<i64>),
}

impl RuleValue {
    pub fn to_json(&self) -> Value {
        match self {
            RuleValue::Int(v) => json!(v),
            RuleValue::Number(v) => json!(v),
            RuleValue::Text(v) => json!(v),
            RuleValue::Date(v) => json!(v.to_string()),
            RuleValue::DateTime(v) => json!(v.to_rfc3339()),
            RuleValue::TextSet(v) => json!(v),
            RuleValue::IntSet(v) => json!(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: &'static str,
    pub bound: Bound,
    pub value: RuleValue,
}
