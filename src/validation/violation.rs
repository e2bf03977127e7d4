//! Validation violations and outcomes

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::value::TypedValue;

/// What kind of problem a violation reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required attribute is absent and has no default
    MissingRequired,
    /// The candidate names an attribute the class does not have
    UnknownAttribute,
    /// The value could not be converted to the attribute's data type
    InvalidType,
    /// The value has the right type but breaks a rule
    RuleViolated,
}

/// A single validation failure.
///
/// `rule` is the rule name (`min`, `pattern`, `required`, ...) and `value`
/// the observed candidate value, when there is one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub field: String,
    pub kind: ViolationKind,
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub message: String,
}

impl Violation {
    pub fn missing_required(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: ViolationKind::MissingRequired,
            rule: "required".into(),
            value: None,
            message: "required attribute is missing and has no default".into(),
        }
    }

    pub fn unknown_attribute(field: impl Into<String>, value: &Value) -> Self {
        Self {
            field: field.into(),
            kind: ViolationKind::UnknownAttribute,
            rule: "unknown".into(),
            value: Some(value.clone()),
            message: "attribute is not part of the class schema".into(),
        }
    }

    pub fn invalid_type(field: impl Into<String>, expected: &str, found: &str, value: &Value) -> Self {
        Self {
            field: field.into(),
            kind: ViolationKind::InvalidType,
            rule: "type".into(),
            value: Some(value.clone()),
            message: format!("expected {}, got {}", expected, found),
        }
    }

    pub fn rule(
        field: impl Into<String>,
        rule: impl Into<String>,
        value: &Value,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            kind: ViolationKind::RuleViolated,
            rule: rule.into(),
            value: Some(value.clone()),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field '{}' [{}]: {}", self.field, self.rule, self.message)?;
        if let Some(value) = &self.value {
            write!(f, " (value: {})", value)?;
        }
        Ok(())
    }
}

/// Candidate data that passed validation, in typed form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRecord {
    pub class_id: String,
    /// Content hash of the schema the record was validated against
    pub schema_hash: String,
    pub values: BTreeMap<String, TypedValue>,
    /// Attributes filled from their assignment default
    pub defaulted: Vec<String>,
}

/// Result of validating a candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accepted(ValidatedRecord),
    Rejected(Vec<Violation>),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }

    /// All violations; empty when accepted
    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationOutcome::Accepted(_) => &[],
            ValidationOutcome::Rejected(violations) => violations,
        }
    }

    pub fn record(&self) -> Option<&ValidatedRecord> {
        match self {
            ValidationOutcome::Accepted(record) => Some(record),
            ValidationOutcome::Rejected(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_violation_display() {
        let v = Violation::rule("age", "min", &json!(-1), "value is below 0");
        let display = v.to_string();
        assert!(display.contains("age"));
        assert!(display.contains("[min]"));
        assert!(display.contains("-1"));
    }

    #[test]
    fn test_missing_required_shape() {
        let v = Violation::missing_required("age");
        assert_eq!(v.rule, "required");
        assert_eq!(v.kind, ViolationKind::MissingRequired);
        assert!(v.value.is_none());
    }

    #[test]
    fn test_outcome_accessors() {
        let rejected = ValidationOutcome::Rejected(vec![Violation::missing_required("age")]);
        assert!(!rejected.is_accepted());
        assert_eq!(rejected.violations().len(), 1);
        assert!(rejected.record().is_none());

        let serialized = serde_json::to_value(&rejected).unwrap();
        assert_eq!(serialized["outcome"], "rejected");
        assert_eq!(serialized["detail"][0]["rule"], "required");
    }
}
