//! Rule-by-rule comparison of two rule sets.
//!
//! Used by the merger to flag narrowing overrides and by the evolution
//! analyzer to classify schema changes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{Bound, Constraint, DecimalRules, RuleSet, RuleValue};

/// Direction of a single rule change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleChangeKind {
    /// A constraint now exists where the dimension was unconstrained
    Added,
    /// A constraint was dropped
    Removed,
    /// The bound now admits a strict superset of values
    Relaxed,
    /// The bound now admits a strict subset of values
    Narrowed,
    /// The bound changed in a way that is neither wider nor narrower
    Replaced,
}

impl RuleChangeKind {
    /// Whether previously valid data may become invalid
    pub fn is_narrowing(&self) -> bool {
        matches!(
            self,
            RuleChangeKind::Added | RuleChangeKind::Narrowed | RuleChangeKind::Replaced
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleChangeKind::Added => "added",
            RuleChangeKind::Removed => "removed",
            RuleChangeKind::Relaxed => "relaxed",
            RuleChangeKind::Narrowed => "narrowed",
            RuleChangeKind::Replaced => "replaced",
        }
    }
}

impl fmt::Display for RuleChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One changed rule, with the JSON rendering of both sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleChange {
    pub rule: String,
    pub kind: RuleChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Lists every rule that differs between `old` and `new`.
///
/// Rule sets of different data types compare as a single `type` replacement.
pub fn diff_rules(old: &RuleSet, new: &RuleSet) -> Vec<RuleChange> {
    if old.data_type() != new.data_type() {
        return vec![RuleChange {
            rule: "type".into(),
            kind: RuleChangeKind::Replaced,
            old: Some(Value::String(old.data_type().type_name().into())),
            new: Some(Value::String(new.data_type().type_name().into())),
        }];
    }

    let old_constraints = old.constraints();
    let new_constraints = new.constraints();

    let mut names: Vec<&'static str> = old_constraints
        .iter()
        .chain(new_constraints.iter())
        .map(|c| c.name)
        .collect();
    names.sort_unstable();
    names.dedup();

    let mut changes: Vec<RuleChange> = names
        .into_iter()
        .filter_map(|name| {
            let before = old_constraints.iter().find(|c| c.name == name);
            let after = new_constraints.iter().find(|c| c.name == name);
            compare(before, after).map(|kind| RuleChange {
                rule: name.to_string(),
                kind,
                old: before.map(|c| c.value.to_json()),
                new: after.map(|c| c.value.to_json()),
            })
        })
        .collect();

    if let (RuleSet::Decimal(old), RuleSet::Decimal(new)) = (old, new) {
        changes.extend(integer_digits_change(old, new));
    }
    changes
}

/// Digits left of the point under `precision`, after `scale` is reserved
fn integer_room(rules: &DecimalRules) -> Option<u32> {
    rules
        .precision
        .map(|precision| precision.saturating_sub(rules.scale.unwrap_or(0)))
}

/// Precision and scale together bound the integer part: a larger scale at
/// the same precision leaves fewer integer digits.
fn integer_digits_change(old: &DecimalRules, new: &DecimalRules) -> Option<RuleChange> {
    match (integer_room(old), integer_room(new)) {
        (Some(before), Some(after)) if after < before => Some(RuleChange {
            rule: "integer_digits".into(),
            kind: RuleChangeKind::Narrowed,
            old: Some(Value::from(before)),
            new: Some(Value::from(after)),
        }),
        _ => None,
    }
}

/// Returns `None` when the constraint is unchanged.
fn compare(before: Option<&Constraint>, after: Option<&Constraint>) -> Option<RuleChangeKind> {
    match (before, after) {
        (None, None) => None,
        (None, Some(_)) => Some(RuleChangeKind::Added),
        (Some(_), None) => Some(RuleChangeKind::Removed),
        (Some(b), Some(a)) if b.value == a.value => None,
        (Some(b), Some(a)) => Some(compare_values(a.bound, &b.value, &a.value)),
    }
}

fn compare_values(bound: Bound, old: &RuleValue, new: &RuleValue) -> RuleChangeKind {
    match bound {
        Bound::Lower => match order(old, new) {
            Some(std::cmp::Ordering::Less) => RuleChangeKind::Narrowed,
            Some(std::cmp::Ordering::Greater) => RuleChangeKind::Relaxed,
            _ => RuleChangeKind::Replaced,
        },
        Bound::Upper => match order(old, new) {
            Some(std::cmp::Ordering::Greater) => RuleChangeKind::Narrowed,
            Some(std::cmp::Ordering::Less) => RuleChangeKind::Relaxed,
            _ => RuleChangeKind::Replaced,
        },
        Bound::Step => step_change(old, new),
        Bound::OneOf => set_change(old, new, false),
        Bound::AllOf => set_change(old, new, true),
        Bound::Exact => RuleChangeKind::Replaced,
    }
}

fn order(old: &RuleValue, new: &RuleValue) -> Option<std::cmp::Ordering> {
    match (old, new) {
        (RuleValue::Int(a), RuleValue::Int(b)) => Some(a.cmp(b)),
        (RuleValue::Number(a), RuleValue::Number(b)) => a.partial_cmp(b),
        (RuleValue::Date(a), RuleValue::Date(b)) => Some(a.cmp(b)),
        (RuleValue::DateTime(a), RuleValue::DateTime(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// A new step that is a multiple of the old one admits a subset of values.
fn step_change(old: &RuleValue, new: &RuleValue) -> RuleChangeKind {
    match (old, new) {
        (RuleValue::Int(a), RuleValue::Int(b)) if *a != 0 && *b != 0 => {
            if b % a == 0 {
                RuleChangeKind::Narrowed
            } else if a % b == 0 {
                RuleChangeKind::Relaxed
            } else {
                RuleChangeKind::Replaced
            }
        }
        (RuleValue::Number(a), RuleValue::Number(b)) if *a > 0.0 && *b > 0.0 => {
            if is_multiple(*b, *a) {
                RuleChangeKind::Narrowed
            } else if is_multiple(*a, *b) {
                RuleChangeKind::Relaxed
            } else {
                RuleChangeKind::Replaced
            }
        }
        _ => RuleChangeKind::Replaced,
    }
}

fn is_multiple(value: f64, step: f64) -> bool {
    let ratio = value / step;
    (ratio - ratio.round()).abs() < 1e-9
}

/// For `OneOf` a smaller set is stricter; for `AllOf` a larger one is.
fn set_change(old: &RuleValue, new: &RuleValue, superset_is_stricter: bool) -> RuleChangeKind {
    let (shrunk, grew) = match (old, new) {
        (RuleValue::TextSet(a), RuleValue::TextSet(b)) => (b.is_subset(a), b.is_superset(a)),
        (RuleValue::IntSet(a), RuleValue::IntSet(b)) => (b.is_subset(a), b.is_superset(a)),
        _ => return RuleChangeKind::Replaced,
    };
    match (shrunk, grew, superset_is_stricter) {
        (true, _, false) | (_, true, true) => RuleChangeKind::Narrowed,
        (_, true, false) | (true, _, true) => RuleChangeKind::Relaxed,
        _ => RuleChangeKind::Replaced,
    }
}
