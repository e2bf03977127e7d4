//! Rule merging
//!
//! Combines an attribute's base rules with an assignment's override rules.
//! Per field: an override value replaces the base, an absent override
//! inherits the base, both absent stays unconstrained.
//!
//! Merging is pure and total. Narrowing overrides are reported as
//! advisories, never as failures.

use serde::Serialize;

use super::diff::{diff_rules, RuleChange};
use super::types::{
    BooleanRules, DateRules, DateTimeRules, DecimalRules, DocumentRules, IntegerRules,
    ReferenceRules, RuleSet, StringRules,
};

/// Result of merging base and override rules for one attribute in one class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveRuleSet {
    /// The merged rules
    pub rules: RuleSet,
    /// Fields where the override strictly narrows the base
    pub narrowed: Vec<RuleChange>,
    /// The override targeted another data type and was ignored
    pub override_ignored: bool,
}

/// Stateless rule merger
pub struct RuleMerger;

impl RuleMerger {
    /// Merges `over` onto `base`.
    pub fn merge(base: &RuleSet, over: &RuleSet) -> EffectiveRuleSet {
        let merged = match (base, over) {
            (RuleSet::String(b), RuleSet::String(o)) => RuleSet::String(overlay_string(b, o)),
            (RuleSet::Integer(b), RuleSet::Integer(o)) => RuleSet::Integer(overlay_integer(b, o)),
            (RuleSet::Decimal(b), RuleSet::Decimal(o)) => RuleSet::Decimal(overlay_decimal(b, o)),
            (RuleSet::Boolean(_), RuleSet::Boolean(_)) => RuleSet::Boolean(BooleanRules {}),
            (RuleSet::Date(b), RuleSet::Date(o)) => RuleSet::Date(overlay_date(b, o)),
            (RuleSet::Datetime(b), RuleSet::Datetime(o)) => {
                RuleSet::Datetime(overlay_datetime(b, o))
            }
            (RuleSet::Document(b), RuleSet::Document(o)) => {
                RuleSet::Document(overlay_document(b, o))
            }
            (RuleSet::Reference(b), RuleSet::Reference(o)) => {
                RuleSet::Reference(overlay_reference(b, o))
            }
            // Structural checks reject mismatched overrides before they are stored
            _ => {
                return EffectiveRuleSet {
                    rules: base.clone(),
                    narrowed: Vec::new(),
                    override_ignored: true,
                }
            }
        };

        let narrowed = diff_rules(base, &merged)
            .into_iter()
            .filter(|change| change.kind.is_narrowing())
            .collect();

        EffectiveRuleSet {
            rules: merged,
            narrowed,
            override_ignored: false,
        }
    }

    /// Merges an optional override; `None` yields the base unchanged.
    pub fn merge_optional(base: &RuleSet, over: Option<&RuleSet>) -> EffectiveRuleSet {
        match over {
            Some(over) => Self::merge(base, over),
            None => EffectiveRuleSet {
                rules: base.clone(),
                narrowed: Vec::new(),
                override_ignored: false,
            },
        }
    }
}

fn overlay_string(b: &StringRules, o: &StringRules) -> StringRules {
    StringRules {
        min_length: o.min_length.or(b.min_length),
        max_length: o.max_length.or(b.max_length),
        pattern: o.pattern.clone().or_else(|| b.pattern.clone()),
        allowed_values: o.allowed_values.clone().or_else(|| b.allowed_values.clone()),
    }
}

fn overlay_integer(b: &IntegerRules, o: &IntegerRules) -> IntegerRules {
    IntegerRules {
        min: o.min.or(b.min),
        max: o.max.or(b.max),
        multiple_of: o.multiple_of.or(b.multiple_of),
        allowed_values: o.allowed_values.clone().or_else(|| b.allowed_values.clone()),
    }
}

fn overlay_decimal(b: &DecimalRules, o: &DecimalRules) -> DecimalRules {
    DecimalRules {
        min: o.min.or(b.min),
        max: o.max.or(b.max),
        multiple_of: o.multiple_of.or(b.multiple_of),
        precision: o.precision.or(b.precision),
        scale: o.scale.or(b.scale),
    }
}

fn overlay_date(b: &DateRules, o: &DateRules) -> DateRules {
    DateRules {
        min: o.min.or(b.min),
        max: o.max.or(b.max),
    }
}

fn overlay_datetime(b: &DateTimeRules, o: &DateTimeRules) -> DateTimeRules {
    DateTimeRules {
        min: o.min.or(b.min),
        max: o.max.or(b.max),
        timezone: o.timezone.clone().or_else(|| b.timezone.clone()),
    }
}

fn overlay_document(b: &DocumentRules, o: &DocumentRules) -> DocumentRules {
    DocumentRules {
        max_depth: o.max_depth.or(b.max_depth),
        required_keys: o.required_keys.clone().or_else(|| b.required_keys.clone()),
    }
}

fn overlay_reference(b: &ReferenceRules, o: &ReferenceRules) -> ReferenceRules {
    ReferenceRules {
        cardinality: o.cardinality.or(b.cardinality),
        target_class: o.target_class.clone().or_else(|| b.target_class.clone()),
    }
}
