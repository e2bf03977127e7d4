//! Validation rule sets
//!
//! Each attribute carries a base rule set typed by its data type; each
//! assignment may override individual rules. This module owns the rule
//! types, their structural validation, rule-by-rule comparison and the
//! merge of base and override rules.

mod diff;
mod merger;
mod structure;
mod types;

pub use diff::{diff_rules, RuleChange, RuleChangeKind};
pub use merger::{EffectiveRuleSet, RuleMerger};
pub use structure::{check_structure, resolve_timezone, MAX_DECIMAL_PRECISION, MAX_DOCUMENT_DEPTH};
pub use types::{
    BooleanRules, Bound, Cardinality, Constraint, DataType, DateRules, DateTimeRules,
    DecimalRules, DocumentRules, IntegerRules, ReferenceRules, RuleSet, RuleValue, StringRules,
};
