//! Impact reports

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::assignment::{AssignmentId, ClassId};
use crate::rules::RuleChange;

/// Safety classification of a proposed change, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    /// No persisted data can become invalid
    Safe,
    /// The change narrows, but no persisted instance is affected
    Warning,
    /// Persisted instances would become invalid
    Breaking,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyLevel::Safe => "safe",
            SafetyLevel::Warning => "warning",
            SafetyLevel::Breaking => "breaking",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one class is affected, with the instance counts that were used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassImpact {
    pub class_id: ClassId,
    /// `None` while the assignment is only proposed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<AssignmentId>,
    pub safety_level: SafetyLevel,
    pub affected_instances: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_changes: Vec<RuleChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances_of_class: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances_using_attribute: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances_violating: Option<u64>,
}

impl ClassImpact {
    pub(crate) fn new(class_id: ClassId, assignment_id: Option<AssignmentId>) -> Self {
        Self {
            class_id,
            assignment_id,
            safety_level: SafetyLevel::Safe,
            affected_instances: 0,
            rule_changes: Vec::new(),
            instances_of_class: None,
            instances_using_attribute: None,
            instances_violating: None,
        }
    }
}

/// Classification of a proposed change against persisted data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub safety_level: SafetyLevel,
    /// Assignments whose effective schema changes
    pub affected_assignment_count: usize,
    pub affected_instance_count: u64,
    pub details: Vec<String>,
    pub recommended_actions: Vec<String>,
    /// Per-class breakdown, the instance-count snapshot behind the verdict
    #[serde(default)]
    pub classes: Vec<ClassImpact>,
}

impl ImpactReport {
    pub fn safe(detail: impl Into<String>) -> Self {
        Self {
            safety_level: SafetyLevel::Safe,
            affected_assignment_count: 0,
            affected_instance_count: 0,
            details: vec![detail.into()],
            recommended_actions: Vec::new(),
            classes: Vec::new(),
        }
    }

    pub fn is_breaking(&self) -> bool {
        self.safety_level == SafetyLevel::Breaking
    }

    /// Raise the level; never lowers it
    pub(crate) fn escalate(&mut self, level: SafetyLevel) {
        self.safety_level = self.safety_level.max(level);
    }

    pub(crate) fn add_class(&mut self, impact: ClassImpact) {
        self.escalate(impact.safety_level);
        self.affected_instance_count += impact.affected_instances;
        self.classes.push(impact);
    }

    pub(crate) fn recommend(&mut self, action: impl Into<String>) {
        let action = action.into();
        if !self.recommended_actions.contains(&action) {
            self.recommended_actions.push(action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(SafetyLevel::Safe < SafetyLevel::Warning);
        assert!(SafetyLevel::Warning < SafetyLevel::Breaking);
        assert_eq!(SafetyLevel::Breaking.to_string(), "breaking");
    }

    #[test]
    fn test_escalate_never_lowers() {
        let mut report = ImpactReport::safe("start");
        report.escalate(SafetyLevel::Breaking);
        report.escalate(SafetyLevel::Warning);
        assert!(report.is_breaking());
    }

    #[test]
    fn test_add_class_sums_instances() {
        let mut report = ImpactReport::safe("start");
        let class = ClassId::parse("Person").unwrap();

        let mut first = ClassImpact::new(class.clone(), Some(AssignmentId::new()));
        first.safety_level = SafetyLevel::Warning;
        let mut second = ClassImpact::new(class, None);
        second.safety_level = SafetyLevel::Breaking;
        second.affected_instances = 3;

        report.add_class(first);
        report.add_class(second);
        assert_eq!(report.safety_level, SafetyLevel::Breaking);
        assert_eq!(report.affected_instance_count, 3);
        assert_eq!(report.classes.len(), 2);
    }

    #[test]
    fn test_recommend_deduplicates() {
        let mut report = ImpactReport::safe("start");
        report.recommend("supply a default");
        report.recommend("supply a default");
        assert_eq!(report.recommended_actions.len(), 1);
    }
}
