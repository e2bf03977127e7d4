//! # Evolution Analyzer
//!
//! Classifies proposed attribute and assignment changes against persisted
//! data before they are applied.
//!
//! Policy:
//! - Removing or relaxing a bound is safe
//! - Adding or narrowing a bound is breaking when persisted instances are
//!   affected, a warning otherwise
//! - optional -> required is breaking when instances lack the value and no
//!   default is supplied with the change, a warning otherwise
//! - required -> optional is safe
//!
//! Rule changes are judged on effective rules per assignment, so an
//! override that masks a base change leaves that class unaffected. A base
//! change that would reject an assignment's stored default is refused
//! with `DefaultValueInvalid`, as an assignment write would be.
//! The analyzer reads straight from the catalog and index, never from the
//! schema cache, and only classifies: refusing a breaking change is the
//! service layer's decision.

use std::sync::Arc;

use serde_json::Value;

use super::report::{ClassImpact, ImpactReport, SafetyLevel};
use crate::assignment::{
    normalize_default, AssignmentId, AssignmentIndex, AssignmentPatch, ClassId, NewAssignment,
};
use crate::catalog::{AttributeCatalog, AttributeId, AttributePatch};
use crate::context::TenantContext;
use crate::errors::{EngineError, EngineResult};
use crate::external::InstanceStore;
use crate::observability::{log_event, Event};
use crate::rules::{check_structure, diff_rules, RuleChange, RuleMerger, RuleSet};
use crate::validation::CompiledRules;

/// A proposed assignment mutation
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentChange {
    Create(NewAssignment),
    Update {
        assignment_id: AssignmentId,
        patch: AssignmentPatch,
    },
    Delete {
        assignment_id: AssignmentId,
    },
}

pub struct EvolutionAnalyzer {
    catalog: Arc<AttributeCatalog>,
    index: Arc<AssignmentIndex>,
    instances: Arc<dyn InstanceStore>,
}

impl EvolutionAnalyzer {
    pub fn new(
        catalog: Arc<AttributeCatalog>,
        index: Arc<AssignmentIndex>,
        instances: Arc<dyn InstanceStore>,
    ) -> Self {
        Self {
            catalog,
            index,
            instances,
        }
    }

    /// Classify an attribute update
    pub fn analyze_attribute_change(
        &self,
        ctx: &TenantContext,
        attribute_id: AttributeId,
        patch: &AttributePatch,
    ) -> EngineResult<ImpactReport> {
        let attribute = self.catalog.get_active(ctx, attribute_id)?;
        if patch.name.as_ref().is_some_and(|name| *name != attribute.name) {
            return Err(EngineError::ImmutableField("name"));
        }
        if patch.data_type.is_some_and(|dt| dt != attribute.data_type) {
            return Err(EngineError::ImmutableField("data_type"));
        }

        let new_base = match &patch.base_rules {
            Some(rules) => rules,
            None => return Ok(self.finish(ctx, "attribute", ImpactReport::safe("rules unchanged"))),
        };
        check_structure(attribute.data_type, new_base)?;

        let base_changes = diff_rules(&attribute.base_rules, new_base);
        if base_changes.is_empty() {
            return Ok(self.finish(ctx, "attribute", ImpactReport::safe("rules unchanged")));
        }

        let mut report = ImpactReport::safe(format!(
            "base rules of '{}': {}",
            attribute.name,
            describe_changes(&base_changes)
        ));

        let assignments = self.index.active_for_attribute(ctx, attribute_id)?;
        if assignments.is_empty() {
            if base_changes.iter().any(|c| c.kind.is_narrowing()) {
                report.escalate(SafetyLevel::Warning);
                report
                    .details
                    .push("no class uses the attribute; future assignments inherit the narrower rules".into());
            }
            return Ok(self.finish(ctx, "attribute", report));
        }

        for assignment in assignments {
            let old_rules =
                RuleMerger::merge_optional(&attribute.base_rules, assignment.override_rules.as_ref()).rules;
            let new_rules = RuleMerger::merge_optional(new_base, assignment.override_rules.as_ref()).rules;
            let changes = diff_rules(&old_rules, &new_rules);
            if changes.is_empty() {
                report.details.push(format!(
                    "class '{}': the assignment override masks the change",
                    assignment.class_id
                ));
                continue;
            }

            // A stored default must keep passing the class's effective rules
            if let Some(default) = &assignment.default_value {
                CompiledRules::compile(new_rules.clone())?
                    .check(&attribute.name, default)
                    .map_err(|violations| EngineError::DefaultValueInvalid { violations })?;
            }

            report.affected_assignment_count += 1;
            let impact = self.rule_impact(
                ctx,
                &assignment.class_id,
                Some(assignment.id),
                attribute_id,
                changes,
                new_rules,
            )?;
            report.details.push(describe_impact(&impact));
            report.add_class(impact);
        }

        Ok(self.finish(ctx, "attribute", report))
    }

    /// Classify an assignment create, update or delete
    pub fn analyze_assignment_change(
        &self,
        ctx: &TenantContext,
        change: &AssignmentChange,
    ) -> EngineResult<ImpactReport> {
        let report = match change {
            AssignmentChange::Create(input) => self.analyze_create(ctx, input)?,
            AssignmentChange::Update { assignment_id, patch } => {
                self.analyze_update(ctx, *assignment_id, patch)?
            }
            AssignmentChange::Delete { assignment_id } => self.analyze_delete(ctx, *assignment_id)?,
        };
        Ok(self.finish(ctx, "assignment", report))
    }

    fn analyze_create(&self, ctx: &TenantContext, input: &NewAssignment) -> EngineResult<ImpactReport> {
        let attribute = self.catalog.get_active(ctx, input.attribute_id)?;
        let mut report = ImpactReport::safe(format!(
            "attribute '{}' added to class '{}' as {}",
            attribute.name,
            input.class_id,
            if input.required { "required" } else { "optional" }
        ));
        report.affected_assignment_count = 1;

        let mut impact = ClassImpact::new(input.class_id.clone(), None);
        if input.required {
            let has_default = normalize_default(input.default_value.clone()).is_some();
            self.apply_requirement(ctx, &mut impact, input.attribute_id, has_default, true)?;
            report.details.push(describe_impact(&impact));
        }
        report.add_class(impact);
        Ok(report)
    }

    fn analyze_update(
        &self,
        ctx: &TenantContext,
        assignment_id: AssignmentId,
        patch: &AssignmentPatch,
    ) -> EngineResult<ImpactReport> {
        let current = self.index.get_active(ctx, assignment_id)?;
        let attribute = self.catalog.get(ctx, current.attribute_id)?;

        let next_override = match &patch.override_rules {
            Some(rules) => rules.clone(),
            None => current.override_rules.clone(),
        };
        if let Some(rules) = &next_override {
            check_structure(attribute.data_type, rules)?;
        }
        let next_required = patch.required.unwrap_or(current.required);
        let next_default: Option<Value> = match &patch.default_value {
            Some(value) => normalize_default(value.clone()),
            None => current.default_value.clone(),
        };

        let old_rules =
            RuleMerger::merge_optional(&attribute.base_rules, current.override_rules.as_ref()).rules;
        let new_rules = RuleMerger::merge_optional(&attribute.base_rules, next_override.as_ref()).rules;
        check_structure(attribute.data_type, &new_rules)?;
        let changes = diff_rules(&old_rules, &new_rules);

        let mut report = ImpactReport::safe(format!(
            "assignment of '{}' to class '{}'",
            attribute.name, current.class_id
        ));

        let becomes_required = !current.required && next_required;
        if changes.is_empty() && !becomes_required {
            if current.required && !next_required {
                report.details.push("required -> optional relaxes the schema".into());
                report.affected_assignment_count = 1;
            }
            return Ok(report);
        }

        report.affected_assignment_count = 1;
        let mut impact = if changes.is_empty() {
            ClassImpact::new(current.class_id.clone(), Some(current.id))
        } else {
            self.rule_impact(
                ctx,
                &current.class_id,
                Some(current.id),
                current.attribute_id,
                changes,
                new_rules,
            )?
        };

        if becomes_required {
            self.apply_requirement(
                ctx,
                &mut impact,
                current.attribute_id,
                next_default.is_some(),
                false,
            )?;
        }

        report.details.push(describe_impact(&impact));
        report.add_class(impact);
        Ok(report)
    }

    fn analyze_delete(&self, ctx: &TenantContext, assignment_id: AssignmentId) -> EngineResult<ImpactReport> {
        let current = self.index.get_active(ctx, assignment_id)?;
        let attribute = self.catalog.get(ctx, current.attribute_id)?;

        let mut report = ImpactReport::safe(format!(
            "attribute '{}' removed from class '{}'",
            attribute.name, current.class_id
        ));
        report.affected_assignment_count = 1;

        ctx.check_deadline("instance count")?;
        let using = self
            .instances
            .count_instances_using_attribute(ctx, &current.class_id, current.attribute_id)?;

        let mut impact = ClassImpact::new(current.class_id.clone(), Some(current.id));
        impact.instances_using_attribute = Some(using);
        if using > 0 {
            impact.safety_level = SafetyLevel::Warning;
            impact.affected_instances = using;
            report.details.push(format!(
                "{} instance(s) keep values that are no longer part of the schema",
                using
            ));
            report.recommend("archive or migrate the orphaned values");
        }
        report.add_class(impact);
        Ok(report)
    }

    /// Counts the instances a narrowing rule change affects
    fn rule_impact(
        &self,
        ctx: &TenantContext,
        class_id: &ClassId,
        assignment_id: Option<AssignmentId>,
        attribute_id: AttributeId,
        changes: Vec<RuleChange>,
        new_rules: RuleSet,
    ) -> EngineResult<ClassImpact> {
        let mut impact = ClassImpact::new(class_id.clone(), assignment_id);
        let narrowing = changes.iter().any(|c| c.kind.is_narrowing());
        impact.rule_changes = changes;
        if !narrowing {
            return Ok(impact);
        }

        let compiled = CompiledRules::compile(new_rules)?;
        ctx.check_deadline("instance count")?;
        let violating = self
            .instances
            .count_instances_violating(ctx, class_id, attribute_id, &compiled)?;
        impact.instances_violating = violating;

        impact.affected_instances = match violating {
            Some(count) => count,
            None => {
                ctx.check_deadline("instance count")?;
                let using = self
                    .instances
                    .count_instances_using_attribute(ctx, class_id, attribute_id)?;
                impact.instances_using_attribute = Some(using);
                using
            }
        };
        impact.safety_level = if impact.affected_instances > 0 {
            SafetyLevel::Breaking
        } else {
            SafetyLevel::Warning
        };
        Ok(impact)
    }

    /// Counts instances lacking a value for an attribute that becomes required.
    ///
    /// For a new assignment every existing instance lacks it.
    fn apply_requirement(
        &self,
        ctx: &TenantContext,
        impact: &mut ClassImpact,
        attribute_id: AttributeId,
        has_default: bool,
        is_new: bool,
    ) -> EngineResult<()> {
        ctx.check_deadline("instance count")?;
        let total = self.instances.count_instances_of_class(ctx, &impact.class_id)?;
        impact.instances_of_class = Some(total);

        let missing = if is_new {
            total
        } else {
            ctx.check_deadline("instance count")?;
            let using = self
                .instances
                .count_instances_using_attribute(ctx, &impact.class_id, attribute_id)?;
            impact.instances_using_attribute = Some(using);
            total.saturating_sub(using)
        };

        let level = if missing > 0 && !has_default {
            SafetyLevel::Breaking
        } else {
            SafetyLevel::Warning
        };
        impact.safety_level = impact.safety_level.max(level);
        impact.affected_instances = impact.affected_instances.max(missing);
        Ok(())
    }

    fn finish(&self, ctx: &TenantContext, target: &str, mut report: ImpactReport) -> ImpactReport {
        let lacks_default = report.classes.iter().any(|c| {
            c.safety_level == SafetyLevel::Breaking && c.instances_of_class.is_some()
        });
        match report.safety_level {
            SafetyLevel::Breaking => {
                report.recommend(format!(
                    "fix or migrate the {} affected instance(s) before applying",
                    report.affected_instance_count
                ));
                if lacks_default {
                    report.recommend("supply a default value with the requirement");
                }
                report.recommend("apply with force to accept the breakage");
            }
            SafetyLevel::Warning => {
                report.recommend("future writes must satisfy the new rules");
            }
            SafetyLevel::Safe => {}
        }

        log_event(
            Event::ChangeAnalyzed,
            &[
                ("affected_assignments", &report.affected_assignment_count.to_string()),
                ("affected_instances", &report.affected_instance_count.to_string()),
                ("request_id", &ctx.request_id.to_string()),
                ("safety_level", report.safety_level.as_str()),
                ("target", target),
                ("tenant", ctx.tenant_id.as_str()),
            ],
        );
        report
    }
}

fn describe_changes(changes: &[RuleChange]) -> String {
    changes
        .iter()
        .map(|c| format!("{} {}", c.rule, c.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_impact(impact: &ClassImpact) -> String {
    let mut line = format!(
        "class '{}': {} ({} instance(s) affected)",
        impact.class_id, impact.safety_level, impact.affected_instances
    );
    if !impact.rule_changes.is_empty() {
        line.push_str("; ");
        line.push_str(&describe_changes(&impact.rule_changes));
    }
    line
}
