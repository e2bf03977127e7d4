//! CLI command implementations
//!
//! Every command loads the configuration, replays the catalog snapshot
//! into a fresh service and prints exactly one JSON object on stdout.

use std::path::Path;

use serde_json::{json, Value};

use super::args::{CatalogArgs, Command};
use super::errors::{CliError, CliResult};
use super::io::{parse_document, read_candidate, write_error, write_response};
use super::snapshot::{CatalogSnapshot, LoadedCatalog};
use crate::assignment::{AssignmentPatch, ClassId};
use crate::catalog::AttributePatch;
use crate::config::EngineConfig;
use crate::evolution::AssignmentChange;
use crate::observability::{log_event, Event};
use crate::rules::RuleSet;

/// Main CLI entry point.
///
/// Parses arguments and dispatches; failures are also reported on stdout
/// as an error object.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    match run_command(cli.command) {
        Ok(data) => write_response(data),
        Err(e) => {
            write_error(e.code_str(), e.message())?;
            Err(e)
        }
    }
}

/// Run one command and return its output document
pub fn run_command(cmd: Command) -> CliResult<Value> {
    match cmd {
        Command::Check { catalog } => check(&catalog),
        Command::Compose { catalog, class } => compose(&catalog, &class),
        Command::Validate { catalog, class } => {
            let candidate = read_candidate()?;
            validate(&catalog, &class, &candidate)
        }
        Command::Analyze {
            catalog,
            attribute,
            rules,
            class,
            required,
            with_default,
        } => {
            let request = AnalyzeRequest {
                attribute,
                rules,
                class,
                required,
                with_default,
            };
            analyze(&catalog, &request)
        }
    }
}

fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            log_event(Event::ConfigLoaded, &[("path", &path.display().to_string())]);
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn load(args: &CatalogArgs) -> CliResult<LoadedCatalog> {
    let config = load_config(args.config.as_deref())?;
    CatalogSnapshot::load(&args.catalog)?.replay(&config, args.tenant.as_deref())
}

/// Compose every class and summarise the catalog
pub fn check(args: &CatalogArgs) -> CliResult<Value> {
    let loaded = load(args)?;
    let mut classes = Vec::with_capacity(loaded.classes.len());
    for class_id in &loaded.classes {
        let schema = loaded.service.compose(&loaded.ctx, class_id)?;
        classes.push(json!({
            "class_id": class_id,
            "content_hash": schema.content_hash,
            "attributes": schema.attributes.len(),
            "required": schema.required_count,
            "optional": schema.optional_count,
        }));
    }

    Ok(json!({
        "tenant": loaded.ctx.tenant_id,
        "attributes": loaded.attributes.len(),
        "assignments": loaded.assignment_count,
        "instances": loaded.instance_count,
        "classes": classes,
    }))
}

pub fn compose(args: &CatalogArgs, class: &str) -> CliResult<Value> {
    let loaded = load(args)?;
    let class_id = ClassId::parse(class)?;
    let schema = loaded.service.compose(&loaded.ctx, &class_id)?;
    Ok(serde_json::to_value(&*schema)?)
}

pub fn validate(args: &CatalogArgs, class: &str, candidate: &Value) -> CliResult<Value> {
    let loaded = load(args)?;
    let class_id = ClassId::parse(class)?;
    let outcome = loaded.service.validate_json(&loaded.ctx, &class_id, candidate)?;
    Ok(serde_json::to_value(&outcome)?)
}

/// Inputs of the analyze command
#[derive(Debug, Clone, Default)]
pub struct AnalyzeRequest {
    pub attribute: String,
    /// Raw JSON rule object
    pub rules: Option<String>,
    pub class: Option<String>,
    pub required: bool,
    /// Raw JSON default value
    pub with_default: Option<String>,
}

pub fn analyze(args: &CatalogArgs, request: &AnalyzeRequest) -> CliResult<Value> {
    let loaded = load(args)?;
    let (attribute_id, data_type) = loaded.attribute(&request.attribute)?;
    let rules = request
        .rules
        .as_deref()
        .map(|raw| parse_document(raw).and_then(|v| Ok(RuleSet::from_json(data_type, &v)?)))
        .transpose()?;

    let report = match &request.class {
        None => {
            let rules = rules.ok_or_else(|| CliError::invalid_input("--rules is required without --class"))?;
            loaded
                .service
                .analyze_attribute_change(&loaded.ctx, attribute_id, &AttributePatch::rules(rules))?
        }
        Some(class) => {
            let class_id = ClassId::parse(class.as_str())?;
            let assignment = loaded
                .service
                .find_assignment(&loaded.ctx, &class_id, attribute_id)?
                .ok_or_else(|| {
                    CliError::catalog_error(format!(
                        "attribute '{}' is not assigned to class '{}'",
                        request.attribute, class_id
                    ))
                })?;
            let default_value = request.with_default.as_deref().map(parse_document).transpose()?;
            let patch = AssignmentPatch {
                required: request.required.then_some(true),
                override_rules: rules.map(Some),
                default_value: default_value.map(Some),
                ..Default::default()
            };
            if patch.is_empty() {
                return Err(CliError::invalid_input("nothing to analyze: give --rules or --required"));
            }
            loaded.service.analyze_assignment_change(
                &loaded.ctx,
                &AssignmentChange::Update {
                    assignment_id: assignment.id,
                    patch,
                },
            )?
        }
    };
    Ok(serde_json::to_value(&report)?)
}
