//! CLI argument definitions using clap
//!
//! Commands:
//! - formwork check --catalog <path>
//! - formwork compose --catalog <path> --class <id>
//! - formwork validate --catalog <path> --class <id>   (candidate on stdin)
//! - formwork analyze --catalog <path> --attribute <name> --rules <json>

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// formwork - multi-tenant schema composition and validation
#[derive(Parser, Debug)]
#[command(name = "formwork")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct CatalogArgs {
    /// Path to the catalog snapshot (classes, attributes, assignments, instances)
    #[arg(long)]
    pub catalog: PathBuf,

    /// Path to an engine configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tenant to act as; overrides the snapshot and the config
    #[arg(long)]
    pub tenant: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a catalog snapshot and report every class schema
    Check {
        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Print the composed schema of a class
    Compose {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// Class identifier
        #[arg(long)]
        class: String,
    },

    /// Validate one JSON candidate read from stdin
    Validate {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// Class identifier
        #[arg(long)]
        class: String,
    },

    /// Classify a proposed rule change without applying it
    Analyze {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// Attribute name
        #[arg(long)]
        attribute: String,

        /// New rules as a JSON object; base rules, or the override when --class is given
        #[arg(long)]
        rules: Option<String>,

        /// Analyze the assignment of the attribute to this class instead
        #[arg(long)]
        class: Option<String>,

        /// With --class: make the assignment required
        #[arg(long, requires = "class")]
        required: bool,

        /// With --required: default supplied with the change, as JSON
        #[arg(long, requires = "required")]
        with_default: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from([
            "formwork",
            "analyze",
            "--catalog",
            "catalog.json",
            "--attribute",
            "age",
            "--rules",
            r#"{"max": 120}"#,
        ])
        .unwrap();
        match cli.command {
            Command::Analyze { attribute, rules, class, required, .. } => {
                assert_eq!(attribute, "age");
                assert_eq!(rules.as_deref(), Some(r#"{"max": 120}"#));
                assert!(class.is_none());
                assert!(!required);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_required_needs_class() {
        let parsed = Cli::try_parse_from([
            "formwork", "analyze", "--catalog", "c.json", "--attribute", "age", "--required",
        ]);
        assert!(parsed.is_err());
    }
}
