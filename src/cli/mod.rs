//! CLI module for formwork
//!
//! Loads a catalog snapshot and runs one engine operation over it:
//! - check: compose every class
//! - compose: print one composed schema
//! - validate: validate a candidate read from stdin
//! - analyze: classify a proposed change

mod args;
mod commands;
mod errors;
mod io;
mod snapshot;

pub use args::{CatalogArgs, Cli, Command};
pub use commands::{analyze, check, compose, run, run_command, validate, AnalyzeRequest};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_candidate, write_error, write_response};
pub use snapshot::{CatalogSnapshot, LoadedCatalog, CLI_ACTOR};
