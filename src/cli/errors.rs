//! CLI-specific error types

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::errors::EngineError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (stdin/stdout/catalog file)
    IoError,
    /// Catalog snapshot is malformed or refers to unknown entries
    CatalogError,
    /// Command-line input that is well-formed for clap but not for the engine
    InvalidInput,
    /// Error raised by the engine, carrying its own code
    Engine(&'static str),
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "FORMWORK_CLI_CONFIG_ERROR",
            Self::IoError => "FORMWORK_CLI_IO_ERROR",
            Self::CatalogError => "FORMWORK_CLI_CATALOG_ERROR",
            Self::InvalidInput => "FORMWORK_CLI_INVALID_INPUT",
            Self::Engine(code) => code,
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn catalog_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::CatalogError, msg)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidInput, msg)
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        Self::new(CliErrorCode::Engine(e.code()), e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_keep_their_code() {
        let err: CliError = EngineError::ClassNotFound("Person".into()).into();
        assert_eq!(err.code_str(), "FORMWORK_CLASS_NOT_FOUND");
        assert!(err.to_string().contains("Person"));
    }

    #[test]
    fn test_config_errors() {
        let err: CliError = ConfigError::Invalid("bad".into()).into();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
    }
}
