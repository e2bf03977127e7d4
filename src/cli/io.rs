//! JSON I/O handling for CLI
//!
//! - Input: one JSON document on stdin
//! - Output: one JSON object on stdout
//! - Logs go to stderr and never mix with command output

use std::io::{self, Read, Write};

use serde_json::Value;

use super::errors::{CliError, CliResult};

/// Read one JSON document from stdin; it may span several lines
pub fn read_candidate() -> CliResult<Value> {
    let mut input = String::new();
    io::stdin().lock().read_to_string(&mut input)?;
    parse_document(&input)
}

pub(crate) fn parse_document(input: &str) -> CliResult<Value> {
    if input.trim().is_empty() {
        return Err(CliError::io_error("Empty input"));
    }
    Ok(serde_json::from_str(input)?)
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    write_value(&serde_json::json!({
        "status": "ok",
        "data": data
    }))
}

/// Write an error response to stdout
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_value(&serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    }))
}

fn write_value(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document() {
        assert_eq!(parse_document("{\n  \"age\": 3\n}\n").unwrap()["age"], 3);
        assert!(parse_document("  \n").is_err());
        assert!(parse_document("{").is_err());
    }
}
