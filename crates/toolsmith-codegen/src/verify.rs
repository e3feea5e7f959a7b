//! Parse-checking and formatting of generated source.
//!
//! Verification is mandatory; formatting is cosmetic and never fails the
//! caller. A formatter that is missing or errors yields the unformatted,
//! already verified source.

use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;
use toolsmith_core::FormatStrategy;
use tracing::{debug, warn};

use crate::error::GenerateError;

/// Parses `code` as a Rust file. `artifact` names it in the error.
pub fn verify(code: &str, artifact: &str) -> Result<syn::File, GenerateError> {
    syn::parse_file(code).map_err(|e| GenerateError::Synthesis {
        artifact: artifact.to_string(),
        message: e.to_string(),
    })
}

/// Formats verified source. `parsed` is the result of [`verify`] on `code`.
pub fn format(code: &str, parsed: &syn::File, strategy: FormatStrategy) -> String {
    match strategy {
        FormatStrategy::Prettyplease => prettyplease::unparse(parsed),
        FormatStrategy::Rustfmt => match rustfmt(code) {
            Ok(formatted) => formatted,
            Err(reason) => {
                warn!(reason = %reason, "rustfmt unavailable or failed; keeping unformatted source");
                code.to_string()
            }
        },
        FormatStrategy::None => code.to_string(),
    }
}

fn rustfmt(code: &str) -> Result<String, String> {
    let mut file = NamedTempFile::new().map_err(|e| e.to_string())?;
    file.write_all(code.as_bytes()).map_err(|e| e.to_string())?;
    file.flush().map_err(|e| e.to_string())?;

    let output = Command::new("rustfmt")
        .arg("--edition")
        .arg("2021")
        .arg(file.path())
        .output()
        .map_err(|e| format!("failed to run rustfmt: {}", e))?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    let formatted = std::fs::read_to_string(file.path()).map_err(|e| e.to_string())?;
    debug!(bytes = formatted.len(), "Formatted with rustfmt");
    Ok(formatted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_reports_artifact() {
        let err = verify("fn broken( {", "tools module").unwrap_err();
        match err {
            GenerateError::Synthesis { artifact, message } => {
                assert_eq!(artifact, "tools module");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_prettyplease_formats() {
        let code = "fn main ( ) { let x = 1 ; }";
        let parsed = verify(code, "entry point").unwrap();
        let formatted = format(code, &parsed, FormatStrategy::Prettyplease);
        assert!(formatted.contains("fn main() {\n"));
        assert!(syn::parse_file(&formatted).is_ok());
    }

    #[test]
    fn test_none_keeps_source() {
        let code = "fn main ( ) { }";
        let parsed = verify(code, "entry point").unwrap();
        assert_eq!(format(code, &parsed, FormatStrategy::None), code);
    }
}
