//! CLI error types.

use std::fmt;

use api_signature_common::error::SignatureError;
use error_stack::Report;

#[derive(Debug)]
pub enum CliError {
    /// Configuration file error
    Config(String),
    /// Malformed command-line argument
    Argument(String),
    /// IO error
    Io(std::io::Error),
    /// TOML parsing error
    Toml(String),
    /// Signing or sending failed
    Signature(String),
    /// The validator rejected a request
    Rejected(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Argument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Io(err) => write!(f, "IO error: {}", err),
            CliError::Toml(msg) => write!(f, "TOML error: {}", msg),
            CliError::Signature(msg) => write!(f, "Signature error: {}", msg),
            CliError::Rejected(code) => write!(f, "Request rejected: {}", code),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Toml(err.to_string())
    }
}

impl From<Report<SignatureError>> for CliError {
    fn from(report: Report<SignatureError>) -> Self {
        log::debug!("{report:?}");
        match report.current_context() {
            SignatureError::Configuration { .. } => CliError::Config(report.to_string()),
            _ => CliError::Signature(report.to_string()),
        }
    }
}
