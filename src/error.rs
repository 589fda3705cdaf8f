use std::io;

use serde_json::Error as JsonError;
use thiserror::Error;

use crate::passes::PassId;

/// The only `Result::Err` surface of this crate's public API.
///
/// Every semantic finding produced while analyzing a domain is a [`crate::diagnostics::Diagnostic`]
/// appended to the diagnostic bus, never an `Err`; every solver outcome is data
/// (`crate::smt::solver::SafeResult`). `VerifierError` exists only for conditions that
/// make the run itself impossible to complete: the AST/trace file can't be read or
/// parsed, the config is malformed, or the declared pass dependencies contain a cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifierError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("(de)serialization error: {0}")]
    Serialization(String),

    #[error("pass dependency cycle involving: {}", passes.join(" -> "))]
    DependencyCycle { passes: Vec<PassId> },

    #[error("unknown pass id referenced as a dependency: {0}")]
    UnknownPass(PassId),
}

impl From<io::Error> for VerifierError {
    fn from(x: io::Error) -> Self {
        VerifierError::Io(format!("{x}"))
    }
}

impl From<JsonError> for VerifierError {
    fn from(x: JsonError) -> Self {
        VerifierError::Serialization(format!("JSON (de)serialization error: {x}"))
    }
}

impl From<toml::de::Error> for VerifierError {
    fn from(x: toml::de::Error) -> Self {
        VerifierError::Config(format!("TOML deserialization error: {x}"))
    }
}

impl From<toml::ser::Error> for VerifierError {
    fn from(x: toml::ser::Error) -> Self {
        VerifierError::Config(format!("TOML serialization error: {x}"))
    }
}

pub type Result<T> = std::result::Result<T, VerifierError>;
