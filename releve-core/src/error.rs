//! Error taxonomy shared by the importers.
//!
//! Row-level failures (`Format`, `PatternMatch`, `UnknownShape`) are logged by
//! the importer and counted; at end of file a non-zero count surfaces as
//! `Rejected` so a partially-broken statement is never silently accepted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'{raw}' is not a valid {expected}")]
    Format { raw: String, expected: &'static str },

    #[error("line {line}: no match for {what} in '{detail}'")]
    PatternMatch {
        line: usize,
        what: &'static str,
        detail: String,
    },

    #[error("invalid entry: {0}")]
    Assertion(String),

    #[error("line {line}: unrecognized transaction shape in '{detail}'")]
    UnknownShape { line: usize, detail: String },

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("{0} row(s) failed, statement rejected")]
    Rejected(usize),
}

pub type Result<T> = std::result::Result<T, ImportError>;

impl ImportError {
    pub fn format(raw: impl Into<String>, expected: &'static str) -> Self {
        ImportError::Format {
            raw: raw.into(),
            expected,
        }
    }
}
