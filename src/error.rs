// Error types for configuration and corpus loading
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced to callers. Analyzers themselves never fail; they absorb
/// malformed input and report reduced coverage instead.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid option `{name}`: {reason}")]
    InvalidOption { name: &'static str, reason: String },
    #[error("Failed to decode corpus: {0}")]
    CorpusFormat(#[from] serde_json::Error),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AnalysisError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        AnalysisError::InvalidOption {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
