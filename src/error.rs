//! Error types for the analysis pipeline.

use std::io;
use thiserror::Error;

/// A submission that could not be turned into features. The mapper skips such
/// submissions and counts them.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("submission {submission_id} is not valid UTF-8 (invalid byte at offset {offset})")]
    Undecodable { submission_id: String, offset: usize },

    #[error("could not read source of submission {submission_id} from {path}: {source}")]
    Unreadable {
        submission_id: String,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed submission record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
}

/// A violation of the map/reduce contract. Fatal to the running task; the engine is
/// expected to re-run the task from its original input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("reducer invoked for key `{0}` without any values")]
    EmptyGroup(String),

    #[error("malformed key/value line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    #[error("value `{value}` does not fit the {schema} schema")]
    ValueShape { schema: &'static str, value: String },

    #[error("cannot merge a {left} summary with a {right} summary")]
    SummaryMismatch {
        left: &'static str,
        right: &'static str,
    },

    #[error("key `{0}` reappeared after its group was closed; input is not grouped by key")]
    KeyRegrouped(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown job type `{0}` (expected line-count, construct-freq, import-pop or error-freq)")]
    UnknownJobType(String),

    #[error("unknown construct tag `{0}`")]
    UnknownConstruct(String),

    #[error("no construct patterns are known for language `{0}`")]
    UnsupportedLanguage(String),

    #[error("invalid pattern `{pattern}`: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
