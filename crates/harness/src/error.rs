//! Error types for the vigil harness

use thiserror::Error;

/// Result type alias using the vigil Error
pub type Result<T> = std::result::Result<T, Error>;

/// Vigil error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("path '{path}' failed to resolve: {reason}")]
    PathResolution { path: String, reason: String },

    #[error("pattern '{pattern}' failed to compile: {reason}")]
    PatternCompile { pattern: String, reason: String },

    #[error("path '{path}' resolved to no value")]
    ValueAbsent { path: String },

    #[error("path '{path}' resolved to {value}, expected no value")]
    ValuePresent { path: String, value: String },

    #[error("path '{path}' resolved to {shape}; patterns apply to scalars and lists of scalars")]
    UnsupportedShape { path: String, shape: &'static str },

    #[error("pattern '{pattern}' found no match at path '{path}' (value: {value})")]
    PatternMismatch {
        path: String,
        pattern: String,
        value: String,
    },

    #[error("{failed} of {total} assertions failed:\n{report}")]
    AssertionsFailed {
        failed: usize,
        total: usize,
        report: String,
    },

    #[error("snapshot '{name}' drifted from the observed value:\n{diff}")]
    SnapshotDrift { name: String, diff: String },

    #[error("field '{path}' not found in {entity}")]
    FieldNotFound { path: String, entity: String },

    #[error("field '{path}' does not hold embedded JSON: {reason}")]
    EmbeddedJson { path: String, reason: String },

    #[error("template variable '{0}' has no value")]
    UnresolvedVariable(String),

    #[error("{what} did not converge after {attempts} attempts; last error: {last}")]
    Timeout {
        what: String,
        attempts: usize,
        last: Box<Error>,
    },

    #[error("{what} aborted on attempt {attempt}: {source}")]
    Fatal {
        what: String,
        attempt: usize,
        source: Box<Error>,
    },

    #[error("no message on queue '{queue}' within {waited_secs}s ({receives} receives)")]
    ReceiveTimeout {
        queue: String,
        waited_secs: u64,
        receives: usize,
    },

    #[error("execution '{execution}' has bad status: {status} (cause: {cause})")]
    UnexpectedStatus {
        execution: String,
        status: String,
        cause: String,
    },

    #[error("no log events found in group '{0}' yet")]
    NoLogEvents(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("continuation token already consumed by a terminal report")]
    TokenExhausted,

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("output '{key}.{attribute}' is missing or empty")]
    MissingOutput { key: String, attribute: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}
