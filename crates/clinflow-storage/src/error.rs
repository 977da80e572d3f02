// Storage error taxonomy. `UnknownEntity`/`AccessDenied` are modeled as
// values an HTTP layer maps to 404/403, not panics — mirroring
// `clinflow_core::error::CoreError`'s own "never panic on a missing record"
// stance.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    UnknownEntity { kind: &'static str, id: String },

    #[error("access to {kind} '{id}' is denied")]
    AccessDenied { kind: &'static str, id: String },

    #[error("malformed {kind} file at {path}: {message}")]
    Malformed { kind: &'static str, path: String, message: String },

    #[error("io error at {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn unknown(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::UnknownEntity { kind, id: id.into() }
    }

    pub fn malformed(kind: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Malformed { kind, path: path.into(), message: message.into() }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }
}
