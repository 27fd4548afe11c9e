//! Error taxonomy for the prediction pipeline.
//!
//! Input and inference errors are returned to the immediate caller.
//! Persistence errors are one-way: the engine logs them and keeps the result.
//! Model load errors only happen at startup and are fatal for the binary.

use std::path::PathBuf;

use thiserror::Error;

use crate::rules::Warning;

/// A raw field value could not be turned into a usable number.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputFormatError {
    #[error("'{field}' is not a valid number: {raw:?}")]
    NotANumber { field: &'static str, raw: String },

    #[error("'{field}' must be a finite number, got {raw:?}")]
    NotFinite { field: &'static str, raw: String },

    #[error("missing field '{0}'")]
    Missing(&'static str),

    #[error("unknown field '{0}'")]
    Unknown(String),
}

/// A model artifact could not be read or is not something we can evaluate.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("reading model {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing model {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("model {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
}

/// Evaluation of a loaded model failed for one request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("expected {expected} features, got {got}")]
    FeatureCount { expected: usize, got: usize },

    #[error("tree {tree} is corrupt at node {node}")]
    CorruptTree { tree: usize, node: usize },

    #[error("{role} model returned a non-finite value ({value})")]
    NonFinite { role: &'static str, value: f64 },

    #[error("inference worker failed: {0}")]
    Worker(String),
}

/// The prediction log could not store or read a record.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("prediction log is closed")]
    Closed,

    #[error("prediction log lock poisoned")]
    Poisoned,
}

/// Failure of one submission through the engine.
#[derive(Debug, Error)]
pub enum PredictError {
    /// The critical zero-field rule fired. Not a fault; the caller shows the warning and stops.
    #[error("{}", .0.message)]
    Blocked(Warning),

    #[error("an inference is already running")]
    Busy,

    #[error(transparent)]
    Inference(#[from] InferenceError),
}
