//! Error taxonomy of the model lifecycle.
//!

use crate::core::status::ModelStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Why a load attempt ended in the `Error` status.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("model file missing or empty: {}", .0.display())]
    FileMissing(PathBuf),

    #[error("model failed to load: {0}")]
    LoadFailure(String),

    #[error("smoke test failed: {0}")]
    SmokeTestFailure(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Status(#[from] StatusError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("model {0} is already registered")]
    AlreadyRegistered(String),

    #[error("this process already serves {active}; cannot host {requested}")]
    Occupied { active: String, requested: String },
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt status record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("status database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unrecognised status value `{0}`")]
    UnknownStatus(String),
}

/// Failures of a single completion request.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("model {model_id} is not ready (status: {status}{})", .detail.as_deref().map(|d| format!(", {d}")).unwrap_or_default())]
    NotReady {
        model_id: String,
        status: ModelStatus,
        detail: Option<String>,
    },

    #[error("model {requested} requested but this process serves {active}")]
    ModelMismatch { requested: String, active: String },

    #[error("inference failed: {0}")]
    InferenceFailure(#[source] anyhow::Error),

    #[error(transparent)]
    Status(#[from] StatusError),
}

impl CompletionError {
    /// `NotReady` is the only condition worth polling on.
    pub fn is_transient(&self) -> bool {
        matches!(self, CompletionError::NotReady { .. })
    }
}
