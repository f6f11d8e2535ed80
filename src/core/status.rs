//! Durable model load status.
//!

use crate::core::error::StatusError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Loading,
    Ready,
    Error,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Loading => "loading",
            ModelStatus::Ready => "ready",
            ModelStatus::Error => "error",
        }
    }
}

impl Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loading" => Ok(ModelStatus::Loading),
            "ready" => Ok(ModelStatus::Ready),
            "error" => Ok(ModelStatus::Error),
            other => Err(StatusError::UnknownStatus(other.to_owned())),
        }
    }
}

/// The persisted record: `{status, error, timestamp}`.
///
/// `timestamp` is seconds since the Unix epoch. It is `None` only for the
/// synthetic record returned when no load was ever attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: ModelStatus,
    pub error: Option<String>,
    pub timestamp: Option<f64>,
}

impl StatusRecord {
    pub fn now(status: ModelStatus, error: Option<String>) -> Self {
        Self {
            status,
            error,
            timestamp: Some(Utc::now().timestamp_millis() as f64 / 1000.0),
        }
    }

    /// Record reported for a model id that has never been written.
    pub fn absent() -> Self {
        Self {
            status: ModelStatus::Loading,
            error: None,
            timestamp: None,
        }
    }

    pub fn is_recorded(&self) -> bool {
        self.timestamp.is_some()
    }
}

/// Last-write-wins status record per model id, visible across processes.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn set_status(
        &self,
        model_id: &str,
        status: ModelStatus,
        error: Option<String>,
    ) -> Result<(), StatusError>;

    /// Returns [`StatusRecord::absent`] when nothing has been recorded yet.
    async fn get_status(&self, model_id: &str) -> Result<StatusRecord, StatusError>;
}
