//! StatusStore implementations: one JSON file per model, or a SQLite table.
//!

use crate::core::error::StatusError;
use crate::core::status::{ModelStatus, StatusRecord, StatusStore};
use async_trait::async_trait;
use log::{debug, warn};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Stores each record as `<dir>/<model id>.status.json`.
///
/// Writes go to a temporary sibling that is fsynced and renamed over the
/// record, so readers in other processes see either the old or the new
/// record, never a torn one.
pub struct FileStatusStore {
    dir: PathBuf,
}

impl FileStatusStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StatusError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids map one-to-one onto file names: ASCII alphanumerics, `-` and `.`
    /// are kept, every other byte is written as `_xx` in hex.
    fn record_path(&self, model_id: &str) -> PathBuf {
        let mut file_stem = String::with_capacity(model_id.len());
        for byte in model_id.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.') {
                file_stem.push(byte as char);
            } else {
                file_stem.push_str(&format!("_{byte:02x}"));
            }
        }
        self.dir.join(format!("{file_stem}.status.json"))
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn set_status(
        &self,
        model_id: &str,
        status: ModelStatus,
        error: Option<String>,
    ) -> Result<(), StatusError> {
        let record = StatusRecord::now(status, error);
        let path = self.record_path(model_id);
        let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&serde_json::to_vec(&record)?).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &path).await {
            fs::remove_file(&tmp_path).await.ok();
            return Err(e.into());
        }

        debug!("status of {model_id} -> {status}");
        Ok(())
    }

    async fn get_status(&self, model_id: &str) -> Result<StatusRecord, StatusError> {
        match fs::read(self.record_path(model_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StatusRecord::absent()),
            Err(e) => {
                warn!("failed to read status of {model_id}: {e}");
                Err(e.into())
            }
        }
    }
}

/// Stores records in the `model_status` table.
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    /// `pool` must have the crate migrations applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn set_status(
        &self,
        model_id: &str,
        status: ModelStatus,
        error: Option<String>,
    ) -> Result<(), StatusError> {
        let record = StatusRecord::now(status, error);

        sqlx::query(
            "INSERT INTO model_status (model_id, status, error, timestamp) VALUES (?, ?, ?, ?) \
             ON CONFLICT(model_id) DO UPDATE SET status = excluded.status, error = excluded.error, timestamp = excluded.timestamp",
        )
        .bind(model_id)
        .bind(record.status.as_str())
        .bind(record.error)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;

        debug!("status of {model_id} -> {status}");
        Ok(())
    }

    async fn get_status(&self, model_id: &str) -> Result<StatusRecord, StatusError> {
        let row: Option<(String, Option<String>, f64)> =
            sqlx::query_as("SELECT status, error, timestamp FROM model_status WHERE model_id = ?")
                .bind(model_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((status, error, timestamp)) => Ok(StatusRecord {
                status: status.parse()?,
                error,
                timestamp: Some(timestamp),
            }),
            None => Ok(StatusRecord::absent()),
        }
    }
}
