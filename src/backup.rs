//! Point-in-time copies of every stored collection, written to
//! `<BACKUP_DIR>/<timestamp>.json`.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    error::{FarmError, FarmResult},
    farm::FarmStore,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BackupInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub collections: usize,
}

#[derive(Serialize, Deserialize)]
struct BackupFile {
    created_at: DateTime<Utc>,
    documents: BTreeMap<String, Value>,
}

fn io_error(path: &Path, e: std::io::Error) -> FarmError {
    FarmError::Internal(format!("backup I/O failed at {}: {e}", path.display()))
}

/// Ids are the file stem; anything else could escape the backup directory.
fn check_id(id: &str) -> FarmResult<()> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        && !id.contains("..");
    if ok {
        Ok(())
    } else {
        Err(FarmError::validation(format!("Invalid backup id: {id}")))
    }
}

#[derive(Clone)]
pub struct BackupManager {
    dir: PathBuf,
    store: FarmStore,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, store: FarmStore) -> Self {
        Self {
            dir: dir.into(),
            store,
        }
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub async fn create(&self) -> FarmResult<BackupInfo> {
        let created_at = Utc::now();
        let id = created_at.format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let documents = self.store.snapshot().await?;
        let collections = documents.len();

        let content = serde_json::to_vec_pretty(&BackupFile {
            created_at,
            documents,
        })
        .map_err(|e| FarmError::Internal(format!("backup encoding failed: {e}")))?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        let path = self.path(&id);
        fs::write(&path, &content)
            .await
            .map_err(|e| io_error(&path, e))?;

        info!(path = %path.display(), collections, "Backup written");
        Ok(BackupInfo {
            id,
            created_at,
            size_bytes: content.len() as u64,
            collections,
        })
    }

    /// Newest first. A missing directory means no backups yet.
    pub async fn list(&self) -> FarmResult<Vec<BackupInfo>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                continue;
            };
            let bytes = fs::read(&path).await.map_err(|e| io_error(&path, e))?;
            match serde_json::from_slice::<BackupFile>(&bytes) {
                Ok(file) => out.push(BackupInfo {
                    id,
                    created_at: file.created_at,
                    size_bytes: bytes.len() as u64,
                    collections: file.documents.len(),
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable backup"),
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Writes every collection in the backup. Returns how many.
    pub async fn restore(&self, id: &str) -> FarmResult<usize> {
        check_id(id)?;
        let path = self.path(id);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FarmError::NotFound(format!("Backup {id} not found")));
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        let file: BackupFile = serde_json::from_slice(&bytes)
            .map_err(|e| FarmError::validation(format!("Backup {id} is corrupt: {e}")))?;

        let restored = self.store.restore(&file.documents).await?;
        info!(backup_id = %id, restored, "Backup restored");
        Ok(restored)
    }
}
