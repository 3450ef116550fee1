use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::SynthesisResult;
use crate::synthesis::repair::RepairPath;

/// One line of the synthesis log.
#[derive(Debug, Serialize)]
pub struct AuditEntry<'a> {
    pub timestamp: DateTime<Utc>,
    pub verse_id: &'a str,
    pub query: &'a str,
    pub selected_excerpt_ids: Vec<&'a str>,
    pub repair_path: RepairPath,
    pub raw_model_output: &'a str,
    pub result: &'a SynthesisResult,
}

/// Append-only JSONL log of completed syntheses. Write failures are logged
/// and otherwise ignored.
#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl AuditLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize on the caller, append on the blocking pool.
    pub async fn record(&self, entry: &AuditEntry<'_>) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line + "\n",
            Err(e) => {
                tracing::warn!("Failed to serialize synthesis log entry: {e}");
                return;
            }
        };

        let log = self.clone();
        let written = tokio::task::spawn_blocking(move || log.append(&line))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);
        if let Err(e) = written {
            tracing::warn!("Failed to write synthesis log {}: {e}", self.path.display());
        }
    }

    fn append(&self, line: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
