use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Trial usage for one opaque user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub usage_count: u32,
    pub first_use: DateTime<Utc>,
    pub last_use: DateTime<Utc>,
}

/// Keyed durable storage for [`UsageRecord`]s.
///
/// `upsert` is the only write path and must apply `update` atomically with
/// respect to other writers of the same key.
pub trait UsageStore: Send + Sync {
    fn load(&self, user_id: &str) -> Result<Option<UsageRecord>>;

    fn upsert(
        &self,
        user_id: &str,
        update: &dyn Fn(Option<UsageRecord>) -> UsageRecord,
    ) -> Result<UsageRecord>;
}

/// Process-local store, for single-process deployments and tests.
#[derive(Default)]
pub struct MemoryUsageStore {
    records: Mutex<HashMap<String, UsageRecord>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageStore for MemoryUsageStore {
    fn load(&self, user_id: &str) -> Result<Option<UsageRecord>> {
        Ok(self.records.lock().get(user_id).cloned())
    }

    fn upsert(
        &self,
        user_id: &str,
        update: &dyn Fn(Option<UsageRecord>) -> UsageRecord,
    ) -> Result<UsageRecord> {
        let mut records = self.records.lock();
        let next = update(records.get(user_id).cloned());
        records.insert(user_id.to_string(), next.clone());
        Ok(next)
    }
}

/// JSON file of `{user_id: UsageRecord}`, cached in memory and rewritten
/// (temp file + rename) on every upsert.
pub struct JsonFileUsageStore {
    records: Mutex<HashMap<String, UsageRecord>>,
    path: PathBuf,
}

impl JsonFileUsageStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let records: HashMap<String, UsageRecord> = if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read usage file {}", path.display()))?;
            if data.trim().is_empty() {
                HashMap::new()
            } else {
                // Never start empty over a corrupt file: counts must not reset
                serde_json::from_str(&data).with_context(|| {
                    format!(
                        "Usage file {} is corrupt; repair or move it aside before starting",
                        path.display()
                    )
                })?
            }
        } else {
            HashMap::new()
        };

        tracing::info!("Loaded {} usage records from {}", records.len(), path.display());

        Ok(Self {
            records: Mutex::new(records),
            path: path.to_path_buf(),
        })
    }

    fn persist(&self, records: &HashMap<String, UsageRecord>) -> Result<()> {
        let data = serde_json::to_string_pretty(records)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl UsageStore for JsonFileUsageStore {
    fn load(&self, user_id: &str) -> Result<Option<UsageRecord>> {
        Ok(self.records.lock().get(user_id).cloned())
    }

    fn upsert(
        &self,
        user_id: &str,
        update: &dyn Fn(Option<UsageRecord>) -> UsageRecord,
    ) -> Result<UsageRecord> {
        let mut records = self.records.lock();
        let next = update(records.get(user_id).cloned());
        // The in-memory count moves first so a failed write never undercounts.
        records.insert(user_id.to_string(), next.clone());
        self.persist(&records)?;
        Ok(next)
    }
}
