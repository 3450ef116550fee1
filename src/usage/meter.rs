use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

use crate::models::TrialStatus;
use crate::usage::store::{UsageRecord, UsageStore};

/// Free-trial gate over an injected [`UsageStore`].
#[derive(Clone)]
pub struct UsageMeter {
    store: Arc<dyn UsageStore>,
    limit: u32,
}

impl UsageMeter {
    pub fn new(store: Arc<dyn UsageStore>, limit: u32) -> Self {
        Self { store, limit }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Recorded uses, 0 for unseen users.
    pub fn usage_count(&self, user_id: &str) -> Result<u32> {
        Ok(self.store.load(user_id)?.map_or(0, |r| r.usage_count))
    }

    pub fn remaining(&self, user_id: &str) -> Result<u32> {
        Ok(self.limit.saturating_sub(self.usage_count(user_id)?))
    }

    pub fn can_use(&self, user_id: &str) -> Result<bool> {
        Ok(self.remaining(user_id)? > 0)
    }

    pub fn status(&self, user_id: &str) -> Result<TrialStatus> {
        Ok(TrialStatus {
            uses_remaining: self.remaining(user_id)?,
            total_uses: self.limit,
        })
    }

    /// Record one use: count + 1, `last_use` now, `first_use` only on creation.
    pub fn increment(&self, user_id: &str) -> Result<UsageRecord> {
        let record = self.store.upsert(user_id, &|prev| {
            let now = Utc::now();
            match prev {
                Some(r) => UsageRecord {
                    usage_count: r.usage_count.saturating_add(1),
                    first_use: r.first_use,
                    last_use: now,
                },
                None => UsageRecord {
                    usage_count: 1,
                    first_use: now,
                    last_use: now,
                },
            }
        })?;
        tracing::debug!("Trial use {} of {} for {user_id}", record.usage_count, self.limit);
        Ok(record)
    }
}
