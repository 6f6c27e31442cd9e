use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{SettingsSnapshot, StoredSnapshot};

/// Append-only settings history keyed by timestamp.
#[async_trait]
pub trait SettingsHistoryStore: Send + Sync {
    /// Most recently stored snapshot, the authoritative one.
    async fn latest(&self) -> Result<Option<SettingsSnapshot>>;

    /// Append a snapshot. Its timestamp must be later than the latest stored one.
    async fn store(&self, snapshot: SettingsSnapshot) -> Result<()>;

    /// Snapshots appended after `anchor` (exclusive), oldest first.
    async fn settings_since(&self, anchor: Option<i64>, limit: usize)
        -> Result<Vec<StoredSnapshot>>;

    /// Delete snapshots older than `cutoff` whose id is at most `uploaded_through`,
    /// always keeping the latest. Returns rows removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>, uploaded_through: i64) -> Result<usize>;
}

/// Told whenever a new snapshot has been persisted.
pub trait SettingsSyncDelegate: Send + Sync {
    fn on_settings_store_updated(&self, store: Arc<dyn SettingsHistoryStore>);

    /// Highest history id already handed off remotely. Rows above it must not be purged.
    fn uploaded_through(&self) -> Option<i64>;
}
