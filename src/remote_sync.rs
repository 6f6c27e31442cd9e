//! Queue of stored settings snapshots waiting for remote upload.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio::sync::Mutex;

use crate::db::StoredSnapshot;
use crate::kv_store::{get_typed, set_typed, KeyValueStore};
use crate::settings::{SettingsHistoryStore, SettingsSyncDelegate};

pub const SETTINGS_ANCHOR_KEY: &str = "remote_sync.settings_anchor";

const FETCH_BATCH: usize = 100;

#[derive(Default)]
struct QueueState {
    pending: Vec<StoredSnapshot>,
    /// Highest history id already queued, ahead of the persisted anchor until uploaded.
    queued_through: Option<i64>,
}

#[derive(Clone)]
pub struct RemoteSyncQueue {
    kv: Arc<dyn KeyValueStore>,
    state: Arc<Mutex<QueueState>>,
}

impl RemoteSyncQueue {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Id of the last snapshot handed to the uploader.
    pub fn anchor(&self) -> Option<i64> {
        get_typed(self.kv.as_ref(), SETTINGS_ANCHOR_KEY)
    }

    /// Pull every snapshot stored after the queue position.
    pub async fn refresh(&self, store: &dyn SettingsHistoryStore) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut cursor = state.queued_through.or_else(|| self.anchor());
        let mut added = 0;

        loop {
            let batch = store.settings_since(cursor, FETCH_BATCH).await?;
            let fetched = batch.len();
            if let Some(last) = batch.last() {
                cursor = Some(last.id);
            }
            added += fetched;
            state.pending.extend(batch);
            if fetched < FETCH_BATCH {
                break;
            }
        }

        state.queued_through = cursor;
        Ok(added)
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Hand pending snapshots to the uploader and advance the persisted anchor.
    pub async fn take_pending(&self) -> Result<Vec<StoredSnapshot>> {
        let mut state = self.state.lock().await;
        let Some(last_id) = state.pending.last().map(|stored| stored.id) else {
            return Ok(Vec::new());
        };

        set_typed(self.kv.as_ref(), SETTINGS_ANCHOR_KEY, &last_id)?;
        Ok(std::mem::take(&mut state.pending))
    }
}

impl SettingsSyncDelegate for RemoteSyncQueue {
    fn on_settings_store_updated(&self, store: Arc<dyn SettingsHistoryStore>) {
        let queue = self.clone();
        tokio::spawn(async move {
            match queue.refresh(store.as_ref()).await {
                Ok(0) => {}
                Ok(added) => info!("Queued {added} settings snapshots for upload"),
                Err(err) => error!("Failed to queue settings for upload: {err:#}"),
            }
        });
    }

    fn uploaded_through(&self) -> Option<i64> {
        self.anchor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SettingsContent, SettingsSnapshot};
    use crate::kv_store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn far_future() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    async fn seed(db: &Database, count: i64) {
        let base = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        for minute in 0..count {
            let mut content = SettingsContent::default();
            content.dosing.maximum_bolus = Some(1.0 + minute as f64);
            db.store(SettingsSnapshot::new(base + Duration::minutes(minute), content))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn refresh_queues_new_snapshots_once() {
        let db = Database::in_memory().unwrap();
        let queue = RemoteSyncQueue::new(Arc::new(MemoryStore::new()));
        seed(&db, 3).await;

        assert_eq!(queue.refresh(&db).await.unwrap(), 3);
        assert_eq!(queue.refresh(&db).await.unwrap(), 0);
        assert_eq!(queue.pending_count().await, 3);
    }

    #[tokio::test]
    async fn take_pending_advances_persisted_anchor() {
        let db = Database::in_memory().unwrap();
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let queue = RemoteSyncQueue::new(kv.clone());
        seed(&db, 2).await;
        queue.refresh(&db).await.unwrap();

        let uploaded = queue.take_pending().await.unwrap();
        assert_eq!(uploaded.len(), 2);
        assert_eq!(queue.anchor(), Some(uploaded[1].id));
        assert!(queue.take_pending().await.unwrap().is_empty());

        let restarted = RemoteSyncQueue::new(kv);
        assert_eq!(restarted.refresh(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_after_restart_keeps_snapshots_never_uploaded() {
        let db = Database::in_memory().unwrap();
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let queue = RemoteSyncQueue::new(kv.clone());
        seed(&db, 2).await;
        queue.refresh(&db).await.unwrap();
        queue.take_pending().await.unwrap();

        // Queued in memory only, then lost with the process.
        let base = Utc.with_ymd_and_hms(2026, 6, 1, 1, 0, 0).unwrap();
        for minute in 0..2 {
            let mut content = SettingsContent::default();
            content.dosing.maximum_bolus = Some(20.0 + minute as f64);
            db.store(SettingsSnapshot::new(base + Duration::minutes(minute), content))
                .await
                .unwrap();
        }
        queue.refresh(&db).await.unwrap();
        drop(queue);

        let restarted = RemoteSyncQueue::new(kv);
        let uploaded_through = restarted.uploaded_through().unwrap();
        assert_eq!(db.purge_before(far_future(), uploaded_through).await.unwrap(), 2);

        assert_eq!(restarted.refresh(&db).await.unwrap(), 2);
        let uploads = restarted.take_pending().await.unwrap();
        let boluses: Vec<_> = uploads
            .iter()
            .map(|stored| stored.snapshot.dosing().maximum_bolus)
            .collect();
        assert_eq!(boluses, vec![Some(20.0), Some(21.0)]);
    }

    #[test]
    fn nothing_uploaded_means_no_purge_horizon() {
        let queue = RemoteSyncQueue::new(Arc::new(MemoryStore::new()));
        assert_eq!(queue.uploaded_through(), None);
    }
}
