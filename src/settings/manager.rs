use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};

use crate::config::{AppConfig, FeatureFlags};
use crate::db::{SettingsContent, SettingsSnapshot};
use crate::kv_store::KeyValueStore;
use crate::utils::clock::Clock;

use super::{
    legacy::read_legacy_settings, DeviceStatusProvider, DosingSettings,
    NotificationPermissionQuery, NotificationSettings, SettingsHistoryStore,
    SettingsSyncDelegate,
};

/// What a store request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// Content matched the latest snapshot; nothing written.
    Unchanged,
    /// Remote overrides are enabled and no push token has been recorded yet.
    AwaitingDeviceToken,
    /// No snapshot exists yet to compare permission state against.
    NothingToCompare,
    /// A collaborator failed; already logged.
    Failed,
}

/// Owns the settings history: builds snapshots from live state and appends them when changed.
pub struct SettingsManager {
    store: Arc<dyn SettingsHistoryStore>,
    device_status: Arc<dyn DeviceStatusProvider>,
    permissions: Arc<dyn NotificationPermissionQuery>,
    kv: Arc<dyn KeyValueStore>,
    delegate: Arc<dyn SettingsSyncDelegate>,
    clock: Arc<dyn Clock>,
    features: FeatureFlags,
    retention: Duration,
    device_token: Mutex<Option<String>>,
}

impl SettingsManager {
    pub fn new(
        store: Arc<dyn SettingsHistoryStore>,
        device_status: Arc<dyn DeviceStatusProvider>,
        permissions: Arc<dyn NotificationPermissionQuery>,
        kv: Arc<dyn KeyValueStore>,
        delegate: Arc<dyn SettingsSyncDelegate>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            device_status,
            permissions,
            kv,
            delegate,
            clock,
            features: config.features.clone(),
            retention: config.settings.retention(),
            device_token: Mutex::new(None),
        }
    }

    pub fn device_token(&self) -> Option<String> {
        self.token_guard().clone()
    }

    /// Dosing settings in effect: latest snapshot, else migrated legacy settings, else defaults.
    pub async fn current_effective_settings(&self) -> DosingSettings {
        match self.store.latest().await {
            Ok(Some(latest)) => return latest.dosing().clone(),
            Ok(None) => {}
            Err(err) => {
                // Migrating without knowing the latest snapshot could write it twice.
                error!("Failed to read latest settings: {err:#}");
                return read_legacy_settings(self.kv.as_ref()).unwrap_or_default();
            }
        }

        let Some(legacy) = read_legacy_settings(self.kv.as_ref()) else {
            return DosingSettings::default();
        };

        info!("Migrating legacy dosing settings into settings history");
        let content = self.assemble_content(legacy.clone(), None);
        let snapshot = SettingsSnapshot::new(self.clock.now(), content);
        if self.persist(snapshot).await != StoreOutcome::Stored {
            warn!("Legacy settings migration will be retried on next read");
        }
        legacy
    }

    /// Snapshot the live state and append it unless it matches the latest snapshot.
    ///
    /// `notification_settings` falls back to the latest snapshot's permission state.
    pub async fn store_settings(
        &self,
        notification_settings: Option<NotificationSettings>,
    ) -> StoreOutcome {
        if self.features.remote_overrides_enabled && self.device_token().is_none() {
            debug!("Skipping settings store until a device token is available");
            return StoreOutcome::AwaitingDeviceToken;
        }

        let latest = match self.store.latest().await {
            Ok(latest) => latest,
            Err(err) => {
                error!("Failed to read latest settings: {err:#}");
                return StoreOutcome::Failed;
            }
        };

        let notification_settings = notification_settings.or_else(|| {
            latest
                .as_ref()
                .and_then(|snapshot| snapshot.content().notification_settings.clone())
        });
        let dosing = self
            .device_status
            .dosing_settings()
            .or_else(|| latest.as_ref().map(|snapshot| snapshot.dosing().clone()))
            .unwrap_or_default();
        let content = self.assemble_content(dosing, notification_settings);

        let timestamp = next_timestamp(self.clock.now(), latest.as_ref());
        let snapshot = SettingsSnapshot::new(timestamp, content);
        if let Some(latest) = &latest {
            if latest.same_content(&snapshot) {
                debug!("Settings unchanged since {}", latest.timestamp().to_rfc3339());
                return StoreOutcome::Unchanged;
            }
        }

        self.persist(snapshot).await
    }

    /// Store only if notification permissions or the controller device changed.
    pub async fn store_settings_checking_notification_permissions(&self) -> StoreOutcome {
        let notification_settings = match self.permissions.current_settings().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!("Failed to query notification permissions: {err:#}");
                return StoreOutcome::Failed;
            }
        };

        let latest = match self.store.latest().await {
            Ok(Some(latest)) => latest,
            Ok(None) => return StoreOutcome::NothingToCompare,
            Err(err) => {
                error!("Failed to read latest settings: {err:#}");
                return StoreOutcome::Failed;
            }
        };

        let controller_device = self.device_status.controller_device();
        let permissions_changed =
            latest.content().notification_settings.as_ref() != Some(&notification_settings);
        let controller_changed = latest.content().controller_device != controller_device;

        if permissions_changed || controller_changed {
            self.store_settings(Some(notification_settings)).await
        } else {
            StoreOutcome::Unchanged
        }
    }

    /// Record the push token and store settings with it.
    pub async fn on_device_token_acquired(&self, token: &[u8]) -> StoreOutcome {
        let token = hex::encode(token);
        info!("Device token acquired");
        *self.token_guard() = Some(token);
        self.store_settings(None).await
    }

    fn assemble_content(
        &self,
        dosing: DosingSettings,
        notification_settings: Option<NotificationSettings>,
    ) -> SettingsContent {
        SettingsContent {
            dosing,
            device_token: self.device_token(),
            controller_device: self.device_status.controller_device(),
            pump_device: self.device_status.pump_device(),
            cgm_device: self.device_status.cgm_device(),
            notification_settings,
        }
    }

    async fn persist(&self, snapshot: SettingsSnapshot) -> StoreOutcome {
        let timestamp = snapshot.timestamp();
        if let Err(err) = self.store.store(snapshot).await {
            error!("Failed to store settings snapshot: {err:#}");
            return StoreOutcome::Failed;
        }

        info!("Stored settings snapshot at {}", timestamp.to_rfc3339());
        self.delegate.on_settings_store_updated(self.store.clone());
        self.purge_expired(timestamp).await;

        StoreOutcome::Stored
    }

    /// Drop snapshots past retention, but only those the sync delegate already handed off.
    async fn purge_expired(&self, newest: DateTime<Utc>) {
        let Some(cutoff) = newest.checked_sub_signed(self.retention) else {
            debug!("Retention window predates representable time, nothing to purge");
            return;
        };
        let Some(uploaded_through) = self.delegate.uploaded_through() else {
            debug!("No settings uploaded yet, keeping full history");
            return;
        };

        match self.store.purge_before(cutoff, uploaded_through).await {
            Ok(0) => {}
            Ok(removed) => debug!("Purged {removed} expired settings snapshots"),
            Err(err) => warn!("Failed to purge settings history: {err:#}"),
        }
    }

    fn token_guard(&self) -> MutexGuard<'_, Option<String>> {
        match self.device_token.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Keep history timestamps strictly increasing even if the wall clock stepped back.
fn next_timestamp(now: DateTime<Utc>, latest: Option<&SettingsSnapshot>) -> DateTime<Utc> {
    match latest {
        Some(latest) if now.timestamp_millis() <= latest.timestamp().timestamp_millis() => {
            latest.timestamp() + Duration::milliseconds(1)
        }
        _ => now,
    }
}
