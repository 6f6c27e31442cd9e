//! Serial event loop: every external trigger is handled here, one at a time.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::settings::SettingsManager;
use crate::time_trust::TimeTrustMonitor;

const EVENT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The wall clock was changed outside this process.
    SignificantTimeChange,
    /// A dosing loop cycle finished.
    LoopCompleted,
    /// The app came to the foreground.
    AppActivated,
    /// The user edited dosing preferences.
    PreferencesChanged,
    /// Push registration produced a token.
    DeviceTokenAcquired(Vec<u8>),
}

pub fn channel() -> (mpsc::Sender<AppEvent>, mpsc::Receiver<AppEvent>) {
    mpsc::channel(EVENT_QUEUE_CAPACITY)
}

pub struct EventLoop {
    monitor: Arc<TimeTrustMonitor>,
    settings: Arc<SettingsManager>,
}

impl EventLoop {
    pub fn new(monitor: Arc<TimeTrustMonitor>, settings: Arc<SettingsManager>) -> Self {
        Self { monitor, settings }
    }

    pub async fn run(self, mut events: mpsc::Receiver<AppEvent>, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
                _ = cancel_token.cancelled() => break,
            }
        }
        info!("Event loop shutting down");
    }

    async fn dispatch(&self, event: AppEvent) {
        debug!("Handling {event:?}");
        match event {
            AppEvent::SignificantTimeChange | AppEvent::LoopCompleted => {
                // Fetches can be slow; settings events must not wait behind them.
                let monitor = self.monitor.clone();
                tokio::spawn(async move {
                    let outcome = monitor.check_trusted_time().await;
                    debug!("Trusted time check finished: {outcome:?}");
                });
            }
            AppEvent::AppActivated => {
                let outcome = self
                    .settings
                    .store_settings_checking_notification_permissions()
                    .await;
                debug!("Activation settings check: {outcome:?}");
            }
            AppEvent::PreferencesChanged => {
                let outcome = self.settings.store_settings(None).await;
                debug!("Preferences store: {outcome:?}");
            }
            AppEvent::DeviceTokenAcquired(token) => {
                let outcome = self.settings.on_device_token_acquired(&token).await;
                debug!("Device token store: {outcome:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::Database;
    use crate::kv_store::MemoryStore;
    use crate::remote_sync::RemoteSyncQueue;
    use crate::settings::{
        FileDeviceStatus, NotificationSettings, SettingsHistoryStore, StaticPermissions,
    };
    use crate::time_trust::{AlertIssuer, LoggingAlertIssuer, ReferenceTime, TimeReferenceService};
    use crate::utils::clock::SystemClock;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::time::Duration as StdDuration;

    struct AheadReference;

    #[async_trait]
    impl TimeReferenceService for AheadReference {
        async fn fetch_if_needed(&self) -> Result<ReferenceTime> {
            Ok(ReferenceTime::frozen(Utc::now() + Duration::hours(1)))
        }
    }

    #[tokio::test]
    async fn dispatches_events_to_components() {
        let config = AppConfig::default();
        let kv = Arc::new(MemoryStore::new());
        let db = Arc::new(Database::in_memory().unwrap());
        let issuer: Arc<dyn AlertIssuer> = Arc::new(LoggingAlertIssuer);
        let clock = Arc::new(SystemClock);

        let monitor = Arc::new(TimeTrustMonitor::new(
            Arc::new(AheadReference),
            Arc::downgrade(&issuer),
            kv.clone(),
            clock.clone(),
            &config.time_trust,
        ));
        let device_path = std::env::temp_dir()
            .join(format!("loopwatch-events-{}", uuid::Uuid::new_v4()))
            .join("dosing.json");
        let settings = Arc::new(SettingsManager::new(
            db.clone(),
            Arc::new(FileDeviceStatus::new(device_path)),
            Arc::new(StaticPermissions::new(NotificationSettings::default())),
            kv.clone(),
            Arc::new(RemoteSyncQueue::new(kv.clone())),
            clock,
            &config,
        ));

        let (tx, rx) = channel();
        let token = CancellationToken::new();
        let handle = tokio::spawn(EventLoop::new(monitor.clone(), settings).run(rx, token.clone()));

        tx.send(AppEvent::DeviceTokenAcquired(vec![0xab, 0xcd]))
            .await
            .unwrap();
        tx.send(AppEvent::LoopCompleted).await.unwrap();

        let mut offset = Duration::zero();
        for _ in 0..100 {
            offset = monitor.detected_offset().await;
            if offset != Duration::zero() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert!(offset > Duration::minutes(59));

        token.cancel();
        handle.await.unwrap();

        let latest = db.latest().await.unwrap().unwrap();
        assert_eq!(latest.content().device_token.as_deref(), Some("abcd"));
    }
}
