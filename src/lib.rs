mod commands;
pub mod config;
pub mod db;
pub mod events;
pub mod kv_store;
pub mod remote_sync;
pub mod settings;
pub mod time_trust;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use commands::Command;
use config::AppConfig;
use db::Database;
use events::{AppEvent, EventLoop};
use kv_store::{JsonFileStore, KeyValueStore};
use remote_sync::RemoteSyncQueue;
use settings::{
    FileDeviceStatus, SettingsHistoryStore, SettingsManager, StaticPermissions,
};
use time_trust::{
    clock_watch::clock_watch_loop, AlertIssuer, LoggingAlertIssuer, SntpClient, TimeTrustMonitor,
};
use utils::clock::{Clock, SystemClock};

struct AppState {
    db: Arc<Database>,
    monitor: Arc<TimeTrustMonitor>,
    settings: Arc<SettingsManager>,
    device_status: Arc<FileDeviceStatus>,
    sync_queue: Arc<RemoteSyncQueue>,
    events: mpsc::Sender<AppEvent>,
}

pub async fn run(config: AppConfig) -> Result<()> {
    utils::logging::init();
    utils::logging::set_debug(config.debug);

    info!("loopwatch starting up...");

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory {}", config.data_dir.display())
    })?;

    let kv: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(config.state_path())?);
    let database = Arc::new(Database::new(config.database_path())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // The monitor only holds a weak reference; this binding keeps the issuer alive.
    let alert_issuer: Arc<dyn AlertIssuer> = Arc::new(LoggingAlertIssuer);
    let monitor = Arc::new(TimeTrustMonitor::new(
        Arc::new(SntpClient::from_config(&config.time_trust)),
        Arc::downgrade(&alert_issuer),
        kv.clone(),
        clock.clone(),
        &config.time_trust,
    ));

    let device_status = Arc::new(FileDeviceStatus::new(config.dosing_path()));
    let sync_queue = Arc::new(RemoteSyncQueue::new(kv.clone()));
    let settings = Arc::new(SettingsManager::new(
        database.clone(),
        device_status.clone(),
        Arc::new(StaticPermissions::new(
            config.settings.notification_settings.clone(),
        )),
        kv.clone(),
        sync_queue.clone(),
        clock,
        &config,
    ));

    let effective = settings.current_effective_settings().await;
    info!(
        "Effective dosing settings: dosing enabled={}, max bolus={:?}, max basal={:?}",
        effective.dosing_enabled, effective.maximum_bolus, effective.maximum_basal_rate_per_hour
    );

    let (events_tx, events_rx) = events::channel();
    let cancel_token = CancellationToken::new();

    let event_loop = tokio::spawn(
        EventLoop::new(monitor.clone(), settings.clone()).run(events_rx, cancel_token.clone()),
    );
    let clock_watch = tokio::spawn(clock_watch_loop(
        std::time::Duration::from_secs(config.time_trust.clock_watch_interval_secs),
        config.time_trust.clock_jump_tolerance(),
        events_tx.clone(),
        cancel_token.clone(),
    ));

    {
        let monitor = monitor.clone();
        tokio::spawn(async move {
            monitor.check_trusted_time().await;
        });
    }
    events_tx
        .send(AppEvent::PreferencesChanged)
        .await
        .context("event loop stopped before startup")?;

    let state = AppState {
        db: database,
        monitor,
        settings,
        device_status,
        sync_queue,
        events: events_tx,
    };

    read_commands(&state).await;

    cancel_token.cancel();
    for (name, handle) in [("event loop", event_loop), ("clock watch", clock_watch)] {
        if let Err(err) = handle.await {
            error!("{name} task failed: {err}");
        }
    }

    drop(alert_issuer);
    info!("loopwatch stopped");
    Ok(())
}

async fn read_commands(state: &AppState) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        if !stdin_open {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for Ctrl-C: {err}");
            }
            info!("Interrupt received");
            return;
        }

        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => return,
                    Ok(Some(command)) => {
                        if let Err(err) = handle_command(state, command).await {
                            error!("Command failed: {err:#}");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!("{err}"),
                },
                Ok(None) => {
                    info!("stdin closed; running until interrupted");
                    stdin_open = false;
                }
                Err(err) => {
                    error!("Failed to read stdin: {err}");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                return;
            }
        }
    }
}

async fn handle_command(state: &AppState, command: Command) -> Result<()> {
    let event = match command {
        Command::LoopCompleted => AppEvent::LoopCompleted,
        Command::TimeChanged => AppEvent::SignificantTimeChange,
        Command::Activate => AppEvent::AppActivated,
        Command::Preferences => {
            if let Err(err) = state.device_status.reload() {
                warn!("Keeping previous dosing settings: {err:#}");
            }
            AppEvent::PreferencesChanged
        }
        Command::Token(token) => AppEvent::DeviceTokenAcquired(token),
        Command::Sync => {
            state.sync_queue.refresh(state.db.as_ref()).await?;
            let uploads = state.sync_queue.take_pending().await?;
            println!("{}", serde_json::to_string_pretty(&uploads)?);
            return Ok(());
        }
        Command::Status => {
            let record = state.monitor.record().await;
            let latest = state.db.latest().await?;
            let adjusted_now = state.monitor.adjusted_now().await;
            let pending_uploads = state.sync_queue.pending_count().await;
            let status = json!({
                "detectedOffsetMs": record.offset.num_milliseconds(),
                "lastAlertAt": record.last_alert_at,
                "adjustedNow": adjusted_now,
                "latestSettingsAt": latest.as_ref().map(|snapshot| snapshot.timestamp()),
                "deviceTokenRecorded": state.settings.device_token().is_some(),
                "pendingUploads": pending_uploads,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }
        Command::Quit => return Ok(()),
    };

    state
        .events
        .send(event)
        .await
        .context("event loop is no longer running")
}
