use std::sync::{Arc, Weak};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::alerts::{Alert, AlertIssuer, AlertTrigger};
use super::reference::TimeReferenceService;
use crate::config::TimeTrustConfig;
use crate::kv_store::{get_typed, set_typed, KeyValueStore};
use crate::utils::clock::Clock;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const OFFSET_KEY: &str = "time_trust.detected_offset_ms";
pub const LAST_ALERT_KEY: &str = "time_trust.last_alert_at";
pub const TIME_CHANGED_ALERT_ID: &str = "loopwatch.time_trust.time_changed";

/// Last reconciliation result, persisted across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOffsetRecord {
    pub offset: Duration,
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl Default for TimeOffsetRecord {
    fn default() -> Self {
        Self {
            offset: Duration::zero(),
            last_alert_at: None,
        }
    }
}

impl TimeOffsetRecord {
    pub fn load(kv: &dyn KeyValueStore) -> Self {
        Self {
            offset: get_typed::<i64>(kv, OFFSET_KEY)
                .and_then(Duration::try_milliseconds)
                .unwrap_or_else(Duration::zero),
            last_alert_at: get_typed(kv, LAST_ALERT_KEY),
        }
    }

    pub fn save(&self, kv: &dyn KeyValueStore) -> Result<()> {
        set_typed(kv, OFFSET_KEY, &self.offset.num_milliseconds())?;
        match self.last_alert_at {
            Some(at) => set_typed(kv, LAST_ALERT_KEY, &at),
            None => kv.remove(LAST_ALERT_KEY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Device clock within tolerance.
    Trusted,
    /// Drift beyond tolerance; `alerted` is false while the alert is rate limited.
    Drift { offset: Duration, alerted: bool },
    /// Reference fetch failed; nothing changed.
    FetchFailed,
}

/// Watches the device clock against a trusted network reference.
pub struct TimeTrustMonitor {
    reference: Arc<dyn TimeReferenceService>,
    alert_issuer: Weak<dyn AlertIssuer>,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    acceptable_time_delta: Duration,
    alert_interval: Duration,
    record: Mutex<TimeOffsetRecord>,
}

impl TimeTrustMonitor {
    pub fn new(
        reference: Arc<dyn TimeReferenceService>,
        alert_issuer: Weak<dyn AlertIssuer>,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &TimeTrustConfig,
    ) -> Self {
        let record = TimeOffsetRecord::load(kv.as_ref());
        if record.offset != Duration::zero() {
            log_info!(
                "Restored detected clock offset of {}ms",
                record.offset.num_milliseconds()
            );
        }

        Self {
            reference,
            alert_issuer,
            kv,
            clock,
            acceptable_time_delta: config.acceptable_time_delta(),
            alert_interval: config.alert_interval(),
            record: Mutex::new(record),
        }
    }

    pub async fn record(&self) -> TimeOffsetRecord {
        *self.record.lock().await
    }

    pub async fn detected_offset(&self) -> Duration {
        self.record.lock().await.offset
    }

    pub async fn last_alert_at(&self) -> Option<DateTime<Utc>> {
        self.record.lock().await.last_alert_at
    }

    /// Device time corrected by the last detected offset.
    pub async fn adjusted_now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        now.checked_add_signed(self.detected_offset().await).unwrap_or(now)
    }

    pub async fn check_trusted_time(&self) -> CheckOutcome {
        let reference = match self.reference.fetch_if_needed().await {
            Ok(reference) => reference,
            Err(err) => {
                log_warn!("Trusted time fetch failed: {err:#}");
                return CheckOutcome::FetchFailed;
            }
        };

        self.reconcile(reference.now(), self.clock.now()).await
    }

    /// Compare a trusted reading with the device clock and update the record.
    pub async fn reconcile(
        &self,
        reference_now: DateTime<Utc>,
        device_now: DateTime<Utc>,
    ) -> CheckOutcome {
        let delta = reference_now - device_now;
        let mut record = self.record.lock().await;

        let outcome = if delta.abs() > self.acceptable_time_delta {
            log_warn!(
                "Device clock differs from trusted time by {}ms",
                delta.num_milliseconds()
            );
            record.offset = delta;

            let alerted = if self.alert_due(record.last_alert_at, device_now) {
                let issued = self.issue_time_changed_alert();
                if issued {
                    record.last_alert_at = Some(device_now);
                }
                issued
            } else {
                log_debug!("Time change alert suppressed, last issued recently");
                false
            };

            CheckOutcome::Drift {
                offset: delta,
                alerted,
            }
        } else {
            if record.last_alert_at.is_some() {
                if let Some(issuer) = self.alert_issuer.upgrade() {
                    issuer.retract_alert(TIME_CHANGED_ALERT_ID);
                }
            }
            record.offset = Duration::zero();
            record.last_alert_at = None;
            CheckOutcome::Trusted
        };

        if let Err(err) = record.save(self.kv.as_ref()) {
            log_error!("Failed to persist time offset: {err:#}");
        }

        outcome
    }

    fn alert_due(&self, last_alert_at: Option<DateTime<Utc>>, device_now: DateTime<Utc>) -> bool {
        match last_alert_at {
            None => true,
            Some(last) => {
                let since = device_now - last;
                // A negative interval means the clock was set back past the last alert.
                since > self.alert_interval || since < Duration::zero()
            }
        }
    }

    fn issue_time_changed_alert(&self) -> bool {
        let Some(issuer) = self.alert_issuer.upgrade() else {
            log_debug!("No alert issuer available, skipping time change alert");
            return false;
        };

        issuer.issue_alert(time_changed_alert());
        true
    }
}

pub fn time_changed_alert() -> Alert {
    Alert {
        identifier: TIME_CHANGED_ALERT_ID.into(),
        title: "Time Change Detected".into(),
        body: "Your device's time does not match network time. Accurate time is needed \
               to predict glucose and adjust insulin.\n\nOpen the date and time settings \
               and make sure the time is set automatically. Leaving this unresolved can \
               lead to under- or over-delivery of insulin."
            .into(),
        acknowledge_label: "OK".into(),
        trigger: AlertTrigger::Immediate,
    }
}
