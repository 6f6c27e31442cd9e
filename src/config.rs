use anyhow::{Context, Result};
use chrono::Duration;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, fs, ops::RangeInclusive, path::PathBuf};

use crate::settings::NotificationSettings;

/// Runtime configuration, read from `<data_dir>/config.json` and then the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub debug: bool,
    pub time_trust: TimeTrustConfig,
    pub settings: SettingsConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeTrustConfig {
    pub ntp_servers: Vec<String>,
    pub ntp_timeout_secs: u64,
    pub reference_max_age_secs: u64,
    pub acceptable_time_delta_secs: i64,
    pub alert_interval_mins: i64,
    pub clock_watch_interval_secs: u64,
    pub clock_jump_tolerance_secs: i64,
}

impl Default for TimeTrustConfig {
    fn default() -> Self {
        Self {
            ntp_servers: vec![
                "time.apple.com:123".into(),
                "pool.ntp.org:123".into(),
                "time.google.com:123".into(),
            ],
            ntp_timeout_secs: 5,
            reference_max_age_secs: 15 * 60,
            acceptable_time_delta_secs: 120,
            alert_interval_mins: 30,
            clock_watch_interval_secs: 10,
            clock_jump_tolerance_secs: 5,
        }
    }
}

impl TimeTrustConfig {
    pub fn acceptable_time_delta(&self) -> Duration {
        Duration::try_seconds(self.acceptable_time_delta_secs).unwrap_or(Duration::MAX)
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::try_minutes(self.alert_interval_mins).unwrap_or(Duration::MAX)
    }

    pub fn clock_jump_tolerance(&self) -> Duration {
        Duration::try_seconds(self.clock_jump_tolerance_secs).unwrap_or(Duration::MAX)
    }

    fn sanitize(&mut self, problems: &mut Vec<String>) {
        let defaults = Self::default();
        if self.ntp_servers.iter().all(|server| server.trim().is_empty()) {
            problems.push("timeTrust.ntpServers is empty".into());
            self.ntp_servers = defaults.ntp_servers;
        }
        bound(
            problems,
            "timeTrust.ntpTimeoutSecs",
            &mut self.ntp_timeout_secs,
            1..=60,
            defaults.ntp_timeout_secs,
        );
        bound(
            problems,
            "timeTrust.referenceMaxAgeSecs",
            &mut self.reference_max_age_secs,
            0..=86_400,
            defaults.reference_max_age_secs,
        );
        bound(
            problems,
            "timeTrust.acceptableTimeDeltaSecs",
            &mut self.acceptable_time_delta_secs,
            0..=86_400,
            defaults.acceptable_time_delta_secs,
        );
        bound(
            problems,
            "timeTrust.alertIntervalMins",
            &mut self.alert_interval_mins,
            0..=10_080,
            defaults.alert_interval_mins,
        );
        bound(
            problems,
            "timeTrust.clockWatchIntervalSecs",
            &mut self.clock_watch_interval_secs,
            1..=3_600,
            defaults.clock_watch_interval_secs,
        );
        bound(
            problems,
            "timeTrust.clockJumpToleranceSecs",
            &mut self.clock_jump_tolerance_secs,
            1..=3_600,
            defaults.clock_jump_tolerance_secs,
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsConfig {
    pub retention_days: i64,
    /// Permission state reported on hosts without a notification center.
    pub notification_settings: NotificationSettings,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            notification_settings: NotificationSettings::default(),
        }
    }
}

impl SettingsConfig {
    /// Saturates instead of overflowing; an unrepresentable window purges nothing.
    pub fn retention(&self) -> Duration {
        Duration::try_days(self.retention_days).unwrap_or(Duration::MAX)
    }

    fn sanitize(&mut self, problems: &mut Vec<String>) {
        bound(
            problems,
            "settings.retentionDays",
            &mut self.retention_days,
            1..=36_500,
            Self::default().retention_days,
        );
    }
}

/// Replace `value` with `default` when it falls outside `range`.
fn bound<T>(
    problems: &mut Vec<String>,
    name: &str,
    value: &mut T,
    range: RangeInclusive<T>,
    default: T,
) where
    T: PartialOrd + Display + Copy,
{
    if !range.contains(&*value) {
        problems.push(format!(
            "{name} = {value} is outside {}..={}, using {default}",
            range.start(),
            range.end()
        ));
        *value = default;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlags {
    /// Remote overrides need a push token before any settings are uploaded.
    pub remote_overrides_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            debug: false,
            time_trust: TimeTrustConfig::default(),
            settings: SettingsConfig::default(),
            features: FeatureFlags::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let data_dir = std::env::var_os("LOOPWATCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        Self::load_from(data_dir, |key| std::env::var(key).ok())
    }

    /// Load `config.json` from `data_dir`, then apply overrides looked up through `env`.
    pub fn load_from<F>(data_dir: PathBuf, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = data_dir.join("config.json");
        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config from {}", config_path.display())
            })?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring invalid config {}: {err}", config_path.display());
                AppConfig::default()
            })
        } else {
            AppConfig::default()
        };
        config.data_dir = data_dir;

        if let Some(servers) = env("LOOPWATCH_NTP_SERVERS") {
            let servers: Vec<String> = servers
                .split(',')
                .map(str::trim)
                .filter(|server| !server.is_empty())
                .map(String::from)
                .collect();
            if !servers.is_empty() {
                config.time_trust.ntp_servers = servers;
            }
        }
        if let Some(value) = env("LOOPWATCH_REMOTE_OVERRIDES") {
            config.features.remote_overrides_enabled = is_truthy(&value);
        }
        if let Some(value) = env("LOOPWATCH_DEBUG") {
            config.debug = is_truthy(&value);
        }

        for problem in config.sanitize() {
            warn!("Ignoring config value: {problem}");
        }
        Ok(config)
    }

    /// Reset out-of-range values to their defaults. Returns what was changed.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut problems = Vec::new();
        self.time_trust.sanitize(&mut problems);
        self.settings.sanitize(&mut problems);
        problems
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("loopwatch.sqlite3")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn dosing_path(&self) -> PathBuf {
        self.data_dir.join("dosing.json")
    }
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".loopwatch"))
        .unwrap_or_else(|| PathBuf::from(".loopwatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("loopwatch-config-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = scratch_dir();
        let config = AppConfig::load_from(dir.clone(), |_| None).unwrap();

        assert_eq!(config.data_dir, dir);
        assert_eq!(config.time_trust.acceptable_time_delta(), Duration::seconds(120));
        assert_eq!(config.time_trust.alert_interval(), Duration::minutes(30));
        assert!(!config.features.remote_overrides_enabled);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.json"),
            r#"{"timeTrust": {"acceptableTimeDeltaSecs": 60}}"#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.clone(), |_| None).unwrap();
        assert_eq!(config.time_trust.acceptable_time_delta_secs, 60);
        assert_eq!(config.time_trust.alert_interval_mins, 30);
        assert_eq!(config.settings.retention_days, 30);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.json"), r#"{"timeTrust": {"alertIntervalMins": "#).unwrap();

        let config = AppConfig::load_from(dir.clone(), |_| None).unwrap();
        assert_eq!(config.time_trust.alert_interval_mins, 30);
        assert_eq!(config.time_trust.acceptable_time_delta_secs, 120);
        assert!(!config.features.remote_overrides_enabled);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn out_of_range_values_are_reset() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.json"),
            r#"{
                "timeTrust": {
                    "ntpServers": [],
                    "acceptableTimeDeltaSecs": -5,
                    "alertIntervalMins": 9223372036854775807,
                    "clockWatchIntervalSecs": 0,
                    "clockJumpToleranceSecs": 30
                },
                "settings": {"retentionDays": 1000000000}
            }"#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.clone(), |_| None).unwrap();
        let defaults = TimeTrustConfig::default();
        assert_eq!(config.time_trust.ntp_servers, defaults.ntp_servers);
        assert_eq!(config.time_trust.acceptable_time_delta_secs, 120);
        assert_eq!(config.time_trust.alert_interval_mins, 30);
        assert_eq!(config.time_trust.clock_watch_interval_secs, 10);
        assert_eq!(config.time_trust.clock_jump_tolerance_secs, 30);
        assert_eq!(config.settings.retention_days, 30);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn duration_accessors_saturate() {
        let mut config = AppConfig::default();
        config.settings.retention_days = i64::MAX;
        config.time_trust.alert_interval_mins = i64::MAX;

        assert_eq!(config.settings.retention(), Duration::MAX);
        assert_eq!(config.time_trust.alert_interval(), Duration::MAX);
        assert_eq!(config.sanitize().len(), 2);
        assert_eq!(config.settings.retention(), Duration::days(30));
    }

    #[test]
    fn environment_overrides_file() {
        let dir = scratch_dir();
        let config = AppConfig::load_from(dir, |key| match key {
            "LOOPWATCH_NTP_SERVERS" => Some("a.example:123, b.example:123".into()),
            "LOOPWATCH_REMOTE_OVERRIDES" => Some("true".into()),
            "LOOPWATCH_DEBUG" => Some("1".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(
            config.time_trust.ntp_servers,
            vec!["a.example:123".to_string(), "b.example:123".to_string()]
        );
        assert!(config.features.remote_overrides_enabled);
        assert!(config.debug);
    }
}
