//! Settings snapshot records stored in `settings_history`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DosingSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    NotDetermined,
    Denied,
    Authorized,
    Provisional,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NotificationSetting {
    NotSupported,
    Disabled,
    Enabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub authorization_status: AuthorizationStatus,
    pub sound: NotificationSetting,
    pub badge: NotificationSetting,
    pub alert: NotificationSetting,
    pub critical_alert: NotificationSetting,
    pub time_sensitive: NotificationSetting,
    pub scheduled_delivery: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            authorization_status: AuthorizationStatus::NotDetermined,
            sound: NotificationSetting::NotSupported,
            badge: NotificationSetting::NotSupported,
            alert: NotificationSetting::NotSupported,
            critical_alert: NotificationSetting::NotSupported,
            time_sensitive: NotificationSetting::NotSupported,
            scheduled_delivery: false,
        }
    }
}

/// The device running the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerDevice {
    pub name: String,
    pub system_name: String,
    pub system_version: String,
    pub model: String,
    pub model_identifier: String,
}

/// A paired pump or CGM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub hardware_version: Option<String>,
    pub firmware_version: Option<String>,
    pub software_version: Option<String>,
    pub local_identifier: Option<String>,
}

/// Everything a snapshot records apart from when it was taken.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsContent {
    pub dosing: DosingSettings,
    pub device_token: Option<String>,
    pub controller_device: Option<ControllerDevice>,
    pub pump_device: Option<DeviceDescriptor>,
    pub cgm_device: Option<DeviceDescriptor>,
    pub notification_settings: Option<NotificationSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    timestamp: DateTime<Utc>,
    sync_identifier: Uuid,
    content: SettingsContent,
}

impl SettingsSnapshot {
    pub fn new(timestamp: DateTime<Utc>, content: SettingsContent) -> Self {
        Self {
            timestamp,
            sync_identifier: Uuid::new_v4(),
            content,
        }
    }

    pub(crate) fn from_parts(
        timestamp: DateTime<Utc>,
        sync_identifier: Uuid,
        content: SettingsContent,
    ) -> Self {
        Self {
            timestamp,
            sync_identifier,
            content,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn sync_identifier(&self) -> Uuid {
        self.sync_identifier
    }

    pub fn content(&self) -> &SettingsContent {
        &self.content
    }

    pub fn dosing(&self) -> &DosingSettings {
        &self.content.dosing
    }

    /// True when both snapshots describe the same settings, whenever they were taken.
    pub fn same_content(&self, other: &SettingsSnapshot) -> bool {
        self.content == other.content
    }
}

/// A snapshot together with its position in the history, used as a sync anchor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot {
    pub id: i64,
    pub snapshot: SettingsSnapshot,
}
