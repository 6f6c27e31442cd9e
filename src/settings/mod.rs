pub mod device;
pub mod history;
pub mod legacy;
pub mod manager;
pub mod permissions;

pub use crate::db::models::{
    AuthorizationStatus, ControllerDevice, DeviceDescriptor, DosingSettings, NotificationSetting,
    NotificationSettings,
};
pub use device::{DeviceStatusProvider, FileDeviceStatus};
pub use history::{SettingsHistoryStore, SettingsSyncDelegate};
pub use manager::{SettingsManager, StoreOutcome};
pub use permissions::{NotificationPermissionQuery, StaticPermissions};
