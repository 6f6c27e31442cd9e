pub mod dosing;
pub mod settings_snapshot;

pub use dosing::{
    DailySchedule, DosingSettings, DosingStrategy, GlucoseRange, GlucoseRangeSchedule,
    GlucoseThreshold, GlucoseUnit, InsulinModel, OverrideDuration, OverrideEnactor,
    OverridePreset, ScheduleItem, TemporaryOverride,
};
pub use settings_snapshot::{
    AuthorizationStatus, ControllerDevice, DeviceDescriptor, NotificationSetting,
    NotificationSettings, SettingsContent, SettingsSnapshot, StoredSnapshot,
};
