use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard},
};

use crate::db::models::dosing::validation::validate_dosing;

use super::{ControllerDevice, DeviceDescriptor, DosingSettings};

/// Synchronous accessors for the live dosing configuration and paired devices.
pub trait DeviceStatusProvider: Send + Sync {
    /// `None` when no live configuration is loaded.
    fn dosing_settings(&self) -> Option<DosingSettings>;
    fn controller_device(&self) -> Option<ControllerDevice>;
    fn pump_device(&self) -> Option<DeviceDescriptor>;
    fn cgm_device(&self) -> Option<DeviceDescriptor>;
}

/// Layout of the `dosing.json` file maintained by the dosing app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveStatus {
    pub dosing: Option<DosingSettings>,
    pub pump_device: Option<DeviceDescriptor>,
    pub cgm_device: Option<DeviceDescriptor>,
}

/// Reads live status from a JSON file; the controller is the host running this process.
pub struct FileDeviceStatus {
    path: PathBuf,
    status: RwLock<LiveStatus>,
    controller: ControllerDevice,
}

impl FileDeviceStatus {
    pub fn new(path: PathBuf) -> Self {
        let device = Self {
            path,
            status: RwLock::new(LiveStatus::default()),
            controller: host_controller_device(),
        };
        if let Err(err) = device.reload() {
            warn!("Live dosing status unavailable: {err:#}");
        }
        device
    }

    /// Re-read the status file. Invalid contents leave the previous status in place.
    pub fn reload(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read live status from {}", self.path.display()))?;
        let status: LiveStatus = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        if let Some(dosing) = &status.dosing {
            validate_dosing(dosing).context("live dosing settings rejected")?;
        }

        let mut guard = match self.status.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = status;
        info!("Loaded live dosing status from {}", self.path.display());
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, LiveStatus> {
        match self.status.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DeviceStatusProvider for FileDeviceStatus {
    fn dosing_settings(&self) -> Option<DosingSettings> {
        self.read().dosing.clone()
    }

    fn controller_device(&self) -> Option<ControllerDevice> {
        Some(self.controller.clone())
    }

    fn pump_device(&self) -> Option<DeviceDescriptor> {
        self.read().pump_device.clone()
    }

    fn cgm_device(&self) -> Option<DeviceDescriptor> {
        self.read().cgm_device.clone()
    }
}

fn host_controller_device() -> ControllerDevice {
    let name = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".into());

    ControllerDevice {
        name,
        system_name: std::env::consts::OS.into(),
        system_version: os_release_version().unwrap_or_else(|| "unknown".into()),
        model: std::env::consts::ARCH.into(),
        model_identifier: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
    }
}

fn os_release_version() -> Option<String> {
    let contents = fs::read_to_string("/etc/os-release").ok()?;
    contents
        .lines()
        .find_map(|line| line.strip_prefix("VERSION_ID="))
        .map(|value| value.trim_matches('"').to_string())
}
