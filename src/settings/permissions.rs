use anyhow::Result;
use async_trait::async_trait;

use super::NotificationSettings;

/// Live notification permission state, queried asynchronously from the platform.
#[async_trait]
pub trait NotificationPermissionQuery: Send + Sync {
    async fn current_settings(&self) -> Result<NotificationSettings>;
}

/// Permission state fixed by configuration, for hosts without a notification center.
pub struct StaticPermissions {
    settings: NotificationSettings,
}

impl StaticPermissions {
    pub fn new(settings: NotificationSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl NotificationPermissionQuery for StaticPermissions {
    async fn current_settings(&self) -> Result<NotificationSettings> {
        Ok(self.settings.clone())
    }
}
