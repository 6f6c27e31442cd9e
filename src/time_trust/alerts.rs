use std::time::Duration;

use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTrigger {
    Immediate,
    Delayed(Duration),
    Repeating(Duration),
}

/// A user-acknowledgeable alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub acknowledge_label: String,
    pub trigger: AlertTrigger,
}

pub trait AlertIssuer: Send + Sync {
    fn issue_alert(&self, alert: Alert);
    fn retract_alert(&self, identifier: &str);
}

/// Writes alerts to the log; stands in for a notification center.
#[derive(Debug, Default)]
pub struct LoggingAlertIssuer;

impl AlertIssuer for LoggingAlertIssuer {
    fn issue_alert(&self, alert: Alert) {
        warn!(
            "ALERT [{}] {}: {} ({:?})",
            alert.identifier, alert.title, alert.body, alert.trigger
        );
    }

    fn retract_alert(&self, identifier: &str) {
        info!("Alert {identifier} retracted");
    }
}
