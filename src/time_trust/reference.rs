use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::time::Instant;

/// Trusted time captured at a monotonic instant.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceTime {
    time: DateTime<Utc>,
    anchor: Option<Instant>,
}

impl ReferenceTime {
    /// Reference that keeps advancing with the monotonic clock from `anchor`.
    pub fn anchored(time: DateTime<Utc>, anchor: Instant) -> Self {
        Self {
            time,
            anchor: Some(anchor),
        }
    }

    /// Reference whose `now()` never advances.
    pub fn frozen(time: DateTime<Utc>) -> Self {
        Self { time, anchor: None }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self.anchor {
            Some(anchor) => {
                let elapsed = Duration::from_std(anchor.elapsed()).unwrap_or(Duration::zero());
                self.time + elapsed
            }
            None => self.time,
        }
    }

    /// Monotonic age of the reference.
    pub fn age(&self) -> std::time::Duration {
        self.anchor
            .map(|anchor| anchor.elapsed())
            .unwrap_or_default()
    }
}

/// Network time source. Implementations own single-flight behaviour and caching.
#[async_trait]
pub trait TimeReferenceService: Send + Sync {
    async fn fetch_if_needed(&self) -> Result<ReferenceTime>;
}
