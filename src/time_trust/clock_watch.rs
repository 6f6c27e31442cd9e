use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use log::{info, warn};
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::events::AppEvent;

/// Wall-clock drift between two readings beyond what the monotonic clock explains.
pub fn wall_clock_jump(wall_elapsed: Duration, monotonic_elapsed: StdDuration) -> Duration {
    let monotonic = Duration::from_std(monotonic_elapsed).unwrap_or_else(|_| Duration::zero());
    wall_elapsed - monotonic
}

/// Emit `SignificantTimeChange` whenever the wall clock jumps by more than `tolerance`.
pub async fn clock_watch_loop(
    interval: StdDuration,
    tolerance: Duration,
    events: mpsc::Sender<AppEvent>,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_wall = Utc::now();
    let mut last_instant = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let wall = Utc::now();
                let instant = Instant::now();
                let jump = wall_clock_jump(wall - last_wall, instant - last_instant);
                last_wall = wall;
                last_instant = instant;

                if jump.abs() > tolerance {
                    info!("Wall clock jumped by {}ms", jump.num_milliseconds());
                    if events.send(AppEvent::SignificantTimeChange).await.is_err() {
                        warn!("Event loop closed; stopping clock watch");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Clock watch shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_clock_has_no_jump() {
        let jump = wall_clock_jump(Duration::seconds(10), StdDuration::from_secs(10));
        assert_eq!(jump, Duration::zero());
    }

    #[test]
    fn detects_forward_and_backward_steps() {
        let forward = wall_clock_jump(Duration::seconds(310), StdDuration::from_secs(10));
        assert_eq!(forward, Duration::seconds(300));

        let backward = wall_clock_jump(Duration::seconds(-50), StdDuration::from_secs(10));
        assert_eq!(backward, Duration::seconds(-60));
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let handle = tokio::spawn(clock_watch_loop(
            StdDuration::from_millis(10),
            Duration::seconds(5),
            tx,
            token.clone(),
        ));

        token.cancel();
        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
