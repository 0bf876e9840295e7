//! Playback tick timer owned by one connection task.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Cancellable periodic timer. Starting and stopping are idempotent.
#[derive(Debug)]
pub struct TickTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl TickTimer {
    /// Create a stopped timer.
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Whether the timer is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Start ticking one period from now. No-op when already running.
    pub fn start(&mut self) {
        if self.interval.is_some() {
            return;
        }
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
    }

    /// Stop ticking. No-op when already stopped.
    pub fn stop(&mut self) {
        self.interval = None;
    }

    /// Run while `streaming`, stop otherwise.
    pub fn sync(&mut self, streaming: bool) {
        if streaming {
            self.start();
        } else {
            self.stop();
        }
    }

    /// Wait for the next tick; pending forever while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;

    const PERIOD: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn running_timer_ticks() {
        let mut timer = TickTimer::new(PERIOD);
        timer.start();

        for _ in 0..3 {
            assert!(timeout(Duration::from_secs(1), timer.tick()).await.is_ok());
        }
    }

    #[tokio::test]
    async fn stopped_timer_never_ticks() {
        let mut timer = TickTimer::new(PERIOD);
        assert!(timeout(PERIOD * 4, timer.tick()).await.is_err());

        timer.start();
        timer.stop();
        assert!(timeout(PERIOD * 4, timer.tick()).await.is_err());
    }

    #[tokio::test]
    async fn first_tick_waits_one_period() {
        let mut timer = TickTimer::new(Duration::from_millis(200));
        timer.start();
        assert!(timeout(Duration::from_millis(50), timer.tick()).await.is_err());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let mut timer = TickTimer::new(PERIOD);
        timer.stop();
        assert!(!timer.is_running());

        timer.sync(true);
        timer.sync(true);
        assert!(timer.is_running());

        timer.sync(false);
        timer.sync(false);
        assert!(!timer.is_running());
    }
}
