//! Loop pacing for strategy instances.

use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Bounds the run loop to one iteration per period.
///
/// The first tick completes immediately. A slow iteration delays the next
/// tick rather than bursting to catch up.
pub struct Pacer {
    interval: Interval,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
