//! Minimum-interval throttle shared by concurrent calls of one adapter

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep};

#[derive(Debug)]
pub(crate) struct Throttle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Wait until at least `min_interval` has passed since the previous acquire
    pub(crate) async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        loop {
            let mut last = self.last.lock().await;
            let now = Instant::now();

            let wait_for = match *last {
                Some(previous) => self
                    .min_interval
                    .saturating_sub(now.duration_since(previous)),
                None => Duration::ZERO,
            };

            if wait_for.is_zero() {
                *last = Some(now);
                return;
            }

            drop(last);
            sleep(wait_for).await;
        }
    }
}
