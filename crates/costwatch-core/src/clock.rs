//! Time sources for the scheduled loops
//!
//! Both loops take a [`Clock`] for timestamps and calculation dates, and a
//! [`Ticker`] that decides when a cycle starts. Production code uses the
//! system clock and a tokio interval; tests drive cycles by hand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Trigger for the next cycle of a loop
#[async_trait]
pub trait Ticker: Send {
    /// Wait until the next cycle is due.
    /// Returns `false` once the ticker is exhausted and the loop should stop.
    async fn tick(&mut self) -> bool;
}

/// Fixed-interval ticker
///
/// The first tick completes immediately. Missed ticks are skipped so a slow
/// or failed cycle never shifts the schedule of the following ones.
pub struct IntervalTicker {
    inner: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut inner = interval(period);
        inner.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { inner }
    }

    pub fn period(&self) -> Duration {
        self.inner.period()
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.inner.tick().await;
        true
    }
}
