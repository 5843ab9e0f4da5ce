use std::future::Future;

use log::debug;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};

/// Starts a job on a fixed interval, forever.
///
/// Each job is spawned as its own task, so a slow or hung job never delays
/// the next one. Jobs may overlap.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    period: Duration,
    run_immediately: bool,
}

impl Scheduler {
    /// Panics if `period` is zero.
    pub fn new(period: Duration) -> Self {
        assert!(!period.is_zero(), "scheduler period must be non-zero");
        Self { period, run_immediately: false }
    }

    /// Start the first job straight away instead of after one period
    pub fn run_immediately(mut self, run_immediately: bool) -> Self {
        self.run_immediately = run_immediately;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn `job()` on every tick. Never returns.
    pub async fn run<F, Fut>(&self, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut ticks = self.ticks();
        for tick in 1u64.. {
            ticks.tick().await;
            debug!("Starting cycle {tick}");
            tokio::spawn(job());
        }
    }

    fn ticks(&self) -> Interval {
        let start = if self.run_immediately { Instant::now() } else { Instant::now() + self.period };
        let mut ticks = interval_at(start, self.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticks
    }
}
