use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use common::config::DEFAULT_CHECK_INTERVAL;

use crate::lifecycle::{AlarmEngine, CycleReport};

/// Drives `AlarmEngine::run_cycle` on a fixed period.
pub struct Scheduler {
    engine: Arc<AlarmEngine>,
    period: Duration,
}

/// Returned by `Scheduler::spawn`; stops the timer loop.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop ticking and wait for the loop to exit. A cycle awaiting the price
    /// source is dropped; staggered notifications are not waited for.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

impl Scheduler {
    /// A zero `period` falls back to `DEFAULT_CHECK_INTERVAL`.
    pub fn new(engine: Arc<AlarmEngine>, period: Duration) -> Self {
        let period = if period.is_zero() {
            warn!(
                fallback_secs = DEFAULT_CHECK_INTERVAL.as_secs(),
                "Zero check interval; using default"
            );
            DEFAULT_CHECK_INTERVAL
        } else {
            period
        };
        Self { engine, period }
    }

    /// Start the timer loop. The first cycle runs immediately.
    pub fn spawn(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        SchedulerHandle { cancel, task }
    }

    async fn run(self, cancel: CancellationToken) {
        info!(period_secs = self.period.as_secs(), "Alarm scheduler running");

        let mut interval = tokio::time::interval(self.period);
        // A slow price query must not cause a burst of catch-up cycles.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.engine.run_cycle() => match outcome {
                    Ok(CycleReport::Fired { alarms }) => {
                        info!(fired = alarms.len(), "Alarm cycle complete");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Alarm cycle aborted; retrying next tick"),
                }
            }
        }

        info!("Alarm scheduler stopped");
    }
}
