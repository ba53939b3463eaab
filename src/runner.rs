//! Control loop driver.
//!
//! Ticks `DecisionEngine::run_cycle` on a fixed interval until stopped. A stop
//! request is only observed between cycles; a cycle that has started runs to
//! completion, including any action already dispatched.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::decision::DecisionEngine;

/// Requests a cooperative stop. Dropping the handle stops the loop too.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        // send only fails once the loop is gone
        let _ = self.tx.send(true);
    }
}

pub struct ControlLoop {
    engine: Arc<DecisionEngine>,
    interval: Duration,
    stop: watch::Receiver<bool>,
}

impl ControlLoop {
    pub fn new(engine: Arc<DecisionEngine>) -> (Self, StopHandle) {
        let (tx, rx) = watch::channel(false);
        let interval = engine.interval();
        (
            Self {
                engine,
                interval,
                stop: rx,
            },
            StopHandle { tx: Arc::new(tx) },
        )
    }

    /// Run until stopped. Returns the number of cycles started.
    pub async fn run(mut self) -> u64 {
        info!(interval_secs = self.interval.as_secs(), "Starting control loop");
        self.engine.set_running(true);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            if self.stop_requested() {
                break;
            }

            tokio::select! {
                biased;
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            cycles += 1;
            self.run_isolated().await;
        }

        self.engine.set_running(false);
        info!(cycles, "Control loop stopped");
        cycles
    }

    /// One cycle on its own task so neither an error nor a panic ends the loop.
    async fn run_isolated(&self) {
        let engine = self.engine.clone();
        match tokio::spawn(async move { engine.run_cycle().await }).await {
            Ok(Ok(report)) => {
                if report.actions_failed() > 0 {
                    warn!(
                        cycle = report.cycle,
                        failed = report.actions_failed(),
                        "Cycle finished with failed actions"
                    );
                }
            }
            Ok(Err(e)) => error!(error = %e, "Decision cycle aborted"),
            Err(e) => error!(error = %e, "Decision cycle panicked"),
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }
}
