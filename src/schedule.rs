//! Periodic re-scrape.
//!
//! A [`Scheduler`] owns one [`ScrapeRequest`] and runs it through the
//! pipeline on a fixed interval. Cycles never overlap: the next tick is
//! measured from the end of a slow cycle rather than bunching up. A failed
//! cycle is logged and the schedule continues; re-running is the retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::{open_pipeline, Pipeline, ScrapeRequest};

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    request: ScrapeRequest,
    interval: Duration,
    max_cycles: Option<u64>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, request: ScrapeRequest, interval: Duration) -> Self {
        Self {
            pipeline,
            request,
            interval,
            max_cycles: None,
        }
    }

    /// Stop after `cycles` runs instead of running until shutdown.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    /// Run cycles until `shutdown` flips to `true` or the cycle limit is
    /// reached. Returns the number of completed cycles.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            url = %self.request.url,
            interval_secs = self.interval.as_secs(),
            "scheduler started"
        );

        let mut cycles = 0u64;
        loop {
            if self.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            cycles += 1;
            match self.pipeline.run(&self.request).await {
                Ok(report) if report.has_failures() => {
                    warn!(cycle = cycles, failed = report.failed().count(), "scheduled scrape finished with failures")
                }
                Ok(_) => info!(cycle = cycles, "scheduled scrape finished"),
                Err(e) => warn!(cycle = cycles, error = %e, "scheduled scrape failed"),
            }
        }

        info!(cycles, "scheduler stopped");
        cycles
    }
}

/// Run the watch command: scrape on an interval until Ctrl-C.
pub async fn run_watch(
    config: &Config,
    request: ScrapeRequest,
    interval: Duration,
) -> anyhow::Result<()> {
    let pipeline = Arc::new(open_pipeline(config).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = tokio::spawn(Scheduler::new(pipeline, request, interval).run(shutdown_rx));
    tokio::signal::ctrl_c().await?;
    info!("interrupt received; stopping after the current cycle");
    let _ = shutdown_tx.send(true);

    let cycles = scheduler.await?;
    println!("watch stopped after {} cycles", cycles);
    Ok(())
}
