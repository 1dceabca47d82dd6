//! Sync scheduling.
//!
//! Runs a reconciliation cycle at a fixed interval until the process is
//! interrupted. Cycles never overlap: a slow cycle delays the next tick.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::Result;
use crate::reconcile::{CycleReport, Pass, ReconciliationEngine};

pub struct SyncScheduler {
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
    pass: Pass,
}

impl SyncScheduler {
    pub fn new(engine: Arc<ReconciliationEngine>, interval_secs: u64, pass: Pass) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(interval_secs.max(1)),
            pass,
        }
    }

    /// Tick until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            pass = ?self.pass,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_single_cycle(&self.engine, self.pass).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown requested, stopping scheduler");
                    return Ok(());
                }
            }
        }
    }
}

/// Execute one cycle and log the outcome of every pass that ran.
pub async fn run_single_cycle(engine: &ReconciliationEngine, pass: Pass) -> CycleReport {
    let started = Instant::now();
    tracing::info!(pass = ?pass, "Sync cycle triggered");

    let report = engine.run_cycle(pass).await;

    if let Some(Err(e)) = &report.node {
        tracing::error!(error = %e, "Node pass failed");
    }
    if let Some(Err(e)) = &report.interface {
        tracing::error!(error = %e, "Interface pass failed");
    }
    if let Some(Err(e)) = &report.vlan {
        tracing::error!(error = %e, "VLAN pass failed");
    }

    tracing::info!(
        success = report.is_success(),
        duration_ms = started.elapsed().as_millis() as u64,
        "Sync cycle complete"
    );
    report
}
