//! Overdue scanner.
//!
//! Periodically sweeps open incidents through the evaluation pipeline so
//! duration-based rules fire without an incident event. The firing guard
//! makes the sweep idempotent: re-scanning an already-escalated incident
//! is suppressed by the re-arm window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info};

use vigil_core::Result;

use crate::pipeline::EscalationEngine;

/// What the scanner is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Waiting for the next tick.
    Idle,
    /// Fetching open incidents.
    Querying,
    /// Running evaluations.
    Evaluating,
}

/// Counters for one completed sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    /// Open incidents fetched.
    pub fetched: usize,
    /// Incidents skipped by the minimum-age pre-filter.
    pub skipped: usize,
    /// Incidents evaluated.
    pub evaluated: usize,
    /// Rules fired across all evaluations.
    pub rules_fired: usize,
    /// Firings suppressed by the re-arm window.
    pub suppressed: usize,
    /// Evaluations that errored.
    pub errors: usize,
}

/// Periodic sweep over open incidents.
pub struct OverdueScanner {
    engine: Arc<EscalationEngine>,
    phase: RwLock<ScanPhase>,
}

impl OverdueScanner {
    pub fn new(engine: Arc<EscalationEngine>) -> Self {
        Self {
            engine,
            phase: RwLock::new(ScanPhase::Idle),
        }
    }

    /// Current scan phase.
    pub async fn phase(&self) -> ScanPhase {
        *self.phase.read().await
    }

    /// Run one sweep to completion.
    pub async fn scan_once(&self) -> Result<ScanSummary> {
        *self.phase.write().await = ScanPhase::Querying;
        let result = self.sweep().await;
        *self.phase.write().await = ScanPhase::Idle;
        result
    }

    async fn sweep(&self) -> Result<ScanSummary> {
        let now = Utc::now();
        let snapshot = self.engine.rules.snapshot().await?;
        let mut summary = ScanSummary::default();

        if snapshot.is_empty() {
            return Ok(summary);
        }

        let incidents = self
            .engine
            .incidents
            .list_open(&self.engine.config.open_statuses)
            .await?;
        summary.fetched = incidents.len();

        // When every rule carries a duration trigger, incidents younger
        // than the smallest threshold cannot match and are skipped without
        // a full evaluation.
        let min_age = if snapshot
            .rules()
            .iter()
            .all(|r| r.trigger_after_seconds.is_some())
        {
            snapshot.min_trigger_after_seconds()
        } else {
            None
        };

        *self.phase.write().await = ScanPhase::Evaluating;
        for incident in incidents {
            if let Some(min_age) = min_age {
                if incident.elapsed_seconds(false, now) < min_age {
                    summary.skipped += 1;
                    continue;
                }
            }

            match self.engine.evaluate(&incident).await {
                Ok(outcome) => {
                    summary.evaluated += 1;
                    summary.rules_fired += outcome.rules_fired;
                    summary.suppressed += outcome.suppressed;
                }
                Err(e) => {
                    // One broken incident must not stop the sweep.
                    error!(incident_id = %incident.id, error = %e, "Scan evaluation failed");
                    summary.errors += 1;
                }
            }
        }

        if summary.rules_fired > 0 {
            info!(
                fetched = summary.fetched,
                evaluated = summary.evaluated,
                rules_fired = summary.rules_fired,
                suppressed = summary.suppressed,
                "Overdue scan complete"
            );
        } else {
            debug!(fetched = summary.fetched, "Overdue scan complete, nothing fired");
        }
        Ok(summary)
    }

    /// Scan on an interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.engine.config.scan_interval_seconds);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup does not
        // race rule seeding.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!(error = %e, "Overdue scan failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Overdue scanner shutting down");
                        break;
                    }
                }
            }
        }
    }
}
