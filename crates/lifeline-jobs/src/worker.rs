//! Periodic worker driving the stale-incident reaper.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use lifeline_core::defaults::{
    EVENT_BUS_CAPACITY, REAPER_INTERVAL_SECS, REAPER_THRESHOLD_HOURS, REAPER_THRESHOLD_HOURS_MAX,
};
use lifeline_core::{Error, Result};

use crate::reaper::StaleIncidentReaper;

/// Configuration for the reaper worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Age in hours after which an open incident is auto-cancelled.
    pub threshold_hours: i64,
    /// Whether to run sweeps at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: REAPER_INTERVAL_SECS,
            threshold_hours: REAPER_THRESHOLD_HOURS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `REAPER_ENABLED` | `true` | Enable/disable the sweep loop |
    /// | `REAPER_INTERVAL_SECS` | `3600` | Seconds between sweeps |
    /// | `REAPER_THRESHOLD_HOURS` | `48` | Age at which open incidents are cancelled (1..=87600) |
    pub fn from_env() -> Self {
        let enabled = std::env::var("REAPER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let interval_secs = std::env::var("REAPER_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(REAPER_INTERVAL_SECS)
            .max(1);

        let threshold_hours =
            parse_threshold_hours(std::env::var("REAPER_THRESHOLD_HOURS").ok().as_deref());

        Self {
            interval_secs,
            threshold_hours,
            enabled,
        }
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_threshold_hours(mut self, hours: i64) -> Self {
        self.threshold_hours = hours;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Parse a threshold override, falling back to the default when it is
/// missing, malformed or outside `1..=REAPER_THRESHOLD_HOURS_MAX`.
fn parse_threshold_hours(raw: Option<&str>) -> i64 {
    match raw.map(|v| v.trim().parse::<i64>()) {
        Some(Ok(hours)) if (1..=REAPER_THRESHOLD_HOURS_MAX).contains(&hours) => hours,
        Some(_) => {
            warn!(
                value = raw.unwrap_or_default(),
                max = REAPER_THRESHOLD_HOURS_MAX,
                "Invalid REAPER_THRESHOLD_HOURS; using default"
            );
            REAPER_THRESHOLD_HOURS
        }
        None => REAPER_THRESHOLD_HOURS,
    }
}

/// Event emitted by the reaper worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    WorkerStarted,
    /// A sweep finished.
    SweepCompleted { cancelled: usize },
    /// A sweep could not run (e.g. the store was unreachable).
    SweepFailed { error: String },
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Runs [`StaleIncidentReaper::sweep`] on a fixed interval, independent of
/// request traffic.
pub struct ReaperWorker {
    reaper: StaleIncidentReaper,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl ReaperWorker {
    pub fn new(reaper: StaleIncidentReaper, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            reaper,
            config,
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);
        tokio::spawn(async move {
            worker.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Sweep immediately, then once per interval until shut down.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "reaper_worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Reaper worker is disabled, not starting");
            return;
        }

        info!(
            interval_secs = self.config.interval_secs,
            threshold_hours = self.config.threshold_hours,
            "Reaper worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Reaper worker received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let event = match self.reaper.sweep(self.config.threshold_hours).await {
                        Ok(cancelled) => WorkerEvent::SweepCompleted { cancelled },
                        Err(e) => {
                            error!(error = %e, "Stale incident sweep failed");
                            WorkerEvent::SweepFailed { error: e.to_string() }
                        }
                    };
                    let _ = self.event_tx.send(event);
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Reaper worker stopped");
    }
}
