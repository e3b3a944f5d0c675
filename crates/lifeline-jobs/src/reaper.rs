//! Auto-cancellation of incidents left open too long.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, instrument};

use lifeline_core::{
    auto_cancel_reason, Error, EventActor, EventBus, LifecycleEvent, Result, SosEventRepository,
};

/// Sweeps stale open incidents into `cancelled`.
///
/// Each cancellation is a single conditional update keyed on the status
/// observed during the scan, so overlapping sweeps (or a concurrent status
/// change by a user) never cancel the same incident twice.
#[derive(Clone)]
pub struct StaleIncidentReaper {
    events: Arc<dyn SosEventRepository>,
    event_bus: Option<EventBus>,
}

impl StaleIncidentReaper {
    pub fn new(events: Arc<dyn SosEventRepository>) -> Self {
        Self {
            events,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Cancel open incidents older than `threshold_hours`. Returns how many
    /// this call cancelled.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "reaper", op = "sweep"))]
    pub async fn sweep(&self, threshold_hours: i64) -> Result<usize> {
        if threshold_hours <= 0 {
            return Err(Error::validation(
                "hoursThreshold",
                "must be a positive number of hours",
            ));
        }

        let cutoff = Duration::try_hours(threshold_hours)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| Error::validation("hoursThreshold", "threshold is out of range"))?;

        let start = Instant::now();
        let candidates = self.events.list_stale(cutoff).await?;
        if candidates.is_empty() {
            debug!("No stale incidents");
            return Ok(0);
        }

        let reason = auto_cancel_reason(threshold_hours);
        let mut cancelled = 0usize;
        for candidate in &candidates {
            match self
                .events
                .auto_cancel(candidate.id, candidate.status, &reason)
                .await
            {
                Ok(true) => {
                    cancelled += 1;
                    info!(
                        event_id = %candidate.id,
                        previous_status = %candidate.status,
                        created_at = %candidate.created_at,
                        "Incident auto-cancelled"
                    );
                    if let Some(bus) = &self.event_bus {
                        bus.emit(
                            LifecycleEvent::SosAutoCancelled {
                                sos_event_id: candidate.id,
                                reason: reason.clone(),
                            },
                            EventActor::system(),
                        );
                    }
                }
                Ok(false) => {
                    debug!(event_id = %candidate.id, "Incident changed before cancel; skipped");
                }
                Err(e) => {
                    error!(event_id = %candidate.id, error = %e, "Auto-cancel failed; continuing sweep");
                }
            }
        }

        info!(
            candidates = candidates.len(),
            cancelled,
            threshold_hours,
            duration_ms = start.elapsed().as_millis() as u64,
            "Stale incident sweep complete"
        );
        Ok(cancelled)
    }
}
