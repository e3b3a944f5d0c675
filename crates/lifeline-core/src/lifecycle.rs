//! Incident state machine and derived read-only values.
//!
//! Everything here is pure: functions take the loaded [`SosEvent`] and a
//! timestamp and mutate it in memory. Stores load the event under their
//! own per-event serialization (row lock, write lock), apply one of these
//! functions, and write the result back, so the lifecycle rules live in
//! exactly one place.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::models::{
    timeline_action, AutoCancellation, CreateSosEventRequest, FamilyNotification, LocationDetails,
    MatchedContact, Resolution, SosEvent, SosStatus, TimelineEntry,
};

/// Check a requested status move.
///
/// Same-status requests are accepted as confirmations. `in_progress`
/// cannot fall back to `active`, and nothing leaves a terminal state.
pub fn check_transition(from: SosStatus, to: SosStatus) -> Result<()> {
    use SosStatus::*;
    let allowed = match (from, to) {
        (Resolved | Cancelled, _) => false,
        (a, b) if a == b => true,
        (Active, InProgress | Resolved | Cancelled) => true,
        (InProgress, Resolved | Cancelled) => true,
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(Error::InvalidTransition(format!(
            "cannot move incident from {} to {}",
            from, to
        )))
    }
}

/// Reason stamped on incidents cancelled by the reaper.
pub fn auto_cancel_reason(threshold_hours: i64) -> String {
    format!(
        "Auto-cancelled after {} hours without resolution",
        threshold_hours
    )
}

impl SosEvent {
    /// Validate creation fields and build a new `active` incident with its
    /// `sos_triggered` timeline entry.
    pub fn new(req: CreateSosEventRequest, now: DateTime<Utc>) -> Result<Self> {
        if req.worker_id.is_nil() {
            return Err(Error::validation("workerId", "worker identity is required"));
        }
        if let Some(desc) = &req.description {
            if desc.chars().count() > defaults::DESCRIPTION_MAX_LEN {
                return Err(Error::validation(
                    "description",
                    format!(
                        "description must be at most {} characters",
                        defaults::DESCRIPTION_MAX_LEN
                    ),
                ));
            }
        }
        if req.family_contacts.len() > defaults::FAMILY_CONTACTS_MAX {
            return Err(Error::validation(
                "familyContacts",
                format!(
                    "at most {} family contacts are allowed",
                    defaults::FAMILY_CONTACTS_MAX
                ),
            ));
        }
        for (i, contact) in req.family_contacts.iter().enumerate() {
            contact.validate(i)?;
        }

        let location_details = req.location_details.unwrap_or_default();
        let mut description = format!("SOS triggered: {} emergency", req.emergency_type);
        if let Some(locality) = location_details.summary() {
            description.push_str(&format!(" near {}", locality));
        }

        Ok(Self {
            id: Uuid::now_v7(),
            worker_id: req.worker_id,
            worker_name: req.worker_name,
            worker_phone: req.worker_phone,
            emergency_type: req.emergency_type,
            description: req.description.filter(|d| !d.trim().is_empty()),
            severity: req.severity.unwrap_or_default(),
            location: req.location,
            location_details,
            device_info: req.device_info,
            status: SosStatus::Active,
            resolution: None,
            timeline: vec![TimelineEntry {
                timestamp: now,
                action: timeline_action::SOS_TRIGGERED.to_string(),
                description,
                actor_id: Some(req.worker_id),
            }],
            matched_contacts: Vec::new(),
            family_notifications: req
                .family_contacts
                .into_iter()
                .map(FamilyNotification::from_new)
                .collect(),
            auto_cancellation: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Append an audit entry. Prior entries are never touched.
    pub fn append_timeline(
        &mut self,
        action: &str,
        description: impl Into<String>,
        actor_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) {
        self.timeline.push(TimelineEntry {
            timestamp: now,
            action: action.to_string(),
            description: description.into(),
            actor_id,
        });
        self.updated_at = now;
    }

    /// Apply a status change requested by `actor_id`.
    ///
    /// Returns the previous status. Moving to `resolved` records the
    /// resolution; since `resolved` is terminal the resolution is present
    /// exactly when the status is `resolved`.
    pub fn transition(
        &mut self,
        target: SosStatus,
        actor_id: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<SosStatus> {
        check_transition(self.status, target)?;
        if let Some(n) = &notes {
            if n.chars().count() > defaults::NOTES_MAX_LEN {
                return Err(Error::validation(
                    "notes",
                    format!(
                        "notes must be at most {} characters",
                        defaults::NOTES_MAX_LEN
                    ),
                ));
            }
        }

        let previous = self.status;
        let mut description = if previous == target {
            format!("Status confirmed as {}", target)
        } else {
            format!("Status changed from {} to {}", previous, target)
        };
        if let Some(n) = notes.as_deref().filter(|n| !n.trim().is_empty()) {
            description.push_str(&format!(": {}", n));
        }

        if target == SosStatus::Resolved {
            self.resolution = Some(Resolution {
                resolved_by: actor_id,
                resolved_at: now,
                notes,
            });
        }
        self.status = target;
        self.append_timeline(
            timeline_action::STATUS_UPDATED,
            description,
            Some(actor_id),
            now,
        );
        Ok(previous)
    }

    /// Move the incident to a new position. Rejected once terminal.
    pub fn relocate(
        &mut self,
        location: GeoPoint,
        details: Option<LocationDetails>,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "cannot update location of a {} incident",
                self.status
            )));
        }
        self.location = location;
        if let Some(details) = details {
            self.location_details = details;
        }
        let description = format!(
            "Location updated to ({:.5}, {:.5})",
            location.longitude, location.latitude
        );
        self.append_timeline(
            timeline_action::LOCATION_UPDATED,
            description,
            Some(actor_id),
            now,
        );
        Ok(())
    }

    /// Replace the matched-contact list computed at trigger time.
    pub fn set_matched_contacts(&mut self, contacts: Vec<MatchedContact>, now: DateTime<Utc>) {
        self.matched_contacts = contacts;
        self.updated_at = now;
    }

    /// Flag a matched contact as notified. Returns `false` when it already was.
    pub fn mark_contact_notified(&mut self, contact_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let contact = self
            .matched_contacts
            .iter_mut()
            .find(|c| c.contact_id == contact_id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "contact {} is not matched to incident {}",
                    contact_id, self.id
                ))
            })?;
        if contact.notified {
            return Ok(false);
        }
        contact.notified = true;
        contact.notified_at = Some(now);
        self.updated_at = now;
        Ok(true)
    }

    /// Flag a family record as notified. Returns `false` when it already was.
    pub fn mark_family_notified(&mut self, family_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let event_id = self.id;
        let family = self.family_mut(family_id, event_id)?;
        if family.notified {
            return Ok(false);
        }
        family.notified = true;
        family.notified_at = Some(now);
        self.updated_at = now;
        Ok(true)
    }

    /// Record that a family member acknowledged the alert.
    pub fn acknowledge_family(
        &mut self,
        family_id: Uuid,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let event_id = self.id;
        let family = self.family_mut(family_id, event_id)?;
        if family.acknowledged {
            return Ok(false);
        }
        family.acknowledged = true;
        family.acknowledged_at = Some(now);
        let description = format!("{} ({}) acknowledged the alert", family.name, family.relationship);
        self.append_timeline(
            timeline_action::FAMILY_ACKNOWLEDGED,
            description,
            Some(actor_id),
            now,
        );
        Ok(true)
    }

    /// Cancel an abandoned incident on behalf of the reaper.
    ///
    /// Applies only when the status still equals `expected` and no
    /// auto-cancellation has been stamped; returns whether it applied.
    pub fn auto_cancel(&mut self, expected: SosStatus, reason: &str, now: DateTime<Utc>) -> bool {
        if self.status != expected || self.status.is_terminal() || self.auto_cancellation.is_some()
        {
            return false;
        }
        self.status = SosStatus::Cancelled;
        self.auto_cancellation = Some(AutoCancellation {
            cancelled_at: now,
            reason: reason.to_string(),
        });
        self.append_timeline(timeline_action::AUTO_CANCELLED, reason, None, now);
        true
    }

    fn family_mut(&mut self, family_id: Uuid, event_id: Uuid) -> Result<&mut FamilyNotification> {
        self.family_notifications
            .iter_mut()
            .find(|f| f.id == family_id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "family contact {} is not on incident {}",
                    family_id, event_id
                ))
            })
    }
}

// =============================================================================
// DERIVED VALUES
// =============================================================================

/// Minutes from creation to resolution, or to `now` while unresolved.
pub fn duration_minutes(event: &SosEvent, now: DateTime<Utc>) -> i64 {
    let end = event
        .resolution
        .as_ref()
        .map(|r| r.resolved_at)
        .unwrap_or(now);
    (end - event.created_at).num_minutes().max(0)
}

/// `active` or `in_progress`.
pub fn is_active(event: &SosEvent) -> bool {
    event.status.is_open()
}

/// Notified versus total recipients on the family and contact lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub family_total: usize,
    pub family_notified: usize,
    pub contacts_total: usize,
    pub contacts_notified: usize,
}

pub fn notification_summary(event: &SosEvent) -> NotificationSummary {
    NotificationSummary {
        family_total: event.family_notifications.len(),
        family_notified: event
            .family_notifications
            .iter()
            .filter(|f| f.notified)
            .count(),
        contacts_total: event.matched_contacts.len(),
        contacts_notified: event.matched_contacts.iter().filter(|c| c.notified).count(),
    }
}

/// An incident together with its derived values, as returned to clients.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SosEventView {
    #[serde(flatten)]
    pub event: SosEvent,
    pub duration_minutes: i64,
    pub is_active: bool,
    pub notification_summary: NotificationSummary,
}

impl SosEventView {
    pub fn new(event: SosEvent, now: DateTime<Utc>) -> Self {
        Self {
            duration_minutes: duration_minutes(&event, now),
            is_active: is_active(&event),
            notification_summary: notification_summary(&event),
            event,
        }
    }
}
