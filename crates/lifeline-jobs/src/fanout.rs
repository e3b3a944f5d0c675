//! Notification fan-out for a persisted SOS incident.
//!
//! Three independent channels run concurrently:
//! 1. In-app notifications for every active administrator
//! 2. Sink delivery to matched contacts not yet notified
//! 3. Sink delivery to family contacts not yet notified
//!
//! A failing channel or recipient is logged and counted, never raised.
//! Only a missing incident aborts the dispatch.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use lifeline_core::{
    AdminDirectory, DeliveryPayload, DeliveryTarget, EventActor, EventBus, LifecycleEvent,
    NewNotification, NotificationKind, NotificationRepository, NotificationSink, RelatedEntity,
    Repositories, Result, SosEvent, SosEventRepository,
};

/// Outcome of one fan-out run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub admin_notifications: usize,
    pub contacts_notified: usize,
    pub family_notified: usize,
    /// Recipients or channels that could not be served.
    pub failures: usize,
}

impl DispatchReport {
    /// Notifications created or delivered across all channels.
    pub fn total(&self) -> usize {
        self.admin_notifications + self.contacts_notified + self.family_notified
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ChannelOutcome {
    delivered: usize,
    failures: usize,
}

/// Fans an incident out to its recipients.
#[derive(Clone)]
pub struct NotificationDispatcher {
    events: Arc<dyn SosEventRepository>,
    notifications: Arc<dyn NotificationRepository>,
    admins: Arc<dyn AdminDirectory>,
    sink: Arc<dyn NotificationSink>,
    event_bus: Option<EventBus>,
}

impl NotificationDispatcher {
    pub fn new(repos: &Repositories, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            events: repos.events.clone(),
            notifications: repos.notifications.clone(),
            admins: repos.admins.clone(),
            sink,
            event_bus: None,
        }
    }

    /// Publish a `sos.notifications_dispatched` event after each run.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Notify everyone attached to the incident.
    ///
    /// Errors only if the incident cannot be loaded.
    #[instrument(skip(self), fields(
        subsystem = "jobs",
        component = "fanout",
        op = "dispatch_for_event",
    ))]
    pub async fn dispatch_for_event(&self, event_id: Uuid) -> Result<DispatchReport> {
        let start = Instant::now();
        let event = self.events.fetch(event_id).await?;
        let payload = delivery_payload(&event);

        let (admins, contacts, family) = tokio::join!(
            self.notify_admins(&event, &payload),
            self.notify_contacts(&event, &payload),
            self.notify_family(&event, &payload),
        );

        let report = DispatchReport {
            admin_notifications: admins.delivered,
            contacts_notified: contacts.delivered,
            family_notified: family.delivered,
            failures: admins.failures + contacts.failures + family.failures,
        };

        info!(
            event_id = %event.id,
            admin_notifications = report.admin_notifications,
            contacts_notified = report.contacts_notified,
            family_notified = report.family_notified,
            failures = report.failures,
            sink = self.sink.name(),
            duration_ms = start.elapsed().as_millis() as u64,
            "SOS fan-out complete"
        );

        if let Some(bus) = &self.event_bus {
            bus.emit(
                LifecycleEvent::NotificationsDispatched {
                    sos_event_id: event.id,
                    admin_notifications: report.admin_notifications,
                    contacts_notified: report.contacts_notified,
                    family_notified: report.family_notified,
                    failures: report.failures,
                },
                EventActor::system(),
            );
        }

        Ok(report)
    }

    async fn notify_admins(&self, event: &SosEvent, payload: &DeliveryPayload) -> ChannelOutcome {
        let admins = match self.admins.list_active_admins().await {
            Ok(admins) => admins,
            Err(e) => {
                error!(event_id = %event.id, channel = "admin", error = %e, "Admin directory lookup failed");
                return ChannelOutcome {
                    delivered: 0,
                    failures: 1,
                };
            }
        };

        if admins.is_empty() {
            warn!(
                event_id = %event.id,
                channel = "admin",
                "No active administrators; SOS raised without admin notifications"
            );
            return ChannelOutcome::default();
        }

        let metadata = serde_json::json!({
            "workerName": event.worker_name,
            "workerPhone": event.worker_phone,
            "emergencyType": event.emergency_type,
            "location": {
                "type": "Point",
                "coordinates": [event.location.longitude, event.location.latitude],
            },
            "locality": payload.locality,
        });

        let batch: Vec<NewNotification> = admins
            .iter()
            .map(|admin_id| NewNotification {
                recipient_id: *admin_id,
                kind: NotificationKind::EmergencySos,
                title: payload.title.clone(),
                message: payload.message.clone(),
                severity: event.severity,
                related: Some(RelatedEntity::sos_event(event.id)),
                metadata: metadata.clone(),
            })
            .collect();

        match self.notifications.create_many(batch).await {
            Ok(created) => {
                debug!(event_id = %event.id, channel = "admin", result_count = created.len(), "Admin notifications created");
                ChannelOutcome {
                    delivered: created.len(),
                    failures: 0,
                }
            }
            Err(e) => {
                error!(event_id = %event.id, channel = "admin", error = %e, "Failed to create admin notifications");
                ChannelOutcome {
                    delivered: 0,
                    failures: admins.len(),
                }
            }
        }
    }

    async fn notify_contacts(&self, event: &SosEvent, payload: &DeliveryPayload) -> ChannelOutcome {
        let mut outcome = ChannelOutcome::default();
        for contact in event.matched_contacts.iter().filter(|c| !c.notified) {
            let target = DeliveryTarget::Contact {
                contact_id: contact.contact_id,
                name: contact.name.clone(),
                hotline: contact.hotline.clone(),
            };
            if self.deliver(event.id, &target, payload).await {
                match self
                    .events
                    .mark_contact_notified(event.id, contact.contact_id)
                    .await
                {
                    Ok(_) => outcome.delivered += 1,
                    Err(e) => {
                        warn!(event_id = %event.id, contact_id = %contact.contact_id, error = %e, "Delivered but could not mark contact notified");
                        outcome.failures += 1;
                    }
                }
            } else {
                outcome.failures += 1;
            }
        }
        outcome
    }

    async fn notify_family(&self, event: &SosEvent, payload: &DeliveryPayload) -> ChannelOutcome {
        let mut outcome = ChannelOutcome::default();
        for member in event.family_notifications.iter().filter(|f| !f.notified) {
            let target = DeliveryTarget::Family {
                family_id: member.id,
                name: member.name.clone(),
                relationship: member.relationship.clone(),
                phone: member.phone.clone(),
                email: member.email.clone(),
            };
            if self.deliver(event.id, &target, payload).await {
                match self.events.mark_family_notified(event.id, member.id).await {
                    Ok(_) => outcome.delivered += 1,
                    Err(e) => {
                        warn!(event_id = %event.id, family_id = %member.id, error = %e, "Delivered but could not mark family notified");
                        outcome.failures += 1;
                    }
                }
            } else {
                outcome.failures += 1;
            }
        }
        outcome
    }

    async fn deliver(&self, event_id: Uuid, target: &DeliveryTarget, payload: &DeliveryPayload) -> bool {
        match self.sink.deliver(target, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    event_id = %event_id,
                    channel = target.channel(),
                    recipient_id = %target.recipient_id(),
                    sink = self.sink.name(),
                    error = %e,
                    "Notification delivery failed"
                );
                false
            }
        }
    }
}

/// Message handed to every recipient of an incident.
pub fn delivery_payload(event: &SosEvent) -> DeliveryPayload {
    let locality = event.location_details.summary();
    let mut message = format!(
        "{} triggered a {} {} emergency",
        event.worker_name, event.severity, event.emergency_type
    );
    if let Some(locality) = &locality {
        message.push_str(&format!(" near {}", locality));
    }
    if let Some(phone) = &event.worker_phone {
        message.push_str(&format!(". Contact: {}", phone));
    }

    DeliveryPayload {
        event_id: event.id,
        title: format!("Emergency SOS: {}", event.emergency_type),
        message,
        severity: event.severity,
        emergency_type: event.emergency_type,
        worker_name: event.worker_name.clone(),
        worker_phone: event.worker_phone.clone(),
        location: event.location,
        locality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lifeline_core::{CreateSosEventRequest, EmergencyType, GeoPoint, LocationDetails, Severity};

    fn event(details: LocationDetails) -> SosEvent {
        SosEvent::new(
            CreateSosEventRequest {
                worker_id: Uuid::now_v7(),
                worker_name: "Amina".to_string(),
                worker_phone: Some("+880 1711 000000".to_string()),
                emergency_type: EmergencyType::Abuse,
                description: None,
                severity: Some(Severity::Critical),
                location: GeoPoint::new(46.67, 24.71).unwrap(),
                location_details: Some(details),
                device_info: None,
                family_contacts: vec![],
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_delivery_payload_mentions_locality_and_phone() {
        let e = event(LocationDetails {
            city: Some("Riyadh".to_string()),
            country: Some("Saudi Arabia".to_string()),
            ..Default::default()
        });
        let p = delivery_payload(&e);
        assert_eq!(p.title, "Emergency SOS: abuse");
        assert_eq!(p.locality.as_deref(), Some("Riyadh, Saudi Arabia"));
        assert!(p.message.contains("critical abuse emergency near Riyadh"));
        assert!(p.message.ends_with("Contact: +880 1711 000000"));
    }

    #[test]
    fn test_delivery_payload_without_locality() {
        let p = delivery_payload(&event(LocationDetails::default()));
        assert!(p.locality.is_none());
        assert!(!p.message.contains(" near "));
    }

    #[test]
    fn test_report_total() {
        let r = DispatchReport {
            admin_notifications: 2,
            contacts_notified: 3,
            family_notified: 1,
            failures: 4,
        };
        assert_eq!(r.total(), 6);
    }
}
