//! Incident lifecycle events and the in-process event bus.
//!
//! Every accepted lifecycle mutation is published as a [`LifecycleEvent`]
//! wrapped in an [`EventEnvelope`]. Subscribers (the admin SSE stream,
//! tests) receive their own independent copy. Publishing never blocks and
//! never fails; with no subscribers the envelope is dropped.
//!
//! ## Wire Format (SSE)
//!
//! ```text
//! event: sos.status_changed
//! id: 019508a0-1234-7def-8000-abcdef123456
//! data: {"eventId":"...","eventType":"sos.status_changed","occurredAt":"...","actor":{...},"payload":{...}}
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{EmergencyType, Severity, SosStatus};

/// Who caused an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventActor {
    /// `"system"` or `"user"`.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

impl EventActor {
    /// Background tasks such as the reaper and fan-out.
    pub fn system() -> Self {
        Self {
            kind: "system".to_string(),
            id: None,
        }
    }

    pub fn user(id: Uuid) -> Self {
        Self {
            kind: "user".to_string(),
            id: Some(id),
        }
    }
}

/// Versioned envelope around a [`LifecycleEvent`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// UUIDv7, so envelopes sort by emission time.
    pub event_id: Uuid,
    /// Dot-namespaced type, e.g. `"sos.triggered"`.
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: EventActor,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub payload_version: u32,
    pub payload: LifecycleEvent,
}

impl EventEnvelope {
    pub fn new(event: LifecycleEvent, actor: EventActor) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type().to_string(),
            occurred_at: Utc::now(),
            actor,
            entity_type: "sos_event".to_string(),
            entity_id: event.sos_event_id(),
            payload_version: 1,
            payload: event,
        }
    }
}

/// Domain payloads, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum LifecycleEvent {
    /// A worker raised an SOS and it was recorded.
    SosTriggered {
        sos_event_id: Uuid,
        worker_id: Uuid,
        emergency_type: EmergencyType,
        severity: Severity,
        matched_contacts: usize,
    },
    /// Status changed (or was confirmed) by a user.
    SosStatusChanged {
        sos_event_id: Uuid,
        from: SosStatus,
        to: SosStatus,
    },
    /// The worker reported a new position.
    SosLocationUpdated {
        sos_event_id: Uuid,
        longitude: f64,
        latitude: f64,
    },
    /// The reaper cancelled an abandoned incident.
    SosAutoCancelled { sos_event_id: Uuid, reason: String },
    /// Fan-out finished for an incident.
    NotificationsDispatched {
        sos_event_id: Uuid,
        admin_notifications: usize,
        contacts_notified: usize,
        family_notified: usize,
        failures: usize,
    },
}

impl LifecycleEvent {
    /// Dot-namespaced type used for SSE `event:` lines.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SosTriggered { .. } => "sos.triggered",
            Self::SosStatusChanged { .. } => "sos.status_changed",
            Self::SosLocationUpdated { .. } => "sos.location_updated",
            Self::SosAutoCancelled { .. } => "sos.auto_cancelled",
            Self::NotificationsDispatched { .. } => "sos.notifications_dispatched",
        }
    }

    pub fn sos_event_id(&self) -> Uuid {
        match self {
            Self::SosTriggered { sos_event_id, .. }
            | Self::SosStatusChanged { sos_event_id, .. }
            | Self::SosLocationUpdated { sos_event_id, .. }
            | Self::SosAutoCancelled { sos_event_id, .. }
            | Self::NotificationsDispatched { sos_event_id, .. } => *sos_event_id,
        }
    }
}

/// Broadcast hub for lifecycle events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity. Slow subscribers that
    /// fall further behind than this lose the oldest envelopes.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: LifecycleEvent, actor: EventActor) {
        let envelope = EventEnvelope::new(event, actor);
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            sos_event_id = %envelope.entity_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types_are_namespaced() {
        let id = Uuid::now_v7();
        let events = [
            LifecycleEvent::SosTriggered {
                sos_event_id: id,
                worker_id: id,
                emergency_type: EmergencyType::Medical,
                severity: Severity::High,
                matched_contacts: 0,
            },
            LifecycleEvent::SosStatusChanged {
                sos_event_id: id,
                from: SosStatus::Active,
                to: SosStatus::Resolved,
            },
            LifecycleEvent::SosAutoCancelled {
                sos_event_id: id,
                reason: "stale".into(),
            },
        ];
        for e in &events {
            assert!(e.event_type().starts_with("sos."));
            assert_eq!(e.sos_event_id(), id);
        }
    }

    #[test]
    fn test_envelope_serialization() {
        let id = Uuid::now_v7();
        let envelope = EventEnvelope::new(
            LifecycleEvent::SosStatusChanged {
                sos_event_id: id,
                from: SosStatus::Active,
                to: SosStatus::InProgress,
            },
            EventActor::user(id),
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["eventType"], "sos.status_changed");
        assert_eq!(json["entityType"], "sos_event");
        assert_eq!(json["payloadVersion"], 1);
        assert_eq!(json["actor"]["kind"], "user");
        assert_eq!(json["payload"]["type"], "SosStatusChanged");
        assert_eq!(json["payload"]["to"], "in_progress");
        assert_eq!(json["payload"]["sosEventId"], id.to_string());
    }

    #[test]
    fn test_system_actor_omits_id() {
        let json = serde_json::to_value(EventActor::system()).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "system"}));
    }

    #[tokio::test]
    async fn test_bus_delivers_to_each_subscriber() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let id = Uuid::now_v7();
        bus.emit(
            LifecycleEvent::SosAutoCancelled {
                sos_event_id: id,
                reason: "stale".into(),
            },
            EventActor::system(),
        );

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.entity_id, id);
        assert_eq!(ea.event_id, eb.event_id);
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.emit(
            LifecycleEvent::SosLocationUpdated {
                sos_event_id: Uuid::now_v7(),
                longitude: 1.0,
                latitude: 2.0,
            },
            EventActor::system(),
        );
        assert_eq!(bus.subscriber_count(), 0);
    }
}
