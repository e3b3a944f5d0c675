//! Lifecycle controller for SOS incidents.
//!
//! Ties the matcher, the event store and the fan-out engine together and
//! enforces who may do what to an incident.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use lifeline_core::defaults::{
    HISTORY_LIMIT, HISTORY_LIMIT_MAX, MATCH_LIMIT, MATCH_RADIUS_M, MATCH_TIMEOUT_MS,
    NEAREST_LIMIT, NEAREST_LIMIT_MAX, NEAREST_RADIUS_M, NOTIFICATION_PAGE_LIMIT,
};
use lifeline_core::{
    ContactCategory, ContactEntry, ContactListFilter, CreateContactRequest,
    CreateSosEventRequest, EmergencyType, Error, EventActor, EventBus, GeoPoint, LifecycleEvent,
    LocationDetails, MatchedContact, NewFamilyContact, Notification, Principal, RankedContact,
    Repositories, Result, Severity, SosEvent, SosEventView, SosStatus, TimelineEntry,
};
use lifeline_jobs::NotificationDispatcher;
use lifeline_search::ProximityMatcher;

/// Matching parameters applied when an SOS is triggered.
#[derive(Debug, Clone)]
pub struct SosConfig {
    /// Search radius in meters.
    pub match_radius_m: f64,
    /// Maximum contacts attached to an incident.
    pub match_limit: usize,
    /// Per-query timeout for directory lookups.
    pub match_timeout: Duration,
}

impl Default for SosConfig {
    fn default() -> Self {
        Self {
            match_radius_m: MATCH_RADIUS_M,
            match_limit: MATCH_LIMIT,
            match_timeout: Duration::from_millis(MATCH_TIMEOUT_MS),
        }
    }
}

impl SosConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SOS_MATCH_RADIUS_M` | `100000` |
    /// | `SOS_MATCH_LIMIT` | `5` |
    /// | `SOS_MATCH_TIMEOUT_MS` | `800` |
    pub fn from_env() -> Self {
        let match_radius_m = std::env::var("SOS_MATCH_RADIUS_M")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(MATCH_RADIUS_M);

        let match_limit = std::env::var("SOS_MATCH_LIMIT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(MATCH_LIMIT)
            .max(1);

        let match_timeout_ms = std::env::var("SOS_MATCH_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(MATCH_TIMEOUT_MS);

        Self {
            match_radius_m,
            match_limit,
            match_timeout: Duration::from_millis(match_timeout_ms),
        }
    }
}

/// Validated SOS input from the subject.
#[derive(Debug, Clone)]
pub struct TriggerSos {
    pub location: GeoPoint,
    pub emergency_type: EmergencyType,
    pub description: Option<String>,
    pub severity: Option<Severity>,
    pub location_details: Option<LocationDetails>,
    pub device_info: Option<serde_json::Value>,
    pub family_contacts: Vec<NewFamilyContact>,
}

/// What the subject sees right after triggering.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSosResponse {
    pub event_id: Uuid,
    pub status: SosStatus,
    pub nearest_contacts: Vec<MatchedContact>,
    /// Family members queued for notification.
    pub family_notified: usize,
    pub timeline: Vec<TimelineEntry>,
}

/// Lifecycle controller.
#[derive(Clone)]
pub struct SosService {
    repos: Repositories,
    matcher: ProximityMatcher,
    dispatcher: NotificationDispatcher,
    event_bus: EventBus,
    config: SosConfig,
}

impl SosService {
    pub fn new(
        repos: Repositories,
        dispatcher: NotificationDispatcher,
        event_bus: EventBus,
        config: SosConfig,
    ) -> Self {
        let matcher =
            ProximityMatcher::new(repos.contacts.clone()).with_timeout(config.match_timeout);
        Self {
            repos,
            matcher,
            dispatcher,
            event_bus,
            config,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // =========================================================================
    // TRIGGER
    // =========================================================================

    /// Record an incident for the caller, attach nearby help, and start
    /// fan-out.
    ///
    /// The incident is persisted before anything else can fail. Matching
    /// problems degrade to an empty contact list; fan-out runs in the
    /// background and never affects the response.
    #[instrument(skip(self, input), fields(
        subsystem = "api",
        component = "sos_service",
        op = "trigger",
        worker_id = %principal.user_id,
    ))]
    pub async fn trigger(
        &self,
        principal: &Principal,
        input: TriggerSos,
    ) -> Result<TriggerSosResponse> {
        let location = GeoPoint::new(input.location.longitude, input.location.latitude)?;
        let profile = self.repos.identity.profile(principal.user_id).await?;

        let event = self
            .repos
            .events
            .create(CreateSosEventRequest {
                worker_id: principal.user_id,
                worker_name: profile.name,
                worker_phone: profile.phone,
                emergency_type: input.emergency_type,
                description: input.description,
                severity: input.severity,
                location,
                location_details: input.location_details,
                device_info: input.device_info,
                family_contacts: input.family_contacts,
            })
            .await?;

        let matched = match self
            .matcher
            .match_for_incident(&location, self.config.match_radius_m, self.config.match_limit)
            .await
        {
            Ok(ranked) => ranked.iter().map(MatchedContact::from_ranked).collect(),
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Contact matching failed; incident kept without contacts");
                Vec::new()
            }
        };

        let event = if matched.is_empty() {
            event
        } else {
            self.repos
                .events
                .set_matched_contacts(event.id, matched)
                .await?
        };

        info!(
            event_id = %event.id,
            emergency_type = %event.emergency_type,
            severity = %event.severity,
            matched_contacts = event.matched_contacts.len(),
            family_contacts = event.family_notifications.len(),
            "SOS triggered"
        );

        self.event_bus.emit(
            LifecycleEvent::SosTriggered {
                sos_event_id: event.id,
                worker_id: event.worker_id,
                emergency_type: event.emergency_type,
                severity: event.severity,
                matched_contacts: event.matched_contacts.len(),
            },
            EventActor::user(principal.user_id),
        );

        let dispatcher = self.dispatcher.clone();
        let event_id = event.id;
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch_for_event(event_id).await {
                error!(event_id = %event_id, error = %e, "SOS fan-out aborted");
            }
        });

        Ok(TriggerSosResponse {
            event_id: event.id,
            status: event.status,
            nearest_contacts: event.matched_contacts,
            family_notified: event.family_notifications.len(),
            timeline: event.timeline,
        })
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Public nearest-help lookup.
    pub async fn nearest_contacts(
        &self,
        point: GeoPoint,
        max_distance_m: Option<f64>,
        category: Option<ContactCategory>,
        limit: Option<usize>,
    ) -> Result<Vec<RankedContact>> {
        let limit = limit.unwrap_or(NEAREST_LIMIT).clamp(1, NEAREST_LIMIT_MAX);
        self.matcher
            .find_nearest(
                &point,
                max_distance_m.unwrap_or(NEAREST_RADIUS_M),
                limit,
                category,
            )
            .await
    }

    /// The caller's own incidents, newest first.
    pub async fn history(&self, principal: &Principal, limit: Option<i64>) -> Result<Vec<SosEventView>> {
        let limit = limit.unwrap_or(HISTORY_LIMIT).clamp(1, HISTORY_LIMIT_MAX);
        let now = Utc::now();
        Ok(self
            .repos
            .events
            .list_for_worker(principal.user_id, limit)
            .await?
            .into_iter()
            .map(|e| SosEventView::new(e, now))
            .collect())
    }

    pub async fn get(&self, principal: &Principal, id: Uuid) -> Result<SosEventView> {
        let event = self.repos.events.fetch(id).await?;
        authorize_subject_or_admin(principal, &event)?;
        Ok(SosEventView::new(event, Utc::now()))
    }

    /// Open incidents for the admin board.
    pub async fn open_incidents(
        &self,
        principal: &Principal,
        limit: Option<i64>,
    ) -> Result<Vec<SosEventView>> {
        require_admin(principal)?;
        let limit = limit.unwrap_or(HISTORY_LIMIT_MAX).clamp(1, HISTORY_LIMIT_MAX);
        let now = Utc::now();
        Ok(self
            .repos
            .events
            .list_open(limit)
            .await?
            .into_iter()
            .map(|e| SosEventView::new(e, now))
            .collect())
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Move an incident to `target`. Allowed for the subject and admins.
    #[instrument(skip(self, notes), fields(
        subsystem = "api",
        component = "sos_service",
        op = "update_status",
        actor_id = %principal.user_id,
    ))]
    pub async fn update_status(
        &self,
        principal: &Principal,
        id: Uuid,
        target: SosStatus,
        notes: Option<String>,
    ) -> Result<SosEventView> {
        let event = self.repos.events.fetch(id).await?;
        authorize_subject_or_admin(principal, &event)?;

        let (previous, event) = self
            .repos
            .events
            .update_status(id, target, principal.user_id, notes)
            .await?;

        info!(event_id = %id, from = %previous, to = %target, "SOS status updated");
        self.event_bus.emit(
            LifecycleEvent::SosStatusChanged {
                sos_event_id: id,
                from: previous,
                to: target,
            },
            EventActor::user(principal.user_id),
        );
        Ok(SosEventView::new(event, Utc::now()))
    }

    /// Move the incident's point. Only the subject may do this.
    #[instrument(skip(self, details), fields(
        subsystem = "api",
        component = "sos_service",
        op = "update_location",
        actor_id = %principal.user_id,
    ))]
    pub async fn update_location(
        &self,
        principal: &Principal,
        id: Uuid,
        location: GeoPoint,
        details: Option<LocationDetails>,
    ) -> Result<SosEventView> {
        let location = GeoPoint::new(location.longitude, location.latitude)?;
        let event = self.repos.events.fetch(id).await?;
        if event.worker_id != principal.user_id {
            return Err(Error::Forbidden(
                "only the worker who raised the SOS can update its location".to_string(),
            ));
        }

        let event = self
            .repos
            .events
            .update_location(id, location, details, principal.user_id)
            .await?;

        self.event_bus.emit(
            LifecycleEvent::SosLocationUpdated {
                sos_event_id: id,
                longitude: location.longitude,
                latitude: location.latitude,
            },
            EventActor::user(principal.user_id),
        );
        Ok(SosEventView::new(event, Utc::now()))
    }

    pub async fn acknowledge_family(
        &self,
        principal: &Principal,
        id: Uuid,
        family_id: Uuid,
    ) -> Result<SosEventView> {
        let event = self.repos.events.fetch(id).await?;
        authorize_subject_or_admin(principal, &event)?;
        let event = self
            .repos
            .events
            .acknowledge_family(id, family_id, principal.user_id)
            .await?;
        Ok(SosEventView::new(event, Utc::now()))
    }

    // =========================================================================
    // DIRECTORY
    // =========================================================================

    pub async fn list_contacts(&self, filter: &ContactListFilter) -> Result<Vec<ContactEntry>> {
        self.repos.contacts.list(filter).await
    }

    pub async fn create_contact(
        &self,
        principal: &Principal,
        req: CreateContactRequest,
    ) -> Result<ContactEntry> {
        require_admin(principal)?;
        req.validate()?;
        self.repos.contacts.insert(req).await
    }

    // =========================================================================
    // INBOX
    // =========================================================================

    pub async fn notifications(
        &self,
        principal: &Principal,
        unread_only: bool,
        limit: Option<i64>,
    ) -> Result<Vec<Notification>> {
        let limit = limit
            .unwrap_or(NOTIFICATION_PAGE_LIMIT)
            .clamp(1, HISTORY_LIMIT_MAX);
        self.repos
            .notifications
            .list_for_recipient(principal.user_id, unread_only, limit)
            .await
    }

    pub async fn mark_notification_read(&self, principal: &Principal, id: Uuid) -> Result<Notification> {
        self.repos
            .notifications
            .mark_read(id, principal.user_id)
            .await
    }

    pub async fn mark_all_notifications_read(&self, principal: &Principal) -> Result<u64> {
        self.repos
            .notifications
            .mark_all_read(principal.user_id)
            .await
    }
}

fn authorize_subject_or_admin(principal: &Principal, event: &SosEvent) -> Result<()> {
    if principal.is_admin() || event.worker_id == principal.user_id {
        Ok(())
    } else {
        Err(Error::Forbidden(
            "only the worker who raised the SOS or an administrator can do this".to_string(),
        ))
    }
}

fn require_admin(principal: &Principal) -> Result<()> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(Error::Forbidden("administrator role required".to_string()))
    }
}
