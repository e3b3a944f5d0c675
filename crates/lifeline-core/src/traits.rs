//! Core traits for Lifeline abstractions.
//!
//! These traits define the interfaces that the Postgres and in-memory
//! backends must satisfy, and the collaborator capabilities (identity,
//! admin lookup, outbound delivery) that the engine consumes but does not
//! own.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::geo::GeoPoint;
use crate::models::*;

// =============================================================================
// CONTACT DIRECTORY
// =============================================================================

/// Read-mostly store of help sources.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Fetch active entries matching the query. Order is unspecified and
    /// `bounds` may over-include; ranking is the matcher's job.
    async fn find_candidates(&self, query: &ContactQuery) -> Result<Vec<ContactEntry>>;

    /// Get an entry by id, active or not.
    async fn get(&self, id: Uuid) -> Result<ContactEntry>;

    /// List active entries, ordered by country, city, then id.
    async fn list(&self, filter: &ContactListFilter) -> Result<Vec<ContactEntry>>;

    /// Add an entry. The request must already be validated.
    async fn insert(&self, req: CreateContactRequest) -> Result<ContactEntry>;
}

// =============================================================================
// EVENT STORE
// =============================================================================

/// Durable record of SOS incidents.
///
/// Every mutation on a single event is atomic and serialized per event:
/// implementations load, apply the pure lifecycle function, and persist
/// within one transaction or lock scope.
#[async_trait]
pub trait SosEventRepository: Send + Sync {
    /// Validate and insert a new incident with its `sos_triggered` entry.
    async fn create(&self, req: CreateSosEventRequest) -> Result<SosEvent>;

    /// Load an incident. Errors with `EventNotFound` if missing.
    async fn fetch(&self, id: Uuid) -> Result<SosEvent>;

    /// A worker's incidents, newest first.
    async fn list_for_worker(&self, worker_id: Uuid, limit: i64) -> Result<Vec<SosEvent>>;

    /// Open incidents, most severe then oldest first.
    async fn list_open(&self, limit: i64) -> Result<Vec<SosEvent>>;

    async fn append_timeline_entry(
        &self,
        id: Uuid,
        action: &str,
        description: &str,
        actor_id: Option<Uuid>,
    ) -> Result<SosEvent>;

    /// Persist the merged contact list computed at trigger time.
    async fn set_matched_contacts(&self, id: Uuid, contacts: Vec<MatchedContact>)
        -> Result<SosEvent>;

    /// Move the incident and append `location_updated` in one step.
    async fn update_location(
        &self,
        id: Uuid,
        location: GeoPoint,
        details: Option<LocationDetails>,
        actor_id: Uuid,
    ) -> Result<SosEvent>;

    /// Apply a status transition. Returns the previous status with the
    /// updated incident.
    async fn update_status(
        &self,
        id: Uuid,
        target: SosStatus,
        actor_id: Uuid,
        notes: Option<String>,
    ) -> Result<(SosStatus, SosEvent)>;

    /// Idempotent.
    async fn mark_contact_notified(&self, id: Uuid, contact_id: Uuid) -> Result<SosEvent>;

    /// Idempotent.
    async fn mark_family_notified(&self, id: Uuid, family_id: Uuid) -> Result<SosEvent>;

    /// Idempotent.
    async fn acknowledge_family(
        &self,
        id: Uuid,
        family_id: Uuid,
        actor_id: Uuid,
    ) -> Result<SosEvent>;

    /// Open, not-yet-auto-cancelled incidents created before `cutoff`.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<StaleCandidate>>;

    /// Cancel an incident only if its status still equals `expected` and it
    /// has not been auto-cancelled. Returns whether this call cancelled it.
    async fn auto_cancel(&self, id: Uuid, expected: SosStatus, reason: &str) -> Result<bool>;
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert all records in one batch.
    async fn create_many(&self, notifications: Vec<NewNotification>) -> Result<Vec<Notification>>;

    /// A recipient's inbox, newest first.
    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>>;

    /// Notifications linked to an entity (e.g. an SOS event).
    async fn list_for_related(&self, related_id: Uuid) -> Result<Vec<Notification>>;

    /// Mark one of the recipient's notifications read. Errors with
    /// `NotFound` if it does not exist or belongs to someone else.
    async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<Notification>;

    /// Mark every unread notification of the recipient. Returns how many changed.
    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64>;
}

// =============================================================================
// COLLABORATORS
// =============================================================================

/// Current administrator accounts.
#[async_trait]
pub trait AdminDirectory: Send + Sync {
    /// Point-in-time snapshot of active admin ids.
    async fn list_active_admins(&self) -> Result<Vec<Uuid>>;
}

/// Resolves callers and profiles.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token. Errors with `Unauthorized` if unknown.
    async fn authenticate(&self, token: &str) -> Result<Principal>;

    /// Profile used to denormalize worker details onto incidents.
    async fn profile(&self, user_id: Uuid) -> Result<UserProfile>;
}

/// Outbound delivery channel (SMS gateway, webhook, log, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, target: &DeliveryTarget, payload: &DeliveryPayload) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Bundle of storage and collaborator handles shared by services.
#[derive(Clone)]
pub struct Repositories {
    pub contacts: Arc<dyn ContactDirectory>,
    pub events: Arc<dyn SosEventRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub admins: Arc<dyn AdminDirectory>,
    pub identity: Arc<dyn IdentityProvider>,
}
