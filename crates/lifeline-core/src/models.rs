//! Core data models for Lifeline.
//!
//! These types are shared across all Lifeline crates. Wire JSON uses
//! camelCase field names and snake_case enum values.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::geo::{BoundingBox, GeoPoint};

// =============================================================================
// CONTACT DIRECTORY
// =============================================================================

/// Kind of help a directory entry provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContactCategory {
    Embassy,
    Consulate,
    Ngo,
    LaborOffice,
    Shelter,
    LegalAid,
}

impl ContactCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embassy => "embassy",
            Self::Consulate => "consulate",
            Self::Ngo => "ngo",
            Self::LaborOffice => "labor_office",
            Self::Shelter => "shelter",
            Self::LegalAid => "legal_aid",
        }
    }
}

impl std::fmt::Display for ContactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContactCategory {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "embassy" => Ok(Self::Embassy),
            "consulate" => Ok(Self::Consulate),
            "ngo" => Ok(Self::Ngo),
            "labor_office" => Ok(Self::LaborOffice),
            "shelter" => Ok(Self::Shelter),
            "legal_aid" => Ok(Self::LegalAid),
            _ => Err(Error::validation(
                "type",
                format!("unknown contact category: {}", s),
            )),
        }
    }
}

/// What a directory entry can do beyond answering the phone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactCapabilities {
    pub can_shelter: bool,
    pub can_provide_legal_aid: bool,
    pub can_provide_medical: bool,
    pub can_repatriate: bool,
}

/// A point of help: embassy, consulate, NGO, labor office, shelter, or legal aid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContactEntry {
    pub id: Uuid,
    /// Localized names keyed by language code (`en`, `bn`, ...).
    pub name: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub category: ContactCategory,
    pub country: String,
    pub city: Option<String>,
    #[schema(value_type = crate::geo::GeoJsonPoint)]
    pub location: GeoPoint,
    pub phones: Vec<String>,
    pub emergency_hotline: String,
    pub always_available: bool,
    pub capabilities: ContactCapabilities,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactEntry {
    /// Name in the requested language, falling back to English and then to
    /// the first language available.
    pub fn display_name(&self, lang: &str) -> &str {
        self.name
            .get(lang)
            .or_else(|| self.name.get("en"))
            .or_else(|| self.name.values().next())
            .map(String::as_str)
            .unwrap_or("")
    }
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\+?[0-9(][0-9 ()\-]{2,22}$").expect("static phone pattern"))
}

/// Whether a string looks like a dialable phone number.
pub fn is_valid_phone(phone: &str) -> bool {
    phone_pattern().is_match(phone.trim())
}

/// Request for adding an entry to the contact directory.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateContactRequest {
    pub name: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub category: ContactCategory,
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
    #[schema(value_type = crate::geo::GeoJsonPoint)]
    pub location: GeoPoint,
    #[serde(default)]
    pub phones: Vec<String>,
    pub emergency_hotline: String,
    #[serde(default)]
    pub always_available: bool,
    #[serde(default)]
    pub capabilities: ContactCapabilities,
}

impl CreateContactRequest {
    /// Check the fields the directory relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.name.values().any(|n| !n.trim().is_empty()) {
            return Err(Error::validation(
                "name",
                "at least one localized name is required",
            ));
        }
        if self.country.trim().is_empty() {
            return Err(Error::validation("country", "country is required"));
        }
        if !is_valid_phone(&self.emergency_hotline) {
            return Err(Error::validation(
                "emergencyHotline",
                format!("invalid phone number: {}", self.emergency_hotline),
            ));
        }
        if let Some(bad) = self.phones.iter().find(|p| !is_valid_phone(p)) {
            return Err(Error::validation(
                "phones",
                format!("invalid phone number: {}", bad),
            ));
        }
        Ok(())
    }
}

/// Candidate fetch parameters for the contact directory.
///
/// Directories only ever return active entries; `bounds` is an optional
/// pre-filter and callers must still apply the exact radius check.
#[derive(Debug, Clone, Default)]
pub struct ContactQuery {
    pub category: Option<ContactCategory>,
    pub always_available_only: bool,
    pub bounds: Option<BoundingBox>,
}

/// Filter for listing the directory.
#[derive(Debug, Clone, Default)]
pub struct ContactListFilter {
    pub country: Option<String>,
    pub city: Option<String>,
    pub category: Option<ContactCategory>,
}

/// A directory entry with its distance from a query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RankedContact {
    #[serde(flatten)]
    pub contact: ContactEntry,
    pub distance_km: f64,
}

// =============================================================================
// SOS EVENTS
// =============================================================================

/// Kind of emergency reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyType {
    Medical,
    Accident,
    Abuse,
    Detention,
    LostDocuments,
    Threat,
    Harassment,
    UnpaidWages,
    UnsafeConditions,
    Other,
}

impl EmergencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medical => "medical",
            Self::Accident => "accident",
            Self::Abuse => "abuse",
            Self::Detention => "detention",
            Self::LostDocuments => "lost_documents",
            Self::Threat => "threat",
            Self::Harassment => "harassment",
            Self::UnpaidWages => "unpaid_wages",
            Self::UnsafeConditions => "unsafe_conditions",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmergencyType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "medical" => Ok(Self::Medical),
            "accident" => Ok(Self::Accident),
            "abuse" => Ok(Self::Abuse),
            "detention" => Ok(Self::Detention),
            "lost_documents" => Ok(Self::LostDocuments),
            "threat" => Ok(Self::Threat),
            "harassment" => Ok(Self::Harassment),
            "unpaid_wages" => Ok(Self::UnpaidWages),
            "unsafe_conditions" => Ok(Self::UnsafeConditions),
            "other" => Ok(Self::Other),
            _ => Err(Error::validation(
                "emergencyType",
                format!("unknown emergency type: {}", s),
            )),
        }
    }
}

/// Incident severity. Defaults to `high` when the worker does not pick one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    #[default]
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Sort key, most severe first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(Error::validation(
                "severity",
                format!("unknown severity: {}", s),
            )),
        }
    }
}

/// Lifecycle status of an incident.
///
/// `active -> in_progress -> resolved`, with `cancelled` reachable from
/// either open state. `resolved` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SosStatus {
    Active,
    InProgress,
    Resolved,
    Cancelled,
}

impl SosStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }

    /// `active` or `in_progress`.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for SosStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SosStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(Error::validation(
                "status",
                format!(
                    "invalid status '{}', expected one of active, in_progress, resolved, cancelled",
                    s
                ),
            )),
        }
    }
}

/// Free-form locality attached to an incident location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationDetails {
    pub country: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub landmark: Option<String>,
}

impl LocationDetails {
    /// Short human-readable locality, e.g. `"Riyadh, Saudi Arabia"`.
    pub fn summary(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.address, &self.city, &self.country]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.trim().is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Timeline action tags.
pub mod timeline_action {
    pub const SOS_TRIGGERED: &str = "sos_triggered";
    pub const LOCATION_UPDATED: &str = "location_updated";
    pub const STATUS_UPDATED: &str = "status_updated";
    pub const AUTO_CANCELLED: &str = "auto_cancelled";
    pub const FAMILY_ACKNOWLEDGED: &str = "family_acknowledged";
}

/// One append-only audit entry on an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub description: String,
    pub actor_id: Option<Uuid>,
}

/// A directory entry matched to an incident at trigger time.
///
/// `distance_km` is computed once when matching and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchedContact {
    pub contact_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub category: ContactCategory,
    pub hotline: String,
    pub distance_km: f64,
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
}

impl MatchedContact {
    pub fn from_ranked(ranked: &RankedContact) -> Self {
        Self {
            contact_id: ranked.contact.id,
            name: ranked.contact.display_name("en").to_string(),
            category: ranked.contact.category,
            hotline: ranked.contact.emergency_hotline.clone(),
            distance_km: ranked.distance_km,
            notified: false,
            notified_at: None,
        }
    }
}

/// Family member supplied by the worker when triggering an SOS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewFamilyContact {
    pub name: String,
    pub relationship: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl NewFamilyContact {
    pub fn validate(&self, index: usize) -> Result<()> {
        let field = |name: &str| format!("familyContacts[{}].{}", index, name);
        if self.name.trim().is_empty() {
            return Err(Error::validation(field("name"), "name is required"));
        }
        match (&self.phone, &self.email) {
            (None, None) => Err(Error::validation(
                field("phone"),
                "a phone number or email is required",
            )),
            (Some(phone), _) if !is_valid_phone(phone) => Err(Error::validation(
                field("phone"),
                format!("invalid phone number: {}", phone),
            )),
            (_, Some(email)) if !email.contains('@') => Err(Error::validation(
                field("email"),
                format!("invalid email: {}", email),
            )),
            _ => Ok(()),
        }
    }
}

/// Delivery record for one family member on an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FamilyNotification {
    pub id: Uuid,
    pub name: String,
    pub relationship: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl FamilyNotification {
    pub fn from_new(contact: NewFamilyContact) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: contact.name,
            relationship: contact.relationship,
            phone: contact.phone,
            email: contact.email,
            notified: false,
            notified_at: None,
            acknowledged: false,
            acknowledged_at: None,
        }
    }
}

/// Present only while an incident is `resolved`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub resolved_by: Uuid,
    pub resolved_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Marker stamped by the stale-incident reaper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoCancellation {
    pub cancelled_at: DateTime<Utc>,
    pub reason: String,
}

/// One emergency incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SosEvent {
    pub id: Uuid,
    pub worker_id: Uuid,
    /// Captured at creation so the record survives account changes.
    pub worker_name: String,
    pub worker_phone: Option<String>,
    pub emergency_type: EmergencyType,
    pub description: Option<String>,
    pub severity: Severity,
    #[schema(value_type = crate::geo::GeoJsonPoint)]
    pub location: GeoPoint,
    pub location_details: LocationDetails,
    pub device_info: Option<JsonValue>,
    pub status: SosStatus,
    pub resolution: Option<Resolution>,
    pub timeline: Vec<TimelineEntry>,
    pub matched_contacts: Vec<MatchedContact>,
    pub family_notifications: Vec<FamilyNotification>,
    pub auto_cancellation: Option<AutoCancellation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted by the event store when creating an incident.
#[derive(Debug, Clone)]
pub struct CreateSosEventRequest {
    pub worker_id: Uuid,
    pub worker_name: String,
    pub worker_phone: Option<String>,
    pub emergency_type: EmergencyType,
    pub description: Option<String>,
    pub severity: Option<Severity>,
    pub location: GeoPoint,
    pub location_details: Option<LocationDetails>,
    pub device_info: Option<JsonValue>,
    pub family_contacts: Vec<NewFamilyContact>,
}

/// Open incident old enough to be considered by the reaper.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleCandidate {
    pub id: Uuid,
    pub status: SosStatus,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Notification type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    EmergencySos,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmergencySos => "emergency_sos",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "emergency_sos" => Ok(Self::EmergencySos),
            _ => Err(Error::Internal(format!("unknown notification kind: {}", s))),
        }
    }
}

/// Link from a notification back to the entity that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelatedEntity {
    pub id: Uuid,
    pub entity_type: String,
}

impl RelatedEntity {
    pub fn sos_event(id: Uuid) -> Self {
        Self {
            id,
            entity_type: "sos_event".to_string(),
        }
    }
}

/// Per-recipient in-app notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub related: Option<RelatedEntity>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Request for creating a notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub related: Option<RelatedEntity>,
    pub metadata: JsonValue,
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Worker,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "worker" => Ok(Self::Worker),
            "admin" => Ok(Self::Admin),
            _ => Err(Error::Internal(format!("unknown role: {}", s))),
        }
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Profile data denormalized onto incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub active: bool,
}

// =============================================================================
// OUTBOUND DELIVERY
// =============================================================================

/// Recipient handed to a notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryTarget {
    Contact {
        contact_id: Uuid,
        name: String,
        hotline: String,
    },
    Family {
        family_id: Uuid,
        name: String,
        relationship: String,
        phone: Option<String>,
        email: Option<String>,
    },
}

impl DeliveryTarget {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Contact { .. } => "contact",
            Self::Family { .. } => "family",
        }
    }

    pub fn recipient_id(&self) -> Uuid {
        match self {
            Self::Contact { contact_id, .. } => *contact_id,
            Self::Family { family_id, .. } => *family_id,
        }
    }
}

/// Message body handed to a notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub event_id: Uuid,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub emergency_type: EmergencyType,
    pub worker_name: String,
    pub worker_phone: Option<String>,
    pub location: GeoPoint,
    pub locality: Option<String>,
}
