//! SOS and contact-directory HTTP handlers.
//!
//! Enum-valued fields arrive as strings and are parsed here so a bad value
//! comes back as a 400 naming the field rather than a body rejection.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use lifeline_core::{
    ContactCategory, ContactEntry, ContactListFilter, CreateContactRequest, EmergencyType,
    GeoJsonPoint, GeoPoint, LocationDetails, NewFamilyContact, RankedContact, Severity,
    SosEventView, SosStatus,
};

use crate::auth::{RequireAdmin, RequireAuth};
use crate::services::{TriggerSos, TriggerSosResponse};
use crate::{ApiError, AppState};

// =============================================================================
// REQUEST TYPES
// =============================================================================

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSosBody {
    pub location: Option<GeoJsonPoint>,
    /// One of `medical`, `accident`, `abuse`, `detention`, `lost_documents`,
    /// `threat`, `harassment`, `unpaid_wages`, `unsafe_conditions`, `other`.
    pub emergency_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to `high`.
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub location_details: Option<LocationDetails>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub device_info: Option<serde_json::Value>,
    #[serde(default)]
    pub family_contacts: Vec<NewFamilyContact>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusBody {
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLocationBody {
    pub location: Option<GeoJsonPoint>,
    #[serde(default)]
    pub location_details: Option<LocationDetails>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct NearestQuery {
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    /// Meters, defaults to 50 km.
    pub max_distance: Option<f64>,
    #[serde(rename = "type")]
    pub category: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ContactListQuery {
    pub country: Option<String>,
    pub city: Option<String>,
    #[serde(rename = "type")]
    pub category: Option<String>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::bad_request(field, format!("{} is required", field)))
}

fn parse_location(location: Option<GeoJsonPoint>) -> Result<GeoPoint, ApiError> {
    Ok(GeoPoint::try_from(required(location, "location")?)?)
}

fn parse_category(category: Option<&str>) -> Result<Option<ContactCategory>, ApiError> {
    Ok(category.map(str::parse::<ContactCategory>).transpose()?)
}

// =============================================================================
// SOS
// =============================================================================

/// Raise an SOS for the authenticated worker.
///
/// POST /api/v1/emergency/sos
#[utoipa::path(post, path = "/api/v1/emergency/sos", tag = "Emergency",
    request_body = TriggerSosBody,
    responses(
        (status = 201, description = "SOS recorded", body = TriggerSosResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Missing or invalid token")))]
pub async fn trigger_sos(
    State(state): State<AppState>,
    auth: RequireAuth,
    Json(body): Json<TriggerSosBody>,
) -> Result<(StatusCode, Json<TriggerSosResponse>), ApiError> {
    let location = parse_location(body.location)?;
    let emergency_type: EmergencyType = required(body.emergency_type, "emergencyType")?.parse()?;
    let severity = body
        .severity
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()?;

    let response = state
        .service
        .trigger(
            &auth.principal,
            TriggerSos {
                location,
                emergency_type,
                description: body.description,
                severity,
                location_details: body.location_details,
                device_info: body.device_info,
                family_contacts: body.family_contacts,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// The caller's own incidents, newest first.
///
/// GET /api/v1/emergency/history
#[utoipa::path(get, path = "/api/v1/emergency/history", tag = "Emergency",
    params(LimitQuery),
    responses((status = 200, description = "Incident history", body = Vec<SosEventView>)))]
pub async fn history(
    State(state): State<AppState>,
    auth: RequireAuth,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<SosEventView>>, ApiError> {
    Ok(Json(state.service.history(&auth.principal, query.limit).await?))
}

/// Open incidents for administrators, most severe then oldest first.
///
/// GET /api/v1/emergency/active
#[utoipa::path(get, path = "/api/v1/emergency/active", tag = "Emergency",
    params(LimitQuery),
    responses(
        (status = 200, description = "Open incidents", body = Vec<SosEventView>),
        (status = 403, description = "Administrator role required")))]
pub async fn open_incidents(
    State(state): State<AppState>,
    auth: RequireAdmin,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<SosEventView>>, ApiError> {
    Ok(Json(
        state
            .service
            .open_incidents(&auth.principal, query.limit)
            .await?,
    ))
}

/// GET /api/v1/emergency/:id
#[utoipa::path(get, path = "/api/v1/emergency/{id}", tag = "Emergency",
    params(("id" = Uuid, Path, description = "SOS event id")),
    responses(
        (status = 200, description = "Incident", body = SosEventView),
        (status = 403, description = "Not the subject or an administrator"),
        (status = 404, description = "Not found")))]
pub async fn get_event(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<SosEventView>, ApiError> {
    Ok(Json(state.service.get(&auth.principal, id).await?))
}

/// Change an incident's status. The subject or an administrator may do this;
/// terminal incidents reject every change.
///
/// PATCH /api/v1/emergency/:id/status
#[utoipa::path(patch, path = "/api/v1/emergency/{id}/status", tag = "Emergency",
    params(("id" = Uuid, Path, description = "SOS event id")),
    request_body = UpdateStatusBody,
    responses(
        (status = 200, description = "Updated", body = SosEventView),
        (status = 400, description = "Invalid status or transition"),
        (status = 403, description = "Not the subject or an administrator"),
        (status = 404, description = "Not found")))]
pub async fn update_status(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<SosEventView>, ApiError> {
    let status: SosStatus = required(body.status, "status")?.parse()?;
    Ok(Json(
        state
            .service
            .update_status(&auth.principal, id, status, body.notes)
            .await?,
    ))
}

/// PATCH /api/v1/emergency/:id/location
#[utoipa::path(patch, path = "/api/v1/emergency/{id}/location", tag = "Emergency",
    params(("id" = Uuid, Path, description = "SOS event id")),
    request_body = UpdateLocationBody,
    responses(
        (status = 200, description = "Updated", body = SosEventView),
        (status = 400, description = "Invalid location or incident closed"),
        (status = 403, description = "Not the subject"),
        (status = 404, description = "Not found")))]
pub async fn update_location(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateLocationBody>,
) -> Result<Json<SosEventView>, ApiError> {
    let location = parse_location(body.location)?;
    Ok(Json(
        state
            .service
            .update_location(&auth.principal, id, location, body.location_details)
            .await?,
    ))
}

/// POST /api/v1/emergency/:id/family/:family_id/acknowledge
#[utoipa::path(post, path = "/api/v1/emergency/{id}/family/{family_id}/acknowledge", tag = "Emergency",
    params(
        ("id" = Uuid, Path, description = "SOS event id"),
        ("family_id" = Uuid, Path, description = "Family notification id")),
    responses(
        (status = 200, description = "Acknowledged", body = SosEventView),
        (status = 404, description = "Not found")))]
pub async fn acknowledge_family(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path((id, family_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SosEventView>, ApiError> {
    Ok(Json(
        state
            .service
            .acknowledge_family(&auth.principal, id, family_id)
            .await?,
    ))
}

// =============================================================================
// CONTACT DIRECTORY
// =============================================================================

/// Public nearest-help lookup.
///
/// GET /api/v1/emergency/contacts/nearest
#[utoipa::path(get, path = "/api/v1/emergency/contacts/nearest", tag = "Contacts",
    params(NearestQuery),
    responses(
        (status = 200, description = "Contacts ordered by distance", body = Vec<RankedContact>),
        (status = 400, description = "Invalid query")))]
pub async fn nearest_contacts(
    State(state): State<AppState>,
    Query(query): Query<NearestQuery>,
) -> Result<Json<Vec<RankedContact>>, ApiError> {
    let lon = required(query.lon, "lon")?;
    let lat = required(query.lat, "lat")?;
    let point = GeoPoint::new(lon, lat)?;
    let category = parse_category(query.category.as_deref())?;

    Ok(Json(
        state
            .service
            .nearest_contacts(point, query.max_distance, category, query.limit)
            .await?,
    ))
}

/// GET /api/v1/emergency/contacts
#[utoipa::path(get, path = "/api/v1/emergency/contacts", tag = "Contacts",
    params(ContactListQuery),
    responses((status = 200, description = "Active directory entries", body = Vec<ContactEntry>)))]
pub async fn list_contacts(
    State(state): State<AppState>,
    Query(query): Query<ContactListQuery>,
) -> Result<Json<Vec<ContactEntry>>, ApiError> {
    let filter = ContactListFilter {
        country: query.country,
        city: query.city,
        category: parse_category(query.category.as_deref())?,
    };
    Ok(Json(state.service.list_contacts(&filter).await?))
}

/// POST /api/v1/emergency/contacts
#[utoipa::path(post, path = "/api/v1/emergency/contacts", tag = "Contacts",
    request_body = CreateContactRequest,
    responses(
        (status = 201, description = "Created", body = ContactEntry),
        (status = 400, description = "Invalid entry"),
        (status = 403, description = "Administrator role required")))]
pub async fn create_contact(
    State(state): State<AppState>,
    auth: RequireAdmin,
    Json(req): Json<CreateContactRequest>,
) -> Result<(StatusCode, Json<ContactEntry>), ApiError> {
    let entry = state.service.create_contact(&auth.principal, req).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
