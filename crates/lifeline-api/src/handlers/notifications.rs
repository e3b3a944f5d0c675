//! Notification inbox handlers for the authenticated recipient.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use lifeline_core::Notification;

use crate::auth::RequireAuth;
use crate::{ApiError, AppState};

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

/// GET /api/v1/notifications
#[utoipa::path(get, path = "/api/v1/notifications", tag = "Notifications",
    params(InboxQuery),
    responses((status = 200, description = "Inbox, newest first", body = Vec<Notification>)))]
pub async fn list_notifications(
    State(state): State<AppState>,
    auth: RequireAuth,
    Query(query): Query<InboxQuery>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(
        state
            .service
            .notifications(&auth.principal, query.unread_only, query.limit)
            .await?,
    ))
}

/// PATCH /api/v1/notifications/:id/read
#[utoipa::path(patch, path = "/api/v1/notifications/{id}/read", tag = "Notifications",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Marked read", body = Notification),
        (status = 404, description = "Not found")))]
pub async fn mark_read(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, ApiError> {
    Ok(Json(
        state
            .service
            .mark_notification_read(&auth.principal, id)
            .await?,
    ))
}

/// POST /api/v1/notifications/read-all
#[utoipa::path(post, path = "/api/v1/notifications/read-all", tag = "Notifications",
    responses((status = 200, description = "Count of notifications marked read")))]
pub async fn mark_all_read(
    State(state): State<AppState>,
    auth: RequireAuth,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = state
        .service
        .mark_all_notifications_read(&auth.principal)
        .await?;
    Ok(Json(json!({ "updated": updated })))
}
