//! # lifeline-api
//!
//! HTTP surface of the Lifeline SOS engine: the lifecycle controller, the
//! axum router and its handlers, and bearer-token extractors.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod state;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use error::ApiError;
pub use services::{SosConfig, SosService};
pub use state::AppState;

use handlers::{emergency, notifications, system};
use middleware::MakeRequestUuidV7;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lifeline SOS API",
        description = "Emergency SOS intake, proximity matching and incident lifecycle"
    ),
    paths(
        system::health_check,
        system::event_stream,
        emergency::trigger_sos,
        emergency::history,
        emergency::open_incidents,
        emergency::get_event,
        emergency::update_status,
        emergency::update_location,
        emergency::acknowledge_family,
        emergency::nearest_contacts,
        emergency::list_contacts,
        emergency::create_contact,
        notifications::list_notifications,
        notifications::mark_read,
        notifications::mark_all_read,
    ),
    components(schemas(
        emergency::TriggerSosBody,
        emergency::UpdateStatusBody,
        emergency::UpdateLocationBody,
        services::TriggerSosResponse,
        lifeline_core::SosEvent,
        lifeline_core::SosEventView,
        lifeline_core::NotificationSummary,
        lifeline_core::SosStatus,
        lifeline_core::Severity,
        lifeline_core::EmergencyType,
        lifeline_core::TimelineEntry,
        lifeline_core::MatchedContact,
        lifeline_core::NewFamilyContact,
        lifeline_core::FamilyNotification,
        lifeline_core::Resolution,
        lifeline_core::AutoCancellation,
        lifeline_core::LocationDetails,
        lifeline_core::GeoJsonPoint,
        lifeline_core::ContactEntry,
        lifeline_core::ContactCategory,
        lifeline_core::ContactCapabilities,
        lifeline_core::CreateContactRequest,
        lifeline_core::RankedContact,
        lifeline_core::Notification,
        lifeline_core::NotificationKind,
        lifeline_core::RelatedEntity,
    )),
    tags(
        (name = "Emergency", description = "SOS incidents"),
        (name = "Contacts", description = "Directory of embassies, NGOs and other help"),
        (name = "Notifications", description = "In-app notification inbox"),
        (name = "System", description = "Health checks and event stream")
    )
)]
pub struct ApiDoc;

/// Parse allowed CORS origins from `ALLOWED_ORIGINS` (comma-separated).
///
/// ```text
/// ALLOWED_ORIGINS=https://lifeline.example.org,http://localhost:3000
/// ```
pub fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str =
        std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".to_string());

    if origins_str.trim().is_empty() {
        return vec![HeaderValue::from_static("http://localhost:3000")];
    }

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/emergency/sos", post(emergency::trigger_sos))
        .route("/emergency/history", get(emergency::history))
        .route("/emergency/active", get(emergency::open_incidents))
        .route(
            "/emergency/contacts",
            get(emergency::list_contacts).post(emergency::create_contact),
        )
        .route(
            "/emergency/contacts/nearest",
            get(emergency::nearest_contacts),
        )
        .route("/emergency/:id", get(emergency::get_event))
        .route("/emergency/:id/status", patch(emergency::update_status))
        .route("/emergency/:id/location", patch(emergency::update_location))
        .route(
            "/emergency/:id/family/:family_id/acknowledge",
            post(emergency::acknowledge_family),
        )
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/:id/read", patch(notifications::mark_read))
        .route("/events", get(system::event_stream))
}

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(system::health_check))
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parse_allowed_origins()))
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .with_state(state)
}
