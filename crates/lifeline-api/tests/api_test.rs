//! End-to-end tests driving the router in-process against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;
use uuid::Uuid;

use lifeline_api::{app, AppState, SosConfig, SosService};
use lifeline_core::{
    ContactCategory, ContactDirectory, EventActor, EventBus, EventEnvelope, LifecycleEvent,
    SosStatus, UserRole,
};
use lifeline_db::test_fixtures::contact_request;
use lifeline_db::MemoryStore;
use lifeline_jobs::{LogNotificationSink, NotificationDispatcher};

const KM_PER_DEG: f64 = 6371.0 * std::f64::consts::PI / 180.0;

struct TestApp {
    store: Arc<MemoryStore>,
    router: Router,
    bus: EventBus,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let repos = store.repositories();
        let bus = EventBus::default();
        let dispatcher = NotificationDispatcher::new(&repos, Arc::new(LogNotificationSink))
            .with_event_bus(bus.clone());
        let service = SosService::new(repos.clone(), dispatcher, bus.clone(), SosConfig::default());
        let router = app(AppState::new(service, repos.identity.clone()));
        Self { store, router, bus }
    }

    /// Create an account and return its id with a working bearer token.
    fn user(&self, name: &str, role: UserRole) -> (Uuid, String) {
        let id = self.store.add_user(name, Some("+880 1711 000000"), role);
        let token = format!("token-{}", id);
        self.store.register_token(id, &token);
        (id, token)
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn trigger(&self, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, "/api/v1/emergency/sos", Some(token), Some(body))
            .await
    }
}

fn sos_body(lon: f64, lat: f64) -> Value {
    json!({
        "location": { "type": "Point", "coordinates": [lon, lat] },
        "emergencyType": "medical",
        "description": "Chest pain at the worksite",
        "locationDetails": { "city": "Dhaka", "country": "Bangladesh" },
        "deviceInfo": { "platform": "android", "battery": 41 },
        "familyContacts": [
            { "name": "Rina", "relationship": "sister", "phone": "+880 1811 222333" }
        ]
    })
}

async fn wait_for_dispatch(rx: &mut broadcast::Receiver<EventEnvelope>, event_id: Uuid) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = rx.recv().await.unwrap();
            if envelope.event_type == "sos.notifications_dispatched"
                && envelope.entity_id == event_id
            {
                return serde_json::to_value(&envelope.payload).unwrap();
            }
        }
    })
    .await
    .expect("fan-out did not finish")
}

fn event_id(body: &Value) -> Uuid {
    body["eventId"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_trigger_without_nearby_contacts() {
    let app = TestApp::new();
    let (_, token) = app.user("Karim", UserRole::Worker);

    let (status, body) = app.trigger(&token, sos_body(90.41, 23.81)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "active");
    assert_eq!(body["nearestContacts"], json!([]));
    assert_eq!(body["familyNotified"], 1);
    assert_eq!(body["timeline"].as_array().unwrap().len(), 1);
    assert_eq!(body["timeline"][0]["action"], "sos_triggered");
    assert_eq!(app.store.event_count(), 1);
}

#[tokio::test]
async fn test_trigger_attaches_nearest_contacts() {
    let app = TestApp::new();
    let (lon, lat) = (46.67, 24.71);
    for (name, km, always) in [("Shelter", 3.0, false), ("Embassy", 2.0, false), ("Hotline", 8.0, true)] {
        app.store
            .insert(contact_request(
                name,
                ContactCategory::Embassy,
                lon,
                lat + km / KM_PER_DEG,
                always,
            ))
            .await
            .unwrap();
    }
    let (_, token) = app.user("Karim", UserRole::Worker);

    let (status, body) = app.trigger(&token, sos_body(lon, lat)).await;
    assert_eq!(status, StatusCode::CREATED);

    let distances: Vec<f64> = body["nearestContacts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["distanceKm"].as_f64().unwrap())
        .collect();
    assert_eq!(distances, vec![2.0, 3.0, 8.0]);
    assert_eq!(body["nearestContacts"][0]["name"], "Embassy");
    assert_eq!(body["nearestContacts"][0]["notified"], false);
}

/// The accompanying "no active administrators" warning is asserted in
/// `lifeline-jobs/tests/fanout_test.rs`.
#[tokio::test]
async fn test_trigger_with_zero_admins_still_succeeds() {
    let app = TestApp::new();
    let (_, token) = app.user("Karim", UserRole::Worker);
    let mut rx = app.bus.subscribe();

    let (status, body) = app.trigger(&token, sos_body(90.41, 23.81)).await;
    assert_eq!(status, StatusCode::CREATED);

    let report = wait_for_dispatch(&mut rx, event_id(&body)).await;
    assert_eq!(report["adminNotifications"], 0);
    assert_eq!(report["familyNotified"], 1);
    assert_eq!(app.store.notification_count(), 0);
}

#[tokio::test]
async fn test_admin_inbox_after_fan_out() {
    let app = TestApp::new();
    let (_, worker) = app.user("Karim", UserRole::Worker);
    let (_, admin) = app.user("Duty Officer", UserRole::Admin);
    let mut rx = app.bus.subscribe();

    let (_, body) = app.trigger(&worker, sos_body(90.41, 23.81)).await;
    let id = event_id(&body);
    wait_for_dispatch(&mut rx, id).await;

    let (status, inbox) = app
        .send(Method::GET, "/api/v1/notifications?unreadOnly=true", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let inbox = inbox.as_array().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["type"], "emergency_sos");
    assert_eq!(inbox[0]["severity"], "high");
    assert_eq!(inbox[0]["related"]["id"], id.to_string());

    let notification_id = inbox[0]["id"].as_str().unwrap().to_string();
    let (status, marked) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/notifications/{}/read", notification_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marked["read"], true);

    let (_, result) = app
        .send(Method::POST, "/api/v1/notifications/read-all", Some(&admin), None)
        .await;
    assert_eq!(result["updated"], 0);

    // The worker cannot mark someone else's notification.
    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/notifications/{}/read", notification_id),
            Some(&worker),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_authentication_required() {
    let app = TestApp::new();

    let (status, body) = app
        .send(Method::POST, "/api/v1/emergency/sos", None, Some(sos_body(0.0, 0.0)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app
        .send(Method::GET, "/api/v1/emergency/history", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_disabled_account_is_rejected() {
    let app = TestApp::new();
    let (id, token) = app.user("Karim", UserRole::Worker);
    app.store.set_user_active(id, false);

    let (status, _) = app.trigger(&token, sos_body(90.41, 23.81)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.event_count(), 0);
}

#[tokio::test]
async fn test_trigger_validation_errors_name_the_field() {
    let app = TestApp::new();
    let (_, token) = app.user("Karim", UserRole::Worker);

    let mut missing_type = sos_body(90.41, 23.81);
    missing_type.as_object_mut().unwrap().remove("emergencyType");
    let (status, body) = app.trigger(&token, missing_type).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "emergencyType");

    let (status, body) = app.trigger(&token, sos_body(181.0, 23.81)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "location.coordinates");

    let mut bad_severity = sos_body(90.41, 23.81);
    bad_severity["severity"] = json!("apocalyptic");
    let (status, body) = app.trigger(&token, bad_severity).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "severity");

    let mut bad_family = sos_body(90.41, 23.81);
    bad_family["familyContacts"] = json!([{ "name": "Rina", "relationship": "sister" }]);
    let (status, body) = app.trigger(&token, bad_family).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "familyContacts[0].phone");

    assert_eq!(app.store.event_count(), 0);
}

#[tokio::test]
async fn test_resolve_then_location_update_is_rejected() {
    let app = TestApp::new();
    let (_, worker) = app.user("Karim", UserRole::Worker);
    let (admin_id, admin) = app.user("Duty Officer", UserRole::Admin);

    let (_, body) = app.trigger(&worker, sos_body(90.41, 23.81)).await;
    let id = event_id(&body);

    let (status, event) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/emergency/{}/status", id),
            Some(&admin),
            Some(json!({ "status": "resolved", "notes": "handled" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["status"], "resolved");
    assert_eq!(event["isActive"], false);
    assert_eq!(event["resolution"]["resolvedBy"], admin_id.to_string());
    assert_eq!(event["resolution"]["notes"], "handled");
    let timeline = event["timeline"].as_array().unwrap();
    assert_eq!(timeline.last().unwrap()["action"], "status_updated");

    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/emergency/{}/location", id),
            Some(&worker),
            Some(json!({ "location": { "coordinates": [90.42, 23.82] } })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/emergency/{}/status", id),
            Some(&worker),
            Some(json!({ "status": "active" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_update_authorization_and_lookup() {
    let app = TestApp::new();
    let (_, worker) = app.user("Karim", UserRole::Worker);
    let (_, stranger) = app.user("Someone Else", UserRole::Worker);

    let (_, body) = app.trigger(&worker, sos_body(90.41, 23.81)).await;
    let id = event_id(&body);
    let uri = format!("/api/v1/emergency/{}/status", id);

    let (status, _) = app
        .send(Method::PATCH, &uri, Some(&stranger), Some(json!({ "status": "cancelled" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/api/v1/emergency/{}/status", Uuid::now_v7()),
            Some(&worker),
            Some(json!({ "status": "cancelled" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send(Method::PATCH, &uri, Some(&worker), Some(json!({ "status": "finished" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "status");

    let (status, event) = app
        .send(Method::PATCH, &uri, Some(&worker), Some(json!({ "status": "in_progress" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["status"], "in_progress");
    assert_eq!(event["isActive"], true);
}

#[tokio::test]
async fn test_location_update_is_subject_only() {
    let app = TestApp::new();
    let (_, worker) = app.user("Karim", UserRole::Worker);
    let (_, admin) = app.user("Duty Officer", UserRole::Admin);

    let (_, body) = app.trigger(&worker, sos_body(90.41, 23.81)).await;
    let uri = format!("/api/v1/emergency/{}/location", event_id(&body));
    let move_to = json!({
        "location": { "type": "Point", "coordinates": [90.43, 23.79] },
        "locationDetails": { "city": "Dhaka", "landmark": "Gate 3" }
    });

    let (status, _) = app
        .send(Method::PATCH, &uri, Some(&admin), Some(move_to.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, event) = app.send(Method::PATCH, &uri, Some(&worker), Some(move_to)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["location"]["coordinates"], json!([90.43, 23.79]));
    assert_eq!(event["locationDetails"]["landmark"], "Gate 3");
    assert_eq!(event["timeline"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_event_detail_history_and_admin_board() {
    let app = TestApp::new();
    let (_, worker) = app.user("Karim", UserRole::Worker);
    let (_, stranger) = app.user("Someone Else", UserRole::Worker);
    let (_, admin) = app.user("Duty Officer", UserRole::Admin);

    let (_, first) = app.trigger(&worker, sos_body(90.41, 23.81)).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (_, second) = app.trigger(&worker, sos_body(90.42, 23.82)).await;
    let detail_uri = format!("/api/v1/emergency/{}", event_id(&first));

    let (status, detail) = app.send(Method::GET, &detail_uri, Some(&worker), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["isActive"], true);
    assert_eq!(detail["durationMinutes"], 0);
    assert_eq!(detail["notificationSummary"]["familyTotal"], 1);
    assert_eq!(detail["deviceInfo"]["platform"], "android");

    let (status, _) = app.send(Method::GET, &detail_uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.send(Method::GET, &detail_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, history) = app
        .send(Method::GET, "/api/v1/emergency/history?limit=10", Some(&worker), None)
        .await;
    let ids: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec![second["eventId"].as_str().unwrap(), first["eventId"].as_str().unwrap()]
    );

    let (_, history) = app
        .send(Method::GET, "/api/v1/emergency/history", Some(&stranger), None)
        .await;
    assert_eq!(history, json!([]));

    let (status, _) = app
        .send(Method::GET, "/api/v1/emergency/active", Some(&worker), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, board) = app
        .send(Method::GET, "/api/v1/emergency/active", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_family_acknowledgement() {
    let app = TestApp::new();
    let (_, worker) = app.user("Karim", UserRole::Worker);
    let (_, body) = app.trigger(&worker, sos_body(90.41, 23.81)).await;
    let id = event_id(&body);

    let (_, detail) = app
        .send(Method::GET, &format!("/api/v1/emergency/{}", id), Some(&worker), None)
        .await;
    let family_id = detail["familyNotifications"][0]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/emergency/{}/family/{}/acknowledge", id, family_id);

    let (status, event) = app.send(Method::POST, &uri, Some(&worker), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["familyNotifications"][0]["acknowledged"], true);
    let acknowledged_at = event["familyNotifications"][0]["acknowledgedAt"].clone();

    let (status, again) = app.send(Method::POST, &uri, Some(&worker), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["familyNotifications"][0]["acknowledgedAt"], acknowledged_at);

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/v1/emergency/{}/family/{}/acknowledge", id, Uuid::now_v7()),
            Some(&worker),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_public_nearest_contacts() {
    let app = TestApp::new();
    let (lon, lat) = (55.27, 25.2);
    app.store
        .insert(contact_request("Consulate", ContactCategory::Consulate, lon, lat + 1.0 / KM_PER_DEG, false))
        .await
        .unwrap();
    app.store
        .insert(contact_request("Shelter", ContactCategory::Shelter, lon, lat + 4.0 / KM_PER_DEG, true))
        .await
        .unwrap();

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/v1/emergency/contacts/nearest?lon={}&lat={}", lon, lat),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["type"], "consulate");
    assert_eq!(list[0]["distanceKm"], 1.0);

    let (_, body) = app
        .send(
            Method::GET,
            &format!(
                "/api/v1/emergency/contacts/nearest?lon={}&lat={}&maxDistance=2000",
                lon, lat
            ),
            None,
            None,
        )
        .await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = app
        .send(
            Method::GET,
            &format!("/api/v1/emergency/contacts/nearest?lon={}&lat={}&type=shelter", lon, lat),
            None,
            None,
        )
        .await;
    assert_eq!(body[0]["type"], "shelter");

    let (status, body) = app
        .send(Method::GET, "/api/v1/emergency/contacts/nearest?lon=55.27", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "lat");
}

#[tokio::test]
async fn test_contact_directory_maintenance() {
    let app = TestApp::new();
    let (_, worker) = app.user("Karim", UserRole::Worker);
    let (_, admin) = app.user("Duty Officer", UserRole::Admin);
    let entry = json!({
        "name": { "en": "Embassy of Bangladesh", "bn": "বাংলাদেশ দূতাবাস" },
        "type": "embassy",
        "country": "Saudi Arabia",
        "city": "Riyadh",
        "location": { "type": "Point", "coordinates": [46.62, 24.69] },
        "phones": ["+966 11 419 0000"],
        "emergencyHotline": "+966 50 000 0000",
        "alwaysAvailable": true,
        "capabilities": { "canRepatriate": true }
    });

    let (status, _) = app
        .send(Method::POST, "/api/v1/emergency/contacts", Some(&worker), Some(entry.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = app
        .send(Method::POST, "/api/v1/emergency/contacts", Some(&admin), Some(entry.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["active"], true);
    assert_eq!(created["capabilities"]["canRepatriate"], true);

    let mut bad = entry;
    bad["emergencyHotline"] = json!("call me");
    let (status, body) = app
        .send(Method::POST, "/api/v1/emergency/contacts", Some(&admin), Some(bad))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "emergencyHotline");

    let (status, list) = app
        .send(Method::GET, "/api/v1/emergency/contacts?country=Saudi%20Arabia", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["id"], created["id"]);
}

#[tokio::test]
async fn test_event_stream_requires_admin() {
    let app = TestApp::new();
    let (_, worker) = app.user("Karim", UserRole::Worker);

    let (status, _) = app.send(Method::GET, "/api/v1/events", Some(&worker), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_event_stream_frames_carry_envelope_id() {
    let app = TestApp::new();
    let (admin_id, admin) = app.user("Nadia", UserRole::Admin);

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/events")
        .header(header::AUTHORIZATION, format!("Bearer {}", admin))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();

    let mut rx = app.bus.subscribe();
    let incident = Uuid::now_v7();
    app.bus.emit(
        LifecycleEvent::SosStatusChanged {
            sos_event_id: incident,
            from: SosStatus::Active,
            to: SosStatus::InProgress,
        },
        EventActor::user(admin_id),
    );
    let envelope = rx.recv().await.unwrap();

    let text = tokio::time::timeout(Duration::from_secs(5), async {
        let mut text = String::new();
        while !text.contains("\n\n") {
            let frame = body.frame().await.unwrap().unwrap();
            if let Ok(data) = frame.into_data() {
                text.push_str(std::str::from_utf8(&data).unwrap());
            }
        }
        text
    })
    .await
    .expect("no SSE frame received");

    assert!(text.contains("event: sos.status_changed"));
    assert!(text.contains(&format!("id: {}", envelope.event_id)));
    assert!(text.contains(&incident.to_string()));
}
