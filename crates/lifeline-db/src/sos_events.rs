//! SOS event store.
//!
//! Incidents are single rows; the timeline and both recipient lists are
//! JSONB columns on that row. Mutations lock the row (`FOR UPDATE`),
//! apply the lifecycle function from `lifeline_core`, and write the row
//! back in the same transaction. The reaper's cancellation is a single
//! conditional `UPDATE` keyed on the status it observed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use lifeline_core::{
    timeline_action, AutoCancellation, CreateSosEventRequest, Error, FamilyNotification, GeoPoint,
    LocationDetails, MatchedContact, Resolution, Result, SosEvent, SosEventRepository, SosStatus,
    StaleCandidate, TimelineEntry,
};

const EVENT_COLUMNS: &str = "id, worker_id, worker_name, worker_phone, emergency_type,
    description, severity, longitude, latitude, location_details, device_info, status,
    resolved_by, resolved_at, resolution_notes, timeline, matched_contacts,
    family_notifications, auto_cancelled_at, auto_cancel_reason, created_at, updated_at";

/// PostgreSQL SOS event repository.
#[derive(Clone)]
pub struct PgSosEventRepository {
    pool: Pool<Postgres>,
}

impl PgSosEventRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> Result<SosEvent> {
        let emergency_type: String = row.get("emergency_type");
        let severity: String = row.get("severity");
        let status: String = row.get("status");
        let Json(location_details): Json<LocationDetails> = row.get("location_details");
        let device_info: Option<Json<serde_json::Value>> = row.get("device_info");
        let Json(timeline): Json<Vec<TimelineEntry>> = row.get("timeline");
        let Json(matched_contacts): Json<Vec<MatchedContact>> = row.get("matched_contacts");
        let Json(family_notifications): Json<Vec<FamilyNotification>> =
            row.get("family_notifications");

        let resolved_by: Option<Uuid> = row.get("resolved_by");
        let resolved_at: Option<DateTime<Utc>> = row.get("resolved_at");
        let resolution = match (resolved_by, resolved_at) {
            (Some(resolved_by), Some(resolved_at)) => Some(Resolution {
                resolved_by,
                resolved_at,
                notes: row.get("resolution_notes"),
            }),
            _ => None,
        };

        let auto_cancelled_at: Option<DateTime<Utc>> = row.get("auto_cancelled_at");
        let auto_cancellation = auto_cancelled_at.map(|cancelled_at| AutoCancellation {
            cancelled_at,
            reason: row
                .get::<Option<String>, _>("auto_cancel_reason")
                .unwrap_or_default(),
        });

        Ok(SosEvent {
            id: row.get("id"),
            worker_id: row.get("worker_id"),
            worker_name: row.get("worker_name"),
            worker_phone: row.get("worker_phone"),
            emergency_type: emergency_type.parse()?,
            description: row.get("description"),
            severity: severity.parse()?,
            location: GeoPoint {
                longitude: row.get("longitude"),
                latitude: row.get("latitude"),
            },
            location_details,
            device_info: device_info.map(|Json(v)| v),
            status: status.parse()?,
            resolution,
            timeline,
            matched_contacts,
            family_notifications,
            auto_cancellation,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn lock_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<SosEvent> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM sos_event WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::EventNotFound(id))?;
        Self::parse_row(&row)
    }

    /// Write back every mutable column of a locked incident.
    async fn save_tx(&self, tx: &mut Transaction<'_, Postgres>, event: &SosEvent) -> Result<()> {
        let resolution = event.resolution.as_ref();
        let auto = event.auto_cancellation.as_ref();
        sqlx::query(
            "UPDATE sos_event SET
                longitude = $2, latitude = $3, location_details = $4, status = $5,
                resolved_by = $6, resolved_at = $7, resolution_notes = $8,
                timeline = $9, matched_contacts = $10, family_notifications = $11,
                auto_cancelled_at = $12, auto_cancel_reason = $13, updated_at = $14
             WHERE id = $1",
        )
        .bind(event.id)
        .bind(event.location.longitude)
        .bind(event.location.latitude)
        .bind(Json(&event.location_details))
        .bind(event.status.as_str())
        .bind(resolution.map(|r| r.resolved_by))
        .bind(resolution.map(|r| r.resolved_at))
        .bind(resolution.and_then(|r| r.notes.as_deref()))
        .bind(Json(&event.timeline))
        .bind(Json(&event.matched_contacts))
        .bind(Json(&event.family_notifications))
        .bind(auto.map(|a| a.cancelled_at))
        .bind(auto.map(|a| a.reason.as_str()))
        .bind(event.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Lock, mutate, and persist one incident atomically.
    async fn mutate<T, F>(&self, id: Uuid, op: &'static str, f: F) -> Result<(T, SosEvent)>
    where
        F: FnOnce(&mut SosEvent, DateTime<Utc>) -> Result<T> + Send,
        T: Send,
    {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut event = self.lock_tx(&mut tx, id).await?;
        let out = f(&mut event, Utc::now())?;
        self.save_tx(&mut tx, &event).await?;
        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "event_store",
            component = "sos_events",
            op,
            event_id = %id,
            status = %event.status,
            timeline_len = event.timeline.len(),
            "SOS event updated"
        );
        Ok((out, event))
    }
}

#[async_trait]
impl SosEventRepository for PgSosEventRepository {
    async fn create(&self, req: CreateSosEventRequest) -> Result<SosEvent> {
        let event = SosEvent::new(req, Utc::now())?;
        let sql = format!(
            "INSERT INTO sos_event ({EVENT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                     NULL, NULL, NULL, $13, $14, $15, NULL, NULL, $16, $16)"
        );
        sqlx::query(&sql)
            .bind(event.id)
            .bind(event.worker_id)
            .bind(&event.worker_name)
            .bind(&event.worker_phone)
            .bind(event.emergency_type.as_str())
            .bind(&event.description)
            .bind(event.severity.as_str())
            .bind(event.location.longitude)
            .bind(event.location.latitude)
            .bind(Json(&event.location_details))
            .bind(event.device_info.as_ref().map(Json))
            .bind(event.status.as_str())
            .bind(Json(&event.timeline))
            .bind(Json(&event.matched_contacts))
            .bind(Json(&event.family_notifications))
            .bind(event.created_at)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        info!(
            subsystem = "event_store",
            component = "sos_events",
            op = "create",
            event_id = %event.id,
            worker_id = %event.worker_id,
            severity = %event.severity,
            "SOS event recorded"
        );
        Ok(event)
    }

    async fn fetch(&self, id: Uuid) -> Result<SosEvent> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM sos_event WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::EventNotFound(id))?;
        Self::parse_row(&row)
    }

    async fn list_for_worker(&self, worker_id: Uuid, limit: i64) -> Result<Vec<SosEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM sos_event
             WHERE worker_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(worker_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn list_open(&self, limit: i64) -> Result<Vec<SosEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM sos_event
             WHERE status IN ('active', 'in_progress')
             ORDER BY CASE severity
                 WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END,
                 created_at ASC, id ASC
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn append_timeline_entry(
        &self,
        id: Uuid,
        action: &str,
        description: &str,
        actor_id: Option<Uuid>,
    ) -> Result<SosEvent> {
        let (_, event) = self
            .mutate(id, "append_timeline", |e, now| {
                e.append_timeline(action, description, actor_id, now);
                Ok(())
            })
            .await?;
        Ok(event)
    }

    async fn set_matched_contacts(
        &self,
        id: Uuid,
        contacts: Vec<MatchedContact>,
    ) -> Result<SosEvent> {
        let (_, event) = self
            .mutate(id, "set_matched_contacts", |e, now| {
                e.set_matched_contacts(contacts, now);
                Ok(())
            })
            .await?;
        Ok(event)
    }

    async fn update_location(
        &self,
        id: Uuid,
        location: GeoPoint,
        details: Option<LocationDetails>,
        actor_id: Uuid,
    ) -> Result<SosEvent> {
        let (_, event) = self
            .mutate(id, "update_location", |e, now| {
                e.relocate(location, details, actor_id, now)
            })
            .await?;
        Ok(event)
    }

    async fn update_status(
        &self,
        id: Uuid,
        target: SosStatus,
        actor_id: Uuid,
        notes: Option<String>,
    ) -> Result<(SosStatus, SosEvent)> {
        self.mutate(id, "update_status", |e, now| {
            e.transition(target, actor_id, notes, now)
        })
        .await
    }

    async fn mark_contact_notified(&self, id: Uuid, contact_id: Uuid) -> Result<SosEvent> {
        let (_, event) = self
            .mutate(id, "mark_contact_notified", |e, now| {
                e.mark_contact_notified(contact_id, now)
            })
            .await?;
        Ok(event)
    }

    async fn mark_family_notified(&self, id: Uuid, family_id: Uuid) -> Result<SosEvent> {
        let (_, event) = self
            .mutate(id, "mark_family_notified", |e, now| {
                e.mark_family_notified(family_id, now)
            })
            .await?;
        Ok(event)
    }

    async fn acknowledge_family(
        &self,
        id: Uuid,
        family_id: Uuid,
        actor_id: Uuid,
    ) -> Result<SosEvent> {
        let (_, event) = self
            .mutate(id, "acknowledge_family", |e, now| {
                e.acknowledge_family(family_id, actor_id, now)
            })
            .await?;
        Ok(event)
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<StaleCandidate>> {
        let rows = sqlx::query(
            "SELECT id, status, created_at FROM sos_event
             WHERE status IN ('active', 'in_progress')
               AND auto_cancelled_at IS NULL
               AND created_at < $1
             ORDER BY created_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(StaleCandidate {
                    id: row.get("id"),
                    status: status.parse()?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn auto_cancel(&self, id: Uuid, expected: SosStatus, reason: &str) -> Result<bool> {
        let now = Utc::now();
        let entry = TimelineEntry {
            timestamp: now,
            action: timeline_action::AUTO_CANCELLED.to_string(),
            description: reason.to_string(),
            actor_id: None,
        };
        let result = sqlx::query(
            "UPDATE sos_event SET
                status = 'cancelled',
                auto_cancelled_at = $3,
                auto_cancel_reason = $4,
                timeline = timeline || jsonb_build_array($5::jsonb),
                updated_at = $3
             WHERE id = $1
               AND status = $2
               AND status IN ('active', 'in_progress')
               AND auto_cancelled_at IS NULL",
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(now)
        .bind(reason)
        .bind(Json(&entry))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    }
}
