//! In-app notification repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use lifeline_core::{
    Error, NewNotification, Notification, NotificationRepository, RelatedEntity, Result,
};

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, kind, title, message, severity,
    related_id, related_type, read, read_at, metadata, created_at";

/// PostgreSQL notification repository.
#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: Pool<Postgres>,
}

impl PgNotificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> Result<Notification> {
        let kind: String = row.get("kind");
        let severity: String = row.get("severity");
        let related_id: Option<Uuid> = row.get("related_id");
        let related_type: Option<String> = row.get("related_type");
        let Json(metadata): Json<serde_json::Value> = row.get("metadata");
        Ok(Notification {
            id: row.get("id"),
            recipient_id: row.get("recipient_id"),
            kind: kind.parse()?,
            title: row.get("title"),
            message: row.get("message"),
            severity: severity.parse()?,
            related: related_id.map(|id| RelatedEntity {
                id,
                entity_type: related_type.unwrap_or_default(),
            }),
            read: row.get("read"),
            read_at: row.get("read_at"),
            metadata,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create_many(&self, notifications: Vec<NewNotification>) -> Result<Vec<Notification>> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO notification ({NOTIFICATION_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, NULL, $9, $10)
             RETURNING {NOTIFICATION_COLUMNS}"
        );

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut created = Vec::with_capacity(notifications.len());
        for n in notifications {
            let row = sqlx::query(&sql)
                .bind(Uuid::now_v7())
                .bind(n.recipient_id)
                .bind(n.kind.as_str())
                .bind(&n.title)
                .bind(&n.message)
                .bind(n.severity.as_str())
                .bind(n.related.as_ref().map(|r| r.id))
                .bind(n.related.as_ref().map(|r| r.entity_type.as_str()))
                .bind(Json(&n.metadata))
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;
            created.push(Self::parse_row(&row)?);
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(created)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notification
             WHERE recipient_id = $1 AND (NOT $2 OR NOT read)
             ORDER BY created_at DESC, id DESC
             LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(recipient_id)
            .bind(unread_only)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn list_for_related(&self, related_id: Uuid) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notification
             WHERE related_id = $1
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(related_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(Self::parse_row).collect()
    }

    async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> Result<Notification> {
        let sql = format!(
            "UPDATE notification SET read = TRUE, read_at = COALESCE(read_at, $3)
             WHERE id = $1 AND recipient_id = $2
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(recipient_id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("Notification {} not found", id)))?;
        Self::parse_row(&row)
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notification SET read = TRUE, read_at = $2
             WHERE recipient_id = $1 AND NOT read",
        )
        .bind(recipient_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}
