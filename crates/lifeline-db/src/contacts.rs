//! Contact directory repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use lifeline_core::{
    ContactCapabilities, ContactDirectory, ContactEntry, ContactListFilter, ContactQuery,
    CreateContactRequest, Error, GeoPoint, Result,
};

const CONTACT_COLUMNS: &str = "id, name, category, country, city, longitude, latitude, phones,
    emergency_hotline, always_available, can_shelter, can_provide_legal_aid,
    can_provide_medical, can_repatriate, active, created_at, updated_at";

/// PostgreSQL contact directory.
#[derive(Clone)]
pub struct PgContactRepository {
    pool: Pool<Postgres>,
}

impl PgContactRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Hide an entry from proximity queries without deleting it.
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE emergency_contact SET active = $1, updated_at = $2 WHERE id = $3")
                .bind(active)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Contact {} not found", id)));
        }
        Ok(())
    }

    fn parse_row(row: &PgRow) -> Result<ContactEntry> {
        let Json(name): Json<BTreeMap<String, String>> = row.get("name");
        let category: String = row.get("category");
        Ok(ContactEntry {
            id: row.get("id"),
            name,
            category: category.parse()?,
            country: row.get("country"),
            city: row.get("city"),
            location: GeoPoint {
                longitude: row.get("longitude"),
                latitude: row.get("latitude"),
            },
            phones: row.get("phones"),
            emergency_hotline: row.get("emergency_hotline"),
            always_available: row.get("always_available"),
            capabilities: ContactCapabilities {
                can_shelter: row.get("can_shelter"),
                can_provide_legal_aid: row.get("can_provide_legal_aid"),
                can_provide_medical: row.get("can_provide_medical"),
                can_repatriate: row.get("can_repatriate"),
            },
            active: row.get("active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ContactDirectory for PgContactRepository {
    async fn find_candidates(&self, query: &ContactQuery) -> Result<Vec<ContactEntry>> {
        let (min_lat, max_lat) = match &query.bounds {
            Some(b) => (Some(b.min_latitude), Some(b.max_latitude)),
            None => (None, None),
        };
        let lon = query.bounds.as_ref().and_then(|b| b.longitude_ranges);
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM emergency_contact
             WHERE active
               AND ($1::text IS NULL OR category = $1)
               AND (NOT $2 OR always_available)
               AND ($3::float8 IS NULL OR latitude BETWEEN $3 AND $4)
               AND ($5::float8 IS NULL
                    OR longitude BETWEEN $5 AND $6
                    OR longitude BETWEEN $7 AND $8)"
        );
        let rows = sqlx::query(&sql)
            .bind(query.category.map(|c| c.as_str()))
            .bind(query.always_available_only)
            .bind(min_lat)
            .bind(max_lat)
            .bind(lon.map(|r| r[0].0))
            .bind(lon.map(|r| r[0].1))
            .bind(lon.map(|r| r[1].0))
            .bind(lon.map(|r| r[1].1))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn get(&self, id: Uuid) -> Result<ContactEntry> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM emergency_contact WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("Contact {} not found", id)))?;
        Self::parse_row(&row)
    }

    async fn list(&self, filter: &ContactListFilter) -> Result<Vec<ContactEntry>> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM emergency_contact
             WHERE active
               AND ($1::text IS NULL OR country = $1)
               AND ($2::text IS NULL OR city = $2)
               AND ($3::text IS NULL OR category = $3)
             ORDER BY country, city NULLS FIRST, id"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.country.as_deref())
            .bind(filter.city.as_deref())
            .bind(filter.category.map(|c| c.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn insert(&self, req: CreateContactRequest) -> Result<ContactEntry> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO emergency_contact ({CONTACT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, TRUE, $15, $15)
             RETURNING {CONTACT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(Json(&req.name))
            .bind(req.category.as_str())
            .bind(&req.country)
            .bind(&req.city)
            .bind(req.location.longitude)
            .bind(req.location.latitude)
            .bind(&req.phones)
            .bind(&req.emergency_hotline)
            .bind(req.always_available)
            .bind(req.capabilities.can_shelter)
            .bind(req.capabilities.can_provide_legal_aid)
            .bind(req.capabilities.can_provide_medical)
            .bind(req.capabilities.can_repatriate)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        tracing::info!(
            subsystem = "directory",
            component = "contacts",
            op = "insert",
            contact_id = %id,
            category = %req.category,
            country = %req.country,
            "Contact entry created"
        );
        Self::parse_row(&row)
    }
}
