//! Account lookups backing authentication, profile denormalization, and
//! the administrator directory.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use lifeline_core::{
    AdminDirectory, Error, IdentityProvider, Principal, Result, UserProfile, UserRole,
};

/// SHA-256 hex digest of a bearer token, as stored in `api_token`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// PostgreSQL user directory.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: Pool<Postgres>,
}

impl PgUserDirectory {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert an account. Used by provisioning scripts and tests.
    pub async fn create_user(
        &self,
        name: &str,
        phone: Option<&str>,
        role: UserRole,
    ) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO app_user (id, name, phone, role) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(name)
            .bind(phone)
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(id)
    }

    /// Register an already-issued token for a user. Only its hash is kept.
    pub async fn register_token(&self, user_id: Uuid, token: &str) -> Result<()> {
        sqlx::query("INSERT INTO api_token (token_hash, user_id) VALUES ($1, $2)")
            .bind(hash_token(token))
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    pub async fn set_active(&self, user_id: Uuid, active: bool) -> Result<()> {
        sqlx::query("UPDATE app_user SET active = $1 WHERE id = $2")
            .bind(active)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl AdminDirectory for PgUserDirectory {
    async fn list_active_admins(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM app_user WHERE role = 'admin' AND active ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

#[async_trait]
impl IdentityProvider for PgUserDirectory {
    async fn authenticate(&self, token: &str) -> Result<Principal> {
        let row = sqlx::query(
            "SELECT u.id, u.role FROM api_token t
             JOIN app_user u ON u.id = t.user_id
             WHERE t.token_hash = $1 AND t.revoked_at IS NULL AND u.active",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::Unauthorized("invalid or revoked token".to_string()))?;

        let role: String = row.get("role");
        Ok(Principal {
            user_id: row.get("id"),
            role: role.parse()?,
        })
    }

    async fn profile(&self, user_id: Uuid) -> Result<UserProfile> {
        let row = sqlx::query("SELECT id, name, phone, role, active FROM app_user WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("User {} not found", user_id)))?;

        let role: String = row.get("role");
        Ok(UserProfile {
            id: row.get("id"),
            name: row.get("name"),
            phone: row.get("phone"),
            role: role.parse()?,
            active: row.get("active"),
        })
    }
}
