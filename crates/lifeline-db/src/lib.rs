//! # lifeline-db
//!
//! Storage layer for the Lifeline SOS engine.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for contacts, SOS events, notifications, and users
//! - [`MemoryStore`], an in-memory implementation of the same traits
//!
//! ## Example
//!
//! ```rust,ignore
//! use lifeline_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/lifeline").await?;
//!     db.migrate().await?;
//!     let repos = db.repositories();
//!     let admins = repos.admins.list_active_admins().await?;
//!     println!("{} admins on duty", admins.len());
//!     Ok(())
//! }
//! ```

pub mod contacts;
pub mod memory;
pub mod notifications;
pub mod pool;
pub mod sos_events;
pub mod users;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use std::sync::Arc;

// Re-export core types
pub use lifeline_core::*;

pub use contacts::PgContactRepository;
pub use memory::MemoryStore;
pub use notifications::PgNotificationRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use sos_events::PgSosEventRepository;
pub use users::{hash_token, PgUserDirectory};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub contacts: PgContactRepository,
    pub events: PgSosEventRepository,
    pub notifications: PgNotificationRepository,
    pub users: PgUserDirectory,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            contacts: PgContactRepository::new(pool.clone()),
            events: PgSosEventRepository::new(pool.clone()),
            notifications: PgNotificationRepository::new(pool.clone()),
            users: PgUserDirectory::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Trait-object handles for services.
    pub fn repositories(&self) -> Repositories {
        let users = Arc::new(self.users.clone());
        Repositories {
            contacts: Arc::new(self.contacts.clone()),
            events: Arc::new(self.events.clone()),
            notifications: Arc::new(self.notifications.clone()),
            admins: users.clone(),
            identity: users,
        }
    }
}
