//! SQLite connection management and embedded migrations

use crate::error::{FoundryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub type DatabasePool = SqlitePool;

#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<DatabasePool>,
}

impl Database {
    /// Open (creating if needed) the database file at `database_path`
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    FoundryError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        debug!(path = %path.display(), "Connecting to database");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| FoundryError::Database(format!("Failed to connect to database: {}", e)))?;

        info!(path = %path.display(), "Database connection established");
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same memory store.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| FoundryError::Database(format!("Failed to open in-memory database: {}", e)))?;
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Apply the migrations embedded from `./migrations`
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| FoundryError::Database(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| FoundryError::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }

    /// Open and migrate
    pub async fn initialize<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let db = Self::new(database_path).await?;
        db.run_migrations().await?;
        Ok(db)
    }
}
