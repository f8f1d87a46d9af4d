//! SQLite pool for the graph store

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::debug;

use crate::config::StorageConfig;
use crate::storage::migrations::{self, MigrationStatus};

/// Default maximum connections in the pool
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MEMORY_PATH: &str = ":memory:";

/// Where the graph lives and how the pool is shaped
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    /// Apply pending migrations on open
    pub auto_migrate: bool,
}

impl DatabaseConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_migrate: true,
        }
    }

    /// Pool settings from the `[storage]` config section
    pub fn from_storage(storage: &StorageConfig) -> Self {
        Self::with_path(&storage.database_path).max_connections(storage.max_connections)
    }

    /// A private in-memory graph
    ///
    /// Limited to one connection: each SQLite connection opened on
    /// `:memory:` sees its own empty database.
    pub fn in_memory() -> Self {
        Self::with_path(MEMORY_PATH).max_connections(1)
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn is_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.is_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::with_path(default_database_path())
    }
}

/// `<data dir>/infragraph/graph.db`, or `./infragraph.db` when the platform
/// has no data directory
pub fn default_database_path() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join("infragraph").join("graph.db"),
        None => PathBuf::from("infragraph.db"),
    }
}

/// Connection pool over the graph database
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    /// Open (creating if needed) the database described by `config`
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if !config.is_memory() {
            if let Some(dir) = config.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create database directory: {}", dir.display()))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to open graph database: {}", config.path.display()))?;
        debug!(
            path = %config.path.display(),
            max_connections = config.max_connections,
            "Graph database opened"
        );

        let db = Self { pool, config };
        if db.config.auto_migrate {
            db.migrate().await?;
        }
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to migrate graph schema")
    }

    pub async fn migration_status(&self) -> Result<MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to read graph schema version")
    }

    /// Round-trip a trivial query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Graph database is not answering")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::in_memory().await.unwrap();
        db.health_check().await.unwrap();

        let status = db.migration_status().await.unwrap();
        assert!(!status.needs_migration);
    }

    #[test]
    fn test_config_from_storage_section() {
        let storage = StorageConfig {
            database_path: PathBuf::from("/tmp/graph.db"),
            max_connections: 0,
        };
        let config = DatabaseConfig::from_storage(&storage).no_migrate();

        assert_eq!(config.path, PathBuf::from("/tmp/graph.db"));
        assert_eq!(config.max_connections, 1);
        assert!(!config.auto_migrate);
        assert!(!config.is_memory());
        assert!(DatabaseConfig::in_memory().is_memory());
    }

    #[tokio::test]
    async fn test_on_disk_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");

        let db = Database::new(DatabaseConfig::with_path(&path)).await.unwrap();
        db.health_check().await.unwrap();
        assert!(path.exists());
        db.close().await;
    }

    #[tokio::test]
    async fn test_unmigrated_database_reports_pending() {
        let db = Database::new(DatabaseConfig::in_memory().no_migrate()).await.unwrap();
        assert!(db.migration_status().await.unwrap().needs_migration);

        db.migrate().await.unwrap();
        assert!(!db.migration_status().await.unwrap().needs_migration);
    }
}
