//! Storage layer - SQLite
//!
//! Provides database management and migrations for infragraph.
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//!
//! # Usage
//!
//! ```ignore
//! use infragraph_core::storage::Database;
//! use infragraph_core::infrastructure::SqliteGraphStorage;
//!
//! let db = Database::in_memory().await?;
//! let storage = SqliteGraphStorage::new(db.pool().clone());
//! ```

pub mod database;
pub mod migrations;

pub use database::{Database, DatabaseConfig, default_database_path};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
