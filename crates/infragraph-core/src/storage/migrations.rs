//! Database migrations
//!
//! This module manages SQLite schema migrations for infragraph.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Nodes, edges and the change ledger
///
/// Timestamps are RFC3339 strings with fixed microsecond precision so that
/// string comparison orders them chronologically.
const MIGRATION_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS graph_nodes (
        id TEXT PRIMARY KEY NOT NULL,
        provider TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        native_id TEXT NOT NULL,
        name TEXT NOT NULL,
        region TEXT NOT NULL DEFAULT '',
        account TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'unknown',
        tags TEXT NOT NULL DEFAULT '{}',
        metadata TEXT NOT NULL DEFAULT '{}',
        cost_monthly REAL,
        owner TEXT,
        discovered_at TEXT NOT NULL,
        created_at TEXT,
        updated_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_graph_nodes_provider ON graph_nodes(provider);
    CREATE INDEX IF NOT EXISTS idx_graph_nodes_native_id ON graph_nodes(provider, native_id);
    CREATE INDEX IF NOT EXISTS idx_graph_nodes_resource_type ON graph_nodes(resource_type);
    CREATE INDEX IF NOT EXISTS idx_graph_nodes_status ON graph_nodes(status);
    CREATE INDEX IF NOT EXISTS idx_graph_nodes_last_seen ON graph_nodes(last_seen_at);

    -- Edges may point at nodes another provider has not reported yet,
    -- so endpoints are not foreign keys.
    CREATE TABLE IF NOT EXISTS graph_edges (
        id TEXT PRIMARY KEY NOT NULL,
        source_node_id TEXT NOT NULL,
        target_node_id TEXT NOT NULL,
        relationship_type TEXT NOT NULL,
        confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
        discovered_via TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL,
        UNIQUE(source_node_id, target_node_id, relationship_type)
    );

    CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source_node_id);
    CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_node_id);
    CREATE INDEX IF NOT EXISTS idx_graph_edges_type ON graph_edges(relationship_type);
    CREATE INDEX IF NOT EXISTS idx_graph_edges_last_seen ON graph_edges(last_seen_at);

    -- Append-only ledger; seq defines detection order
    CREATE TABLE IF NOT EXISTS graph_changes (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        target_id TEXT NOT NULL,
        change_type TEXT NOT NULL,
        field TEXT,
        previous_value TEXT,
        new_value TEXT,
        detected_at TEXT NOT NULL,
        detected_via TEXT NOT NULL,
        correlation_id TEXT,
        initiator TEXT,
        metadata TEXT NOT NULL DEFAULT '{}'
    );

    CREATE INDEX IF NOT EXISTS idx_graph_changes_target ON graph_changes(target_id);
    CREATE INDEX IF NOT EXISTS idx_graph_changes_correlation ON graph_changes(correlation_id);
    CREATE INDEX IF NOT EXISTS idx_graph_changes_detected_at ON graph_changes(detected_at);
"#;

/// Migration 2: Groups and sync records
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS graph_groups (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        group_type TEXT NOT NULL,
        description TEXT,
        owner TEXT,
        tags TEXT NOT NULL DEFAULT '{}',
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_graph_groups_name ON graph_groups(name);

    CREATE TABLE IF NOT EXISTS graph_group_members (
        group_id TEXT NOT NULL REFERENCES graph_groups(id) ON DELETE CASCADE,
        node_id TEXT NOT NULL REFERENCES graph_nodes(id) ON DELETE CASCADE,
        added_at TEXT NOT NULL,
        PRIMARY KEY (group_id, node_id)
    );

    CREATE INDEX IF NOT EXISTS idx_graph_group_members_node ON graph_group_members(node_id);

    CREATE TABLE IF NOT EXISTS sync_records (
        id TEXT PRIMARY KEY NOT NULL,
        provider TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('pending', 'running', 'completed', 'failed', 'partial')),
        started_at TEXT NOT NULL,
        completed_at TEXT,
        nodes_discovered INTEGER NOT NULL DEFAULT 0,
        nodes_created INTEGER NOT NULL DEFAULT 0,
        nodes_updated INTEGER NOT NULL DEFAULT 0,
        nodes_disappeared INTEGER NOT NULL DEFAULT 0,
        edges_discovered INTEGER NOT NULL DEFAULT 0,
        edges_created INTEGER NOT NULL DEFAULT 0,
        errors TEXT NOT NULL DEFAULT '[]',
        duration_ms INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_sync_records_provider ON sync_records(provider, started_at);
"#;

/// Get the current schema version
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Graph nodes, edges and change ledger");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Groups and sync records");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

/// Check migration status without applying anything
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}
