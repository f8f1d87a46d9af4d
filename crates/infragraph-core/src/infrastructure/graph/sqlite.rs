//! SQLite implementation of GraphStorage
//!
//! Reads go straight to the pool. Every write runs inside a transaction
//! while holding `write_lock`, so the compare-and-write of an upsert is
//! atomic even when the pool has several connections.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::graph::storage::{sort_buckets, validate_edge_input, validate_node_input};
use crate::domain::graph::{
    ChangeFilter, ChangeType, CloudProvider, DiscoveryMethod, EdgeUpsert, GraphChange,
    GraphChangeInput, GraphEdge, GraphEdgeInput, GraphGroup, GraphNode, GraphNodeInput,
    GraphStats, GraphStorage, GroupType, NodeFilter, NodeStatus, NodeUpsert, RelationshipType,
    ResourceType, SyncRecord, SyncStatus, TraversalDirection, format_timestamp, timestamp_now,
};
use crate::error::{Error, Result};

/// SQLite implementation of the graph storage
#[derive(Clone)]
pub struct SqliteGraphStorage {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteGraphStorage {
    /// Create a storage over an already-migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl GraphStorage for SqliteGraphStorage {
    // ========== Node Operations ==========

    async fn upsert_node(&self, input: &GraphNodeInput) -> Result<NodeUpsert> {
        validate_node_input(input)?;
        let id = input.id();

        let _guard = self.write_lock.lock().await;
        let now = timestamp_now();
        let mut tx = self.pool.begin().await?;

        let previous = fetch_node(&mut *tx, &id).await?;
        let (node, changed) = match &previous {
            Some(existing) => {
                let mut node = existing.clone();
                let changed = node.merge_input(input, now);
                (node, changed)
            }
            None => (GraphNode::from_input(input, now), true),
        };

        write_node(&mut tx, &node).await?;
        tx.commit().await?;

        debug!(
            node_id = %node.id,
            created = previous.is_none(),
            changed = changed,
            "Node upserted"
        );
        Ok(NodeUpsert {
            node,
            previous,
            changed,
        })
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        fetch_node(&self.pool, id).await
    }

    async fn get_node_by_native_id(
        &self,
        provider: CloudProvider,
        native_id: &str,
    ) -> Result<Option<GraphNode>> {
        let row: Option<NodeRow> = sqlx::query_as(
            "SELECT * FROM graph_nodes WHERE provider = ? AND native_id = ? ORDER BY id LIMIT 1",
        )
        .bind(provider.as_str())
        .bind(native_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NodeRow::into_node).transpose()
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>> {
        // Narrow on indexed columns in SQL; the shared matcher decides the rest
        let mut sql = String::from("SELECT * FROM graph_nodes WHERE 1 = 1");
        if filter.provider.is_some() {
            sql.push_str(" AND provider = ?");
        }
        if filter.region.is_some() {
            sql.push_str(" AND region = ?");
        }
        if filter.account.is_some() {
            sql.push_str(" AND account = ?");
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query_as::<_, NodeRow>(&sql);
        if let Some(provider) = filter.provider {
            query = query.bind(provider.as_str());
        }
        if let Some(region) = &filter.region {
            query = query.bind(region);
        }
        if let Some(account) = &filter.account {
            query = query.bind(account);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let node = row.into_node()?;
            if filter.matches(&node) {
                nodes.push(node);
            }
        }
        Ok(filter.paginate(nodes))
    }

    async fn delete_node(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let deleted = remove_node(&mut tx, id).await?;
        tx.commit().await?;

        if deleted {
            info!(node_id = %id, "Node deleted");
        }
        Ok(deleted)
    }

    async fn mark_nodes_disappeared(
        &self,
        older_than: DateTime<Utc>,
        provider: Option<CloudProvider>,
    ) -> Result<Vec<String>> {
        let mut sql = String::from(
            "SELECT id FROM graph_nodes WHERE status != 'disappeared' AND last_seen_at < ?",
        );
        if provider.is_some() {
            sql.push_str(" AND provider = ?");
        }
        sql.push_str(" ORDER BY id");

        let _guard = self.write_lock.lock().await;
        let now = timestamp_now();
        let mut tx = self.pool.begin().await?;

        let mut query = sqlx::query_as::<_, (String,)>(&sql).bind(format_timestamp(&older_than));
        if let Some(provider) = provider {
            query = query.bind(provider.as_str());
        }
        let ids: Vec<String> = query
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|(id,)| id)
            .collect();

        for id in &ids {
            sqlx::query("UPDATE graph_nodes SET status = ?, updated_at = ? WHERE id = ?")
                .bind(NodeStatus::Disappeared.as_str())
                .bind(format_timestamp(&now))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        if !ids.is_empty() {
            info!(
                count = ids.len(),
                provider = provider.map(|p| p.as_str()).unwrap_or("all"),
                "Nodes marked disappeared"
            );
        }
        Ok(ids)
    }

    async fn purge_disappeared_nodes(&self, older_than: DateTime<Utc>) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> = sqlx::query_as::<_, (String,)>(
            "SELECT id FROM graph_nodes WHERE status = 'disappeared' AND last_seen_at < ? ORDER BY id",
        )
        .bind(format_timestamp(&older_than))
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

        for id in &ids {
            remove_node(&mut tx, id).await?;
        }
        tx.commit().await?;

        if !ids.is_empty() {
            info!(count = ids.len(), "Disappeared nodes purged");
        }
        Ok(ids)
    }

    // ========== Edge Operations ==========

    async fn upsert_edge(&self, input: &GraphEdgeInput) -> Result<EdgeUpsert> {
        validate_edge_input(input)?;
        let id = input.key().edge_id();

        let _guard = self.write_lock.lock().await;
        let now = timestamp_now();
        let mut tx = self.pool.begin().await?;

        let existing = fetch_edge(&mut *tx, &id).await?;
        let created = existing.is_none();
        let edge = match existing {
            Some(mut edge) => {
                edge.reconfirm(input, now);
                edge
            }
            None => GraphEdge::from_input(input, now),
        };

        write_edge(&mut tx, &edge).await?;
        tx.commit().await?;

        debug!(
            edge_id = %edge.id,
            source = %edge.source_node_id,
            target = %edge.target_node_id,
            relationship = %edge.relationship_type,
            created = created,
            "Edge upserted"
        );
        Ok(EdgeUpsert { edge, created })
    }

    async fn get_edge(&self, id: &str) -> Result<Option<GraphEdge>> {
        fetch_edge(&self.pool, id).await
    }

    async fn delete_edge(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM graph_edges WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(edge_id = %id, "Edge deleted");
        }
        Ok(deleted)
    }

    async fn get_edges_for_node(
        &self,
        node_id: &str,
        direction: TraversalDirection,
        relationship_type: Option<RelationshipType>,
    ) -> Result<Vec<GraphEdge>> {
        let mut sql = String::from("SELECT * FROM graph_edges WHERE ");
        sql.push_str(match direction {
            TraversalDirection::Upstream => "target_node_id = ?",
            TraversalDirection::Downstream => "source_node_id = ?",
            TraversalDirection::Both => "(source_node_id = ? OR target_node_id = ?)",
        });
        if relationship_type.is_some() {
            sql.push_str(" AND relationship_type = ?");
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query_as::<_, EdgeRow>(&sql).bind(node_id);
        if direction == TraversalDirection::Both {
            query = query.bind(node_id);
        }
        if let Some(rt) = relationship_type {
            query = query.bind(rt.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(EdgeRow::into_edge).collect()
    }

    async fn list_edges(&self) -> Result<Vec<GraphEdge>> {
        let rows: Vec<EdgeRow> = sqlx::query_as("SELECT * FROM graph_edges ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(EdgeRow::into_edge).collect()
    }

    async fn delete_stale_edges(&self, older_than: DateTime<Utc>) -> Result<Vec<GraphEdge>> {
        let cutoff = format_timestamp(&older_than);
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let rows: Vec<EdgeRow> =
            sqlx::query_as("SELECT * FROM graph_edges WHERE last_seen_at < ? ORDER BY id")
                .bind(&cutoff)
                .fetch_all(&mut *tx)
                .await?;
        sqlx::query("DELETE FROM graph_edges WHERE last_seen_at < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let removed = rows
            .into_iter()
            .map(EdgeRow::into_edge)
            .collect::<Result<Vec<_>>>()?;
        if !removed.is_empty() {
            info!(count = removed.len(), "Stale edges deleted");
        }
        Ok(removed)
    }

    // ========== Change Ledger ==========

    async fn append_change(&self, input: GraphChangeInput) -> Result<GraphChange> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let change = insert_change(&mut tx, input).await?;
        tx.commit().await?;
        Ok(change)
    }

    async fn append_changes(&self, inputs: Vec<GraphChangeInput>) -> Result<Vec<GraphChange>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut changes = Vec::with_capacity(inputs.len());
        for input in inputs {
            changes.push(insert_change(&mut tx, input).await?);
        }
        tx.commit().await?;

        debug!(count = changes.len(), "Changes appended");
        Ok(changes)
    }

    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<GraphChange>> {
        let rows: Vec<ChangeRow> = match &filter.target_id {
            Some(target) => {
                sqlx::query_as("SELECT * FROM graph_changes WHERE target_id = ? ORDER BY seq")
                    .bind(target)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM graph_changes ORDER BY seq")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut changes = Vec::new();
        for row in rows {
            let change = row.into_change()?;
            if filter.matches(&change) {
                changes.push(change);
                if filter.limit.is_some_and(|limit| changes.len() >= limit) {
                    break;
                }
            }
        }
        Ok(changes)
    }

    // ========== Groups ==========

    async fn upsert_group(&self, group: &GraphGroup) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO graph_groups (
                id, name, group_type, description, owner, tags, metadata, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                group_type = excluded.group_type,
                description = excluded.description,
                owner = excluded.owner,
                tags = excluded.tags,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(group.group_type.as_str())
        .bind(&group.description)
        .bind(&group.owner)
        .bind(serde_json::to_string(&group.tags)?)
        .bind(serde_json::to_string(&group.metadata)?)
        .bind(format_timestamp(&group.created_at))
        .bind(format_timestamp(&group.updated_at))
        .execute(&self.pool)
        .await?;

        debug!(group_id = %group.id, group_name = %group.name, "Group saved");
        Ok(())
    }

    async fn get_group(&self, id: &str) -> Result<Option<GraphGroup>> {
        let row: Option<GroupRow> = sqlx::query_as("SELECT * FROM graph_groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(GroupRow::into_group).transpose()
    }

    async fn list_groups(&self) -> Result<Vec<GraphGroup>> {
        let rows: Vec<GroupRow> = sqlx::query_as("SELECT * FROM graph_groups ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(GroupRow::into_group).collect()
    }

    async fn delete_group(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM graph_group_members WHERE group_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM graph_groups WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_group_member(&self, group_id: &str, node_id: &str) -> Result<()> {
        if self.get_group(group_id).await?.is_none() {
            return Err(Error::GroupNotFound(group_id.to_string()));
        }
        if self.get_node(node_id).await?.is_none() {
            return Err(Error::NodeNotFound(node_id.to_string()));
        }

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT OR IGNORE INTO graph_group_members (group_id, node_id, added_at) VALUES (?, ?, ?)",
        )
        .bind(group_id)
        .bind(node_id)
        .bind(format_timestamp(&timestamp_now()))
        .execute(&self.pool)
        .await?;

        debug!(group_id = %group_id, node_id = %node_id, "Group member added");
        Ok(())
    }

    async fn remove_group_member(&self, group_id: &str, node_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM graph_group_members WHERE group_id = ? AND node_id = ?")
            .bind(group_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<GraphNode>> {
        let rows: Vec<NodeRow> = sqlx::query_as(
            r#"
            SELECT n.* FROM graph_nodes n
            JOIN graph_group_members m ON m.node_id = n.id
            WHERE m.group_id = ?
            ORDER BY n.id
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NodeRow::into_node).collect()
    }

    async fn get_groups_for_node(&self, node_id: &str) -> Result<Vec<GraphGroup>> {
        let rows: Vec<GroupRow> = sqlx::query_as(
            r#"
            SELECT g.* FROM graph_groups g
            JOIN graph_group_members m ON m.group_id = g.id
            WHERE m.node_id = ?
            ORDER BY g.name, g.id
            "#,
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(GroupRow::into_group).collect()
    }

    // ========== Sync Records ==========

    async fn save_sync_record(&self, record: &SyncRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO sync_records (
                id, provider, status, started_at, completed_at,
                nodes_discovered, nodes_created, nodes_updated, nodes_disappeared,
                edges_discovered, edges_created, errors, duration_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                nodes_discovered = excluded.nodes_discovered,
                nodes_created = excluded.nodes_created,
                nodes_updated = excluded.nodes_updated,
                nodes_disappeared = excluded.nodes_disappeared,
                edges_discovered = excluded.edges_discovered,
                edges_created = excluded.edges_created,
                errors = excluded.errors,
                duration_ms = excluded.duration_ms
            "#,
        )
        .bind(&record.id)
        .bind(record.provider.as_str())
        .bind(record.status.as_str())
        .bind(format_timestamp(&record.started_at))
        .bind(record.completed_at.as_ref().map(format_timestamp))
        .bind(record.nodes_discovered as i64)
        .bind(record.nodes_created as i64)
        .bind(record.nodes_updated as i64)
        .bind(record.nodes_disappeared as i64)
        .bind(record.edges_discovered as i64)
        .bind(record.edges_created as i64)
        .bind(serde_json::to_string(&record.errors)?)
        .bind(record.duration_ms.map(|d| d as i64))
        .execute(&self.pool)
        .await?;

        debug!(sync_id = %record.id, status = %record.status, "Sync record saved");
        Ok(())
    }

    async fn get_sync_record(&self, id: &str) -> Result<Option<SyncRecord>> {
        let row: Option<SyncRecordRow> = sqlx::query_as("SELECT * FROM sync_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncRecordRow::into_record).transpose()
    }

    async fn list_sync_records(
        &self,
        provider: Option<CloudProvider>,
        limit: usize,
    ) -> Result<Vec<SyncRecord>> {
        let rows: Vec<SyncRecordRow> = match provider {
            Some(provider) => {
                sqlx::query_as(
                    "SELECT * FROM sync_records WHERE provider = ? ORDER BY started_at DESC, id DESC LIMIT ?",
                )
                .bind(provider.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM sync_records ORDER BY started_at DESC, id DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(SyncRecordRow::into_record).collect()
    }

    // ========== Statistics ==========

    async fn get_stats(&self) -> Result<GraphStats> {
        let (total_nodes,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM graph_nodes")
            .fetch_one(&self.pool)
            .await?;
        let (total_edges,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM graph_edges")
            .fetch_one(&self.pool)
            .await?;
        let (total_changes,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM graph_changes")
            .fetch_one(&self.pool)
            .await?;
        let (total_groups,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM graph_groups")
            .fetch_one(&self.pool)
            .await?;

        let provider_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT provider, COUNT(*) FROM graph_nodes GROUP BY provider")
                .fetch_all(&self.pool)
                .await?;
        let mut nodes_by_provider = provider_rows
            .into_iter()
            .map(|(p, count)| Ok((parse_provider(&p)?, count as u64)))
            .collect::<Result<Vec<_>>>()?;
        sort_buckets(&mut nodes_by_provider);

        let type_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT resource_type, COUNT(*) FROM graph_nodes GROUP BY resource_type",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut nodes_by_resource_type = type_rows
            .into_iter()
            .map(|(rt, count)| Ok((parse_resource_type(&rt)?, count as u64)))
            .collect::<Result<Vec<_>>>()?;
        sort_buckets(&mut nodes_by_resource_type);

        let edge_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT relationship_type, COUNT(*) FROM graph_edges GROUP BY relationship_type",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut edges_by_relationship_type = edge_rows
            .into_iter()
            .map(|(rt, count)| Ok((parse_relationship_type(&rt)?, count as u64)))
            .collect::<Result<Vec<_>>>()?;
        sort_buckets(&mut edges_by_relationship_type);

        let (total_cost_monthly,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(cost_monthly), 0.0) FROM graph_nodes WHERE status != 'disappeared'",
        )
        .fetch_one(&self.pool)
        .await?;

        let (last_sync,): (Option<String>,) =
            sqlx::query_as("SELECT MAX(completed_at) FROM sync_records")
                .fetch_one(&self.pool)
                .await?;
        let last_sync_at = last_sync
            .as_deref()
            .map(|s| parse_timestamp(s, "completed_at"))
            .transpose()?;

        Ok(GraphStats {
            total_nodes: total_nodes as u64,
            total_edges: total_edges as u64,
            total_changes: total_changes as u64,
            total_groups: total_groups as u64,
            nodes_by_provider,
            nodes_by_resource_type,
            edges_by_relationship_type,
            total_cost_monthly,
            last_sync_at,
        })
    }
}

// ========== Statement Helpers ==========

async fn fetch_node<'e, E>(executor: E, id: &str) -> Result<Option<GraphNode>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<NodeRow> = sqlx::query_as("SELECT * FROM graph_nodes WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    row.map(NodeRow::into_node).transpose()
}

async fn fetch_edge<'e, E>(executor: E, id: &str) -> Result<Option<GraphEdge>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<EdgeRow> = sqlx::query_as("SELECT * FROM graph_edges WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    row.map(EdgeRow::into_edge).transpose()
}

async fn write_node(conn: &mut SqliteConnection, node: &GraphNode) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO graph_nodes (
            id, provider, resource_type, native_id, name, region, account, status,
            tags, metadata, cost_monthly, owner,
            discovered_at, created_at, updated_at, last_seen_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            status = excluded.status,
            tags = excluded.tags,
            metadata = excluded.metadata,
            cost_monthly = excluded.cost_monthly,
            owner = excluded.owner,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            last_seen_at = excluded.last_seen_at
        "#,
    )
    .bind(&node.id)
    .bind(node.provider.as_str())
    .bind(node.resource_type.as_str())
    .bind(&node.native_id)
    .bind(&node.name)
    .bind(&node.region)
    .bind(&node.account)
    .bind(node.status.as_str())
    .bind(serde_json::to_string(&node.tags)?)
    .bind(serde_json::to_string(&node.metadata)?)
    .bind(node.cost_monthly)
    .bind(&node.owner)
    .bind(format_timestamp(&node.discovered_at))
    .bind(node.created_at.as_ref().map(format_timestamp))
    .bind(format_timestamp(&node.updated_at))
    .bind(format_timestamp(&node.last_seen_at))
    .execute(conn)
    .await?;
    Ok(())
}

async fn write_edge(conn: &mut SqliteConnection, edge: &GraphEdge) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO graph_edges (
            id, source_node_id, target_node_id, relationship_type,
            confidence, discovered_via, metadata, created_at, last_seen_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            confidence = excluded.confidence,
            discovered_via = excluded.discovered_via,
            metadata = excluded.metadata,
            last_seen_at = excluded.last_seen_at
        "#,
    )
    .bind(&edge.id)
    .bind(&edge.source_node_id)
    .bind(&edge.target_node_id)
    .bind(edge.relationship_type.as_str())
    .bind(edge.confidence)
    .bind(edge.discovered_via.as_str())
    .bind(serde_json::to_string(&edge.metadata)?)
    .bind(format_timestamp(&edge.created_at))
    .bind(format_timestamp(&edge.last_seen_at))
    .execute(conn)
    .await?;
    Ok(())
}

/// Delete a node with its edges and memberships; the caller owns the transaction
async fn remove_node(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    sqlx::query("DELETE FROM graph_edges WHERE source_node_id = ? OR target_node_id = ?")
        .bind(id)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM graph_group_members WHERE node_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("DELETE FROM graph_nodes WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

async fn insert_change(conn: &mut SqliteConnection, input: GraphChangeInput) -> Result<GraphChange> {
    let id = Uuid::new_v4().to_string();
    let detected_at = timestamp_now();

    let result = sqlx::query(
        r#"
        INSERT INTO graph_changes (
            id, target_id, change_type, field, previous_value, new_value,
            detected_at, detected_via, correlation_id, initiator, metadata
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&input.target_id)
    .bind(input.change_type.as_str())
    .bind(&input.field)
    .bind(&input.previous_value)
    .bind(&input.new_value)
    .bind(format_timestamp(&detected_at))
    .bind(&input.detected_via)
    .bind(&input.correlation_id)
    .bind(&input.initiator)
    .bind(serde_json::to_string(&input.metadata)?)
    .execute(conn)
    .await?;

    Ok(input.into_change(id, result.last_insert_rowid(), detected_at))
}

// ========== Database Row Types ==========

fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CorruptRecord(format!("invalid {} '{}': {}", field, value, e)))
}

fn parse_json<T: DeserializeOwned>(value: &str, field: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::CorruptRecord(format!("invalid {} JSON: {}", field, e)))
}

fn parse_provider(value: &str) -> Result<CloudProvider> {
    CloudProvider::parse(value)
        .ok_or_else(|| Error::CorruptRecord(format!("unknown provider: {}", value)))
}

fn parse_resource_type(value: &str) -> Result<ResourceType> {
    ResourceType::parse(value)
        .ok_or_else(|| Error::CorruptRecord(format!("unknown resource type: {}", value)))
}

fn parse_relationship_type(value: &str) -> Result<RelationshipType> {
    RelationshipType::parse(value)
        .ok_or_else(|| Error::CorruptRecord(format!("unknown relationship type: {}", value)))
}

#[derive(Debug, FromRow)]
struct NodeRow {
    id: String,
    provider: String,
    resource_type: String,
    native_id: String,
    name: String,
    region: String,
    account: String,
    status: String,
    tags: String,
    metadata: String,
    cost_monthly: Option<f64>,
    owner: Option<String>,
    discovered_at: String,
    created_at: Option<String>,
    updated_at: String,
    last_seen_at: String,
}

impl NodeRow {
    fn into_node(self) -> Result<GraphNode> {
        let status = NodeStatus::parse(&self.status)
            .ok_or_else(|| Error::CorruptRecord(format!("unknown node status: {}", self.status)))?;
        let tags: BTreeMap<String, String> = parse_json(&self.tags, "tags")?;
        let metadata: BTreeMap<String, Value> = parse_json(&self.metadata, "metadata")?;

        Ok(GraphNode {
            provider: parse_provider(&self.provider)?,
            resource_type: parse_resource_type(&self.resource_type)?,
            status,
            tags,
            metadata,
            discovered_at: parse_timestamp(&self.discovered_at, "discovered_at")?,
            created_at: self
                .created_at
                .as_deref()
                .map(|s| parse_timestamp(s, "created_at"))
                .transpose()?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
            last_seen_at: parse_timestamp(&self.last_seen_at, "last_seen_at")?,
            id: self.id,
            native_id: self.native_id,
            name: self.name,
            region: self.region,
            account: self.account,
            cost_monthly: self.cost_monthly,
            owner: self.owner,
        })
    }
}

#[derive(Debug, FromRow)]
struct EdgeRow {
    id: String,
    source_node_id: String,
    target_node_id: String,
    relationship_type: String,
    confidence: f64,
    discovered_via: String,
    metadata: String,
    created_at: String,
    last_seen_at: String,
}

impl EdgeRow {
    fn into_edge(self) -> Result<GraphEdge> {
        let discovered_via = DiscoveryMethod::parse(&self.discovered_via).ok_or_else(|| {
            Error::CorruptRecord(format!("unknown discovery method: {}", self.discovered_via))
        })?;

        Ok(GraphEdge {
            relationship_type: parse_relationship_type(&self.relationship_type)?,
            discovered_via,
            metadata: parse_json(&self.metadata, "metadata")?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            last_seen_at: parse_timestamp(&self.last_seen_at, "last_seen_at")?,
            id: self.id,
            source_node_id: self.source_node_id,
            target_node_id: self.target_node_id,
            confidence: self.confidence,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChangeRow {
    seq: i64,
    id: String,
    target_id: String,
    change_type: String,
    field: Option<String>,
    previous_value: Option<String>,
    new_value: Option<String>,
    detected_at: String,
    detected_via: String,
    correlation_id: Option<String>,
    initiator: Option<String>,
    metadata: String,
}

impl ChangeRow {
    fn into_change(self) -> Result<GraphChange> {
        let change_type = ChangeType::parse(&self.change_type)
            .ok_or_else(|| Error::CorruptRecord(format!("unknown change type: {}", self.change_type)))?;

        Ok(GraphChange {
            id: self.id,
            sequence: self.seq,
            target_id: self.target_id,
            change_type,
            field: self.field,
            previous_value: self.previous_value,
            new_value: self.new_value,
            detected_at: parse_timestamp(&self.detected_at, "detected_at")?,
            detected_via: self.detected_via,
            correlation_id: self.correlation_id,
            initiator: self.initiator,
            metadata: parse_json(&self.metadata, "metadata")?,
        })
    }
}

#[derive(Debug, FromRow)]
struct GroupRow {
    id: String,
    name: String,
    group_type: String,
    description: Option<String>,
    owner: Option<String>,
    tags: String,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl GroupRow {
    fn into_group(self) -> Result<GraphGroup> {
        let group_type = GroupType::parse(&self.group_type)
            .ok_or_else(|| Error::CorruptRecord(format!("unknown group type: {}", self.group_type)))?;

        Ok(GraphGroup {
            id: self.id,
            name: self.name,
            group_type,
            description: self.description,
            owner: self.owner,
            tags: parse_json(&self.tags, "tags")?,
            metadata: parse_json(&self.metadata, "metadata")?,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SyncRecordRow {
    id: String,
    provider: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    nodes_discovered: i64,
    nodes_created: i64,
    nodes_updated: i64,
    nodes_disappeared: i64,
    edges_discovered: i64,
    edges_created: i64,
    errors: String,
    duration_ms: Option<i64>,
}

impl SyncRecordRow {
    fn into_record(self) -> Result<SyncRecord> {
        let status = SyncStatus::parse(&self.status)
            .ok_or_else(|| Error::CorruptRecord(format!("unknown sync status: {}", self.status)))?;

        Ok(SyncRecord {
            id: self.id,
            provider: parse_provider(&self.provider)?,
            status,
            started_at: parse_timestamp(&self.started_at, "started_at")?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|s| parse_timestamp(s, "completed_at"))
                .transpose()?,
            nodes_discovered: self.nodes_discovered as u64,
            nodes_created: self.nodes_created as u64,
            nodes_updated: self.nodes_updated as u64,
            nodes_disappeared: self.nodes_disappeared as u64,
            edges_discovered: self.edges_discovered as u64,
            edges_created: self.edges_created as u64,
            errors: parse_json(&self.errors, "errors")?,
            duration_ms: self.duration_ms.map(|d| d as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::run_migrations;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteGraphStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool).await.expect("Failed to run migrations");

        SqliteGraphStorage::new(pool)
    }

    fn vpc(native_id: &str) -> GraphNodeInput {
        GraphNodeInput::new(CloudProvider::Aws, ResourceType::Vpc, native_id)
            .with_location("111122223333", "us-east-1")
            .with_status(NodeStatus::Running)
            .with_tag("env", "prod")
            .with_metadata("cidrBlock", json!("10.0.0.0/16"))
    }

    #[tokio::test]
    async fn test_upsert_and_get_node() {
        let storage = setup_test_db().await;
        let input = vpc("vpc-1").with_cost(12.5).with_owner("network");

        let result = storage.upsert_node(&input).await.unwrap();
        assert!(result.is_created());
        assert!(result.changed);

        let stored = storage.get_node(&input.id()).await.unwrap().unwrap();
        assert_eq!(stored, result.node);
        assert_eq!(stored.metadata_str("cidrBlock"), Some("10.0.0.0/16"));
        assert_eq!(stored.cost_monthly, Some(12.5));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let storage = setup_test_db().await;
        let input = vpc("vpc-1");

        let first = storage.upsert_node(&input).await.unwrap();
        let second = storage.upsert_node(&input).await.unwrap();

        assert!(!second.is_created());
        assert!(!second.changed);
        assert_eq!(second.node.updated_at, first.node.updated_at);
        assert!(second.node.last_seen_at >= first.node.last_seen_at);
        assert_eq!(storage.get_stats().await.unwrap().total_nodes, 1);
    }

    #[tokio::test]
    async fn test_upsert_with_nanosecond_created_at_is_idempotent() {
        let storage = setup_test_db().await;
        let mut input = vpc("vpc-1");
        input.created_at = DateTime::parse_from_rfc3339("2023-01-15T10:20:30.1234567Z")
            .ok()
            .map(|t| t.with_timezone(&Utc));

        let first = storage.upsert_node(&input).await.unwrap();
        let second = storage.upsert_node(&input).await.unwrap();

        assert!(!second.changed);
        assert_eq!(second.node.updated_at, first.node.updated_at);
        assert_eq!(second.node.created_at, first.node.created_at);
    }

    #[tokio::test]
    async fn test_upsert_with_awkward_float_metadata_is_idempotent() {
        let storage = setup_test_db().await;
        let input = vpc("vpc-1").with_metadata("cpu", json!(1827.8861143719582_f64));

        storage.upsert_node(&input).await.unwrap();
        let second = storage.upsert_node(&input).await.unwrap();

        assert!(!second.changed);
        let stored = storage.get_node(&input.id()).await.unwrap().unwrap();
        assert_eq!(stored.metadata.get("cpu"), input.metadata.get("cpu"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_tags_wholesale() {
        let storage = setup_test_db().await;
        storage
            .upsert_node(&vpc("vpc-1").with_tag("team", "net"))
            .await
            .unwrap();

        let mut replacement = vpc("vpc-1");
        replacement.tags.clear();
        replacement.tags.insert("env".into(), "staging".into());
        let result = storage.upsert_node(&replacement).await.unwrap();

        assert!(result.changed);
        let previous = result.previous.unwrap();
        assert_eq!(previous.tags.len(), 2);
        assert_eq!(result.node.tags.len(), 1);
    }

    #[tokio::test]
    async fn test_get_node_by_native_id() {
        let storage = setup_test_db().await;
        storage.upsert_node(&vpc("vpc-abc")).await.unwrap();

        let found = storage
            .get_node_by_native_id(CloudProvider::Aws, "vpc-abc")
            .await
            .unwrap();
        assert!(found.is_some());
        assert!(storage
            .get_node_by_native_id(CloudProvider::Gcp, "vpc-abc")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_query_nodes() {
        let storage = setup_test_db().await;
        storage.upsert_node(&vpc("vpc-1").with_name("prod-core")).await.unwrap();
        storage.upsert_node(&vpc("vpc-2").with_name("prod-edge")).await.unwrap();
        storage
            .upsert_node(
                &GraphNodeInput::new(CloudProvider::Gcp, ResourceType::Network, "net-1")
                    .with_location("proj", "global"),
            )
            .await
            .unwrap();

        let aws = storage
            .query_nodes(&NodeFilter::new().provider(CloudProvider::Aws))
            .await
            .unwrap();
        assert_eq!(aws.len(), 2);

        let edge = storage
            .query_nodes(&NodeFilter::new().name("*-edge"))
            .await
            .unwrap();
        assert_eq!(edge.len(), 1);
        assert_eq!(edge[0].native_id, "vpc-2");

        let page = storage
            .query_nodes(&NodeFilter::new().provider(CloudProvider::Aws).limit(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_nodes_disappeared() {
        let storage = setup_test_db().await;
        let old = storage.upsert_node(&vpc("vpc-old")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let cutoff = timestamp_now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        storage.upsert_node(&vpc("vpc-new")).await.unwrap();

        let ids = storage.mark_nodes_disappeared(cutoff, None).await.unwrap();
        assert_eq!(ids, vec![old.node.id.clone()]);

        let stored = storage.get_node(&old.node.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NodeStatus::Disappeared);

        // Already-disappeared nodes are not reported again
        let again = storage.mark_nodes_disappeared(cutoff, None).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_mark_disappeared_scoped_by_provider() {
        let storage = setup_test_db().await;
        storage.upsert_node(&vpc("vpc-1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let ids = storage
            .mark_nodes_disappeared(timestamp_now(), Some(CloudProvider::Azure))
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_symmetric_edges_stored_once() {
        let storage = setup_test_db().await;
        let forward = GraphEdgeInput::new("b", "a", RelationshipType::PeersWith, DiscoveryMethod::ConfigScan);
        let reverse = GraphEdgeInput::new("a", "b", RelationshipType::PeersWith, DiscoveryMethod::ConfigScan);

        let first = storage.upsert_edge(&forward).await.unwrap();
        let second = storage.upsert_edge(&reverse).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.edge.id, second.edge.id);
        assert_eq!(first.edge.source_node_id, "a");
        assert_eq!(storage.list_edges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_edge_confidence_never_downgrades() {
        let storage = setup_test_db().await;
        let api = GraphEdgeInput::new("i", "s", RelationshipType::RunsIn, DiscoveryMethod::ApiField);
        let heuristic = GraphEdgeInput::new("i", "s", RelationshipType::RunsIn, DiscoveryMethod::ConfigScan);

        storage.upsert_edge(&api).await.unwrap();
        let result = storage.upsert_edge(&heuristic).await.unwrap();

        assert_eq!(result.edge.confidence, 1.0);
        assert_eq!(result.edge.discovered_via, DiscoveryMethod::ApiField);
    }

    #[tokio::test]
    async fn test_edges_for_node_by_direction() {
        let storage = setup_test_db().await;
        storage
            .upsert_edge(&GraphEdgeInput::new("app", "db", RelationshipType::DependsOn, DiscoveryMethod::Manual))
            .await
            .unwrap();
        storage
            .upsert_edge(&GraphEdgeInput::new("lb", "app", RelationshipType::RoutesTo, DiscoveryMethod::ApiField))
            .await
            .unwrap();

        let down = storage
            .get_edges_for_node("app", TraversalDirection::Downstream, None)
            .await
            .unwrap();
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].target_node_id, "db");

        let up = storage
            .get_edges_for_node("app", TraversalDirection::Upstream, None)
            .await
            .unwrap();
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].source_node_id, "lb");

        let both = storage
            .get_edges_for_node("app", TraversalDirection::Both, Some(RelationshipType::RoutesTo))
            .await
            .unwrap();
        assert_eq!(both.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_stale_edges() {
        let storage = setup_test_db().await;
        storage
            .upsert_edge(&GraphEdgeInput::new("a", "b", RelationshipType::DependsOn, DiscoveryMethod::Manual))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let cutoff = timestamp_now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        storage
            .upsert_edge(&GraphEdgeInput::new("b", "c", RelationshipType::DependsOn, DiscoveryMethod::Manual))
            .await
            .unwrap();

        let removed = storage.delete_stale_edges(cutoff).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].source_node_id, "a");
        assert_eq!(storage.list_edges().await.unwrap().len(), 1);
        assert!(storage.delete_stale_edges(cutoff).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_node_removes_edges_and_memberships() {
        let storage = setup_test_db().await;
        let a = storage.upsert_node(&vpc("vpc-a")).await.unwrap().node;
        let b = storage.upsert_node(&vpc("vpc-b")).await.unwrap().node;
        storage
            .upsert_edge(&GraphEdgeInput::new(&a.id, &b.id, RelationshipType::PeersWith, DiscoveryMethod::ApiField))
            .await
            .unwrap();
        let group = GraphGroup::new("core", GroupType::Environment);
        storage.upsert_group(&group).await.unwrap();
        storage.add_group_member(&group.id, &a.id).await.unwrap();

        assert!(storage.delete_node(&a.id).await.unwrap());
        assert!(!storage.delete_node(&a.id).await.unwrap());
        assert!(storage.list_edges().await.unwrap().is_empty());
        assert!(storage.get_group_members(&group.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_changes_keep_detection_order() {
        let storage = setup_test_db().await;
        storage
            .append_change(GraphChangeInput::new("n1", ChangeType::NodeCreated))
            .await
            .unwrap();
        storage
            .append_changes(vec![
                GraphChangeInput::new("n2", ChangeType::NodeCreated),
                GraphChangeInput::new("n1", ChangeType::CostChanged)
                    .with_field("costMonthly", &json!(10.0), &json!(12.0)),
            ])
            .await
            .unwrap();

        let all = storage.get_changes(&ChangeFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let timeline = storage.get_node_timeline("n1", None).await.unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].change_type, ChangeType::NodeCreated);
        assert_eq!(timeline[1].change_type, ChangeType::CostChanged);
        assert_eq!(timeline[1].new_value.as_deref(), Some("12.0"));
    }

    #[tokio::test]
    async fn test_neighbors_are_cycle_safe() {
        let storage = setup_test_db().await;
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let input = GraphNodeInput::new(CloudProvider::Custom, ResourceType::Service, name);
            ids.push(storage.upsert_node(&input).await.unwrap().node.id);
        }
        for (s, t) in [(0, 1), (1, 2), (2, 0)] {
            storage
                .upsert_edge(&GraphEdgeInput::new(&ids[s], &ids[t], RelationshipType::DependsOn, DiscoveryMethod::Manual))
                .await
                .unwrap();
        }

        let subgraph = storage
            .get_neighbors(&ids[0], 10, TraversalDirection::Downstream, None)
            .await
            .unwrap();
        assert_eq!(subgraph.nodes.len(), 3);
        assert_eq!(subgraph.edges.len(), 3);
        assert_eq!(subgraph.depths.get(&ids[2]), Some(&2));
        assert!(!subgraph.truncated);
    }

    #[tokio::test]
    async fn test_neighbors_of_missing_node() {
        let storage = setup_test_db().await;
        let result = storage
            .get_neighbors("nope", 1, TraversalDirection::Both, None)
            .await;
        assert!(matches!(result, Err(Error::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_group_cost_rollup() {
        let storage = setup_test_db().await;
        let a = storage.upsert_node(&vpc("vpc-a").with_cost(10.0)).await.unwrap().node;
        let b = storage.upsert_node(&vpc("vpc-b").with_cost(5.5)).await.unwrap().node;
        let c = storage.upsert_node(&vpc("vpc-c")).await.unwrap().node;

        let group = GraphGroup::new("checkout", GroupType::Application).with_owner("payments");
        storage.upsert_group(&group).await.unwrap();
        for node in [&a, &b, &c] {
            storage.add_group_member(&group.id, &node.id).await.unwrap();
        }
        // idempotent
        storage.add_group_member(&group.id, &a.id).await.unwrap();

        let cost = storage.get_group_cost(&group.id).await.unwrap();
        assert_eq!(cost.member_count, 3);
        assert_eq!(cost.costed_members, 2);
        assert_eq!(cost.total_cost_monthly, 15.5);

        let groups = storage.get_groups_for_node(&a.id).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "checkout");

        assert!(storage.remove_group_member(&group.id, &c.id).await.unwrap());
        assert!(storage.delete_group(&group.id).await.unwrap());
        assert!(matches!(
            storage.get_group_cost(&group.id).await,
            Err(Error::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_member_requires_existing_node() {
        let storage = setup_test_db().await;
        let group = GraphGroup::new("team", GroupType::Team);
        storage.upsert_group(&group).await.unwrap();

        let result = storage.add_group_member(&group.id, "missing").await;
        assert!(matches!(result, Err(Error::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_sync_records() {
        let storage = setup_test_db().await;
        let mut record = SyncRecord::new(CloudProvider::Aws);
        record.start(timestamp_now());
        storage.save_sync_record(&record).await.unwrap();

        record.nodes_discovered = 4;
        record.errors.push("listing caches failed".into());
        record.finish(timestamp_now());
        storage.save_sync_record(&record).await.unwrap();

        let stored = storage.get_sync_record(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Partial);
        assert_eq!(stored.nodes_discovered, 4);
        assert_eq!(stored.errors.len(), 1);

        let last = storage.get_last_sync(CloudProvider::Aws).await.unwrap().unwrap();
        assert_eq!(last.id, record.id);
        assert!(storage.get_last_sync(CloudProvider::Gcp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let storage = setup_test_db().await;
        let a = storage.upsert_node(&vpc("vpc-a").with_cost(3.0)).await.unwrap().node;
        let b = storage
            .upsert_node(
                &GraphNodeInput::new(CloudProvider::Gcp, ResourceType::Network, "net-1").with_cost(2.0),
            )
            .await
            .unwrap()
            .node;
        storage
            .upsert_edge(&GraphEdgeInput::new(&a.id, &b.id, RelationshipType::PeersWith, DiscoveryMethod::ConfigScan))
            .await
            .unwrap();

        let stats = storage.get_stats().await.unwrap();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.total_edges, 1);
        assert_eq!(stats.total_cost_monthly, 5.0);
        assert_eq!(stats.nodes_by_provider.len(), 2);
        assert_eq!(
            stats.edges_by_relationship_type,
            vec![(RelationshipType::PeersWith, 1)]
        );
        assert!(stats.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let storage = setup_test_db().await;
        let result = storage
            .upsert_node(&GraphNodeInput::new(CloudProvider::Aws, ResourceType::Vpc, ""))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let input = vpc("vpc-1");

        {
            let db = crate::storage::Database::new(crate::storage::DatabaseConfig::with_path(&path))
                .await
                .unwrap();
            SqliteGraphStorage::new(db.pool().clone())
                .upsert_node(&input)
                .await
                .unwrap();
            db.close().await;
        }

        let db = crate::storage::Database::new(crate::storage::DatabaseConfig::with_path(&path))
            .await
            .unwrap();
        let storage = SqliteGraphStorage::new(db.pool().clone());
        assert!(storage.get_node(&input.id()).await.unwrap().is_some());
    }
}
