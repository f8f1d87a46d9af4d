//! In-memory implementation of GraphStorage
//!
//! Holds the whole graph behind one `RwLock`. Orderings match the SQLite
//! backend (nodes and edges by id, changes by sequence) so the two can be
//! swapped in tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::graph::storage::{sort_buckets, validate_edge_input, validate_node_input};
use crate::domain::graph::{
    ChangeFilter, CloudProvider, EdgeUpsert, GraphChange, GraphChangeInput, GraphEdge,
    GraphEdgeInput, GraphGroup, GraphNode, GraphNodeInput, GraphStats, GraphStorage, NodeFilter,
    NodeStatus, NodeUpsert, RelationshipType, ResourceType, SyncRecord, TraversalDirection,
    timestamp_now,
};
use crate::error::{Error, Result};

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeMap<String, GraphEdge>,
    changes: Vec<GraphChange>,
    groups: BTreeMap<String, GraphGroup>,
    /// (group_id, node_id)
    members: BTreeSet<(String, String)>,
    sync_records: BTreeMap<String, SyncRecord>,
    next_sequence: i64,
}

impl GraphState {
    fn remove_node(&mut self, id: &str) -> bool {
        self.edges
            .retain(|_, e| e.source_node_id != id && e.target_node_id != id);
        self.members.retain(|(_, node_id)| node_id != id);
        self.nodes.remove(id).is_some()
    }

    fn push_change(&mut self, input: GraphChangeInput) -> GraphChange {
        self.next_sequence += 1;
        let change = input.into_change(
            Uuid::new_v4().to_string(),
            self.next_sequence,
            timestamp_now(),
        );
        self.changes.push(change.clone());
        change
    }

    fn sorted_groups<'a>(&self, groups: impl Iterator<Item = &'a GraphGroup>) -> Vec<GraphGroup> {
        let mut groups: Vec<GraphGroup> = groups.cloned().collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        groups
    }
}

/// In-memory graph storage
#[derive(Default)]
pub struct InMemoryGraphStorage {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStorage for InMemoryGraphStorage {
    // ========== Node Operations ==========

    async fn upsert_node(&self, input: &GraphNodeInput) -> Result<NodeUpsert> {
        validate_node_input(input)?;
        let id = input.id();
        let mut state = self.state.write().await;
        let now = timestamp_now();

        let previous = state.nodes.get(&id).cloned();
        let (node, changed) = match &previous {
            Some(existing) => {
                let mut node = existing.clone();
                let changed = node.merge_input(input, now);
                (node, changed)
            }
            None => (GraphNode::from_input(input, now), true),
        };
        state.nodes.insert(id, node.clone());

        debug!(node_id = %node.id, created = previous.is_none(), changed = changed, "Node upserted");
        Ok(NodeUpsert {
            node,
            previous,
            changed,
        })
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        Ok(self.state.read().await.nodes.get(id).cloned())
    }

    async fn get_node_by_native_id(
        &self,
        provider: CloudProvider,
        native_id: &str,
    ) -> Result<Option<GraphNode>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .values()
            .find(|n| n.provider == provider && n.native_id == native_id)
            .cloned())
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>> {
        let state = self.state.read().await;
        let nodes: Vec<GraphNode> = state
            .nodes
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        Ok(filter.paginate(nodes))
    }

    async fn delete_node(&self, id: &str) -> Result<bool> {
        let deleted = self.state.write().await.remove_node(id);
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
        let mut state = self.state.write().await;
        let now = timestamp_now();
        let mut ids = Vec::new();

        for node in state.nodes.values_mut() {
            if node.status == NodeStatus::Disappeared || node.last_seen_at >= older_than {
                continue;
            }
            if provider.is_some_and(|p| p != node.provider) {
                continue;
            }
            node.status = NodeStatus::Disappeared;
            node.updated_at = now;
            ids.push(node.id.clone());
        }

        if !ids.is_empty() {
            info!(count = ids.len(), "Nodes marked disappeared");
        }
        Ok(ids)
    }

    async fn purge_disappeared_nodes(&self, older_than: DateTime<Utc>) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        let ids: Vec<String> = state
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::Disappeared && n.last_seen_at < older_than)
            .map(|n| n.id.clone())
            .collect();

        for id in &ids {
            state.remove_node(id);
        }
        Ok(ids)
    }

    // ========== Edge Operations ==========

    async fn upsert_edge(&self, input: &GraphEdgeInput) -> Result<EdgeUpsert> {
        validate_edge_input(input)?;
        let id = input.key().edge_id();
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = timestamp_now();

        let (edge, created) = match state.edges.get_mut(&id) {
            Some(edge) => {
                edge.reconfirm(input, now);
                (edge.clone(), false)
            }
            None => {
                let edge = GraphEdge::from_input(input, now);
                state.edges.insert(id, edge.clone());
                (edge, true)
            }
        };

        debug!(edge_id = %edge.id, relationship = %edge.relationship_type, created = created, "Edge upserted");
        Ok(EdgeUpsert { edge, created })
    }

    async fn get_edge(&self, id: &str) -> Result<Option<GraphEdge>> {
        Ok(self.state.read().await.edges.get(id).cloned())
    }

    async fn delete_edge(&self, id: &str) -> Result<bool> {
        Ok(self.state.write().await.edges.remove(id).is_some())
    }

    async fn get_edges_for_node(
        &self,
        node_id: &str,
        direction: TraversalDirection,
        relationship_type: Option<RelationshipType>,
    ) -> Result<Vec<GraphEdge>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .values()
            .filter(|e| direction.selects(e, node_id))
            .filter(|e| relationship_type.is_none_or(|rt| rt == e.relationship_type))
            .cloned()
            .collect())
    }

    async fn list_edges(&self) -> Result<Vec<GraphEdge>> {
        Ok(self.state.read().await.edges.values().cloned().collect())
    }

    async fn delete_stale_edges(&self, older_than: DateTime<Utc>) -> Result<Vec<GraphEdge>> {
        let mut state = self.state.write().await;
        let stale: Vec<String> = state
            .edges
            .values()
            .filter(|e| e.last_seen_at < older_than)
            .map(|e| e.id.clone())
            .collect();
        Ok(stale.iter().filter_map(|id| state.edges.remove(id)).collect())
    }

    // ========== Change Ledger ==========

    async fn append_change(&self, input: GraphChangeInput) -> Result<GraphChange> {
        Ok(self.state.write().await.push_change(input))
    }

    async fn append_changes(&self, inputs: Vec<GraphChangeInput>) -> Result<Vec<GraphChange>> {
        let mut state = self.state.write().await;
        Ok(inputs.into_iter().map(|input| state.push_change(input)).collect())
    }

    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<GraphChange>> {
        let state = self.state.read().await;
        let matching = state.changes.iter().filter(|c| filter.matches(c)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    // ========== Groups ==========

    async fn upsert_group(&self, group: &GraphGroup) -> Result<()> {
        let mut state = self.state.write().await;
        let created_at = state
            .groups
            .get(&group.id)
            .map(|existing| existing.created_at)
            .unwrap_or(group.created_at);
        let mut group = group.clone();
        group.created_at = created_at;
        state.groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn get_group(&self, id: &str) -> Result<Option<GraphGroup>> {
        Ok(self.state.read().await.groups.get(id).cloned())
    }

    async fn list_groups(&self) -> Result<Vec<GraphGroup>> {
        let state = self.state.read().await;
        Ok(state.sorted_groups(state.groups.values()))
    }

    async fn delete_group(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        state.members.retain(|(group_id, _)| group_id != id);
        Ok(state.groups.remove(id).is_some())
    }

    async fn add_group_member(&self, group_id: &str, node_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.groups.contains_key(group_id) {
            return Err(Error::GroupNotFound(group_id.to_string()));
        }
        if !state.nodes.contains_key(node_id) {
            return Err(Error::NodeNotFound(node_id.to_string()));
        }
        state
            .members
            .insert((group_id.to_string(), node_id.to_string()));
        Ok(())
    }

    async fn remove_group_member(&self, group_id: &str, node_id: &str) -> Result<bool> {
        Ok(self
            .state
            .write()
            .await
            .members
            .remove(&(group_id.to_string(), node_id.to_string())))
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<GraphNode>> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .filter(|(g, _)| g == group_id)
            .filter_map(|(_, node_id)| state.nodes.get(node_id).cloned())
            .collect())
    }

    async fn get_groups_for_node(&self, node_id: &str) -> Result<Vec<GraphGroup>> {
        let state = self.state.read().await;
        let groups = state
            .members
            .iter()
            .filter(|(_, n)| n == node_id)
            .filter_map(|(group_id, _)| state.groups.get(group_id));
        Ok(state.sorted_groups(groups))
    }

    // ========== Sync Records ==========

    async fn save_sync_record(&self, record: &SyncRecord) -> Result<()> {
        self.state
            .write()
            .await
            .sync_records
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_sync_record(&self, id: &str) -> Result<Option<SyncRecord>> {
        Ok(self.state.read().await.sync_records.get(id).cloned())
    }

    async fn list_sync_records(
        &self,
        provider: Option<CloudProvider>,
        limit: usize,
    ) -> Result<Vec<SyncRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<SyncRecord> = state
            .sync_records
            .values()
            .filter(|r| provider.is_none_or(|p| p == r.provider))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        records.truncate(limit);
        Ok(records)
    }

    // ========== Statistics ==========

    async fn get_stats(&self) -> Result<GraphStats> {
        let state = self.state.read().await;

        let mut by_provider: HashMap<CloudProvider, u64> = HashMap::new();
        let mut by_type: HashMap<ResourceType, u64> = HashMap::new();
        let mut total_cost_monthly = 0.0;
        for node in state.nodes.values() {
            *by_provider.entry(node.provider).or_default() += 1;
            *by_type.entry(node.resource_type).or_default() += 1;
            if node.status != NodeStatus::Disappeared {
                total_cost_monthly += node.cost_monthly.unwrap_or(0.0);
            }
        }

        let mut by_relationship: HashMap<RelationshipType, u64> = HashMap::new();
        for edge in state.edges.values() {
            *by_relationship.entry(edge.relationship_type).or_default() += 1;
        }

        let mut nodes_by_provider: Vec<_> = by_provider.into_iter().collect();
        sort_buckets(&mut nodes_by_provider);
        let mut nodes_by_resource_type: Vec<_> = by_type.into_iter().collect();
        sort_buckets(&mut nodes_by_resource_type);
        let mut edges_by_relationship_type: Vec<_> = by_relationship.into_iter().collect();
        sort_buckets(&mut edges_by_relationship_type);

        Ok(GraphStats {
            total_nodes: state.nodes.len() as u64,
            total_edges: state.edges.len() as u64,
            total_changes: state.changes.len() as u64,
            total_groups: state.groups.len() as u64,
            nodes_by_provider,
            nodes_by_resource_type,
            edges_by_relationship_type,
            total_cost_monthly,
            last_sync_at: state
                .sync_records
                .values()
                .filter_map(|r| r.completed_at)
                .max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{ChangeType, DiscoveryMethod, GroupType};

    fn instance(native_id: &str) -> GraphNodeInput {
        GraphNodeInput::new(CloudProvider::Azure, ResourceType::Instance, native_id)
            .with_location("sub-1", "westeurope")
            .with_status(NodeStatus::Running)
    }

    #[tokio::test]
    async fn test_upsert_idempotent() {
        let storage = InMemoryGraphStorage::new();
        let first = storage.upsert_node(&instance("vm-1")).await.unwrap();
        let second = storage.upsert_node(&instance("vm-1")).await.unwrap();

        assert!(first.is_created());
        assert!(!second.changed);
        assert_eq!(second.node.updated_at, first.node.updated_at);
        assert_eq!(storage.get_stats().await.unwrap().total_nodes, 1);
    }

    #[tokio::test]
    async fn test_status_change_is_reported() {
        let storage = InMemoryGraphStorage::new();
        storage.upsert_node(&instance("vm-1")).await.unwrap();
        let stopped = instance("vm-1").with_status(NodeStatus::Stopped);

        let result = storage.upsert_node(&stopped).await.unwrap();
        assert!(result.changed);
        assert_eq!(result.previous.unwrap().status, NodeStatus::Running);
    }

    #[tokio::test]
    async fn test_disappeared_and_purged() {
        let storage = InMemoryGraphStorage::new();
        let node = storage.upsert_node(&instance("vm-1")).await.unwrap().node;
        let later = node.last_seen_at + chrono::Duration::seconds(1);

        assert_eq!(
            storage.mark_nodes_disappeared(later, Some(CloudProvider::Azure)).await.unwrap(),
            vec![node.id.clone()]
        );
        assert!(storage.mark_nodes_disappeared(later, None).await.unwrap().is_empty());

        assert_eq!(storage.purge_disappeared_nodes(later).await.unwrap(), vec![node.id.clone()]);
        assert!(storage.get_node(&node.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_edge_upsert_dedups() {
        let storage = InMemoryGraphStorage::new();
        let input = GraphEdgeInput::new("x", "y", RelationshipType::PeersWith, DiscoveryMethod::ConfigScan);
        let reversed = GraphEdgeInput::new("y", "x", RelationshipType::PeersWith, DiscoveryMethod::ApiField);

        assert!(storage.upsert_edge(&input).await.unwrap().created);
        let second = storage.upsert_edge(&reversed).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.edge.confidence, 1.0);
        assert_eq!(storage.list_edges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_change_sequences_increase() {
        let storage = InMemoryGraphStorage::new();
        let changes = storage
            .append_changes(vec![
                GraphChangeInput::new("a", ChangeType::NodeCreated),
                GraphChangeInput::new("b", ChangeType::NodeCreated),
            ])
            .await
            .unwrap();
        let third = storage
            .append_change(GraphChangeInput::new("a", ChangeType::NodeDisappeared))
            .await
            .unwrap();

        assert_eq!(changes[0].sequence, 1);
        assert_eq!(changes[1].sequence, 2);
        assert_eq!(third.sequence, 3);

        let limited = storage
            .get_changes(&ChangeFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_group_membership() {
        let storage = InMemoryGraphStorage::new();
        let node = storage.upsert_node(&instance("vm-1").with_cost(40.0)).await.unwrap().node;
        let group = GraphGroup::new("search", GroupType::Application);
        storage.upsert_group(&group).await.unwrap();
        storage.add_group_member(&group.id, &node.id).await.unwrap();

        let cost = storage.get_group_cost(&group.id).await.unwrap();
        assert_eq!(cost.total_cost_monthly, 40.0);

        assert!(storage.delete_node(&node.id).await.unwrap());
        assert!(storage.get_group_members(&group.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bounded_traversal_truncates() {
        let storage = InMemoryGraphStorage::new();
        let hub = storage.upsert_node(&instance("hub")).await.unwrap().node;
        for i in 0..5 {
            let spoke = storage.upsert_node(&instance(&format!("spoke-{}", i))).await.unwrap().node;
            storage
                .upsert_edge(&GraphEdgeInput::new(&spoke.id, &hub.id, RelationshipType::DependsOn, DiscoveryMethod::Manual))
                .await
                .unwrap();
        }

        let subgraph = storage
            .get_neighbors_bounded(
                &hub.id,
                3,
                TraversalDirection::Upstream,
                None,
                crate::domain::graph::TraversalLimits::max_nodes(3),
            )
            .await
            .unwrap();
        assert_eq!(subgraph.nodes.len(), 3);
        assert!(subgraph.truncated);
    }

    #[tokio::test]
    async fn test_expired_deadline_stops_traversal() {
        let storage = InMemoryGraphStorage::new();
        let hub = storage.upsert_node(&instance("hub")).await.unwrap().node;
        let spoke = storage.upsert_node(&instance("spoke")).await.unwrap().node;
        storage
            .upsert_edge(&GraphEdgeInput::new(&spoke.id, &hub.id, RelationshipType::DependsOn, DiscoveryMethod::Manual))
            .await
            .unwrap();

        let limits = crate::domain::graph::TraversalLimits {
            max_nodes: None,
            deadline: Some(tokio::time::Instant::now()),
        };
        let subgraph = storage
            .get_neighbors_bounded(&hub.id, 3, TraversalDirection::Upstream, None, limits)
            .await
            .unwrap();
        assert_eq!(subgraph.nodes.len(), 1);
        assert!(subgraph.truncated);
    }
}
