//! Storage trait for graph persistence
//!
//! This module defines the trait for graph storage operations. The trait
//! abstracts over the SQLite backend and the in-memory backend used in tests;
//! both must behave identically.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Error, Result};

use super::change::{ChangeFilter, GraphChange, GraphChangeInput};
use super::edge::{GraphEdge, GraphEdgeInput, RelationshipType};
use super::filter::NodeFilter;
use super::group::{GraphGroup, GroupCost};
use super::node::{CloudProvider, GraphNode, GraphNodeInput, ResourceType};
use super::sync_record::SyncRecord;

/// Storage trait for the infrastructure graph
///
/// Implementations must be safe to call from concurrent sync cycles. The
/// compare-and-write inside `upsert_node` and `upsert_edge` is atomic per id.
#[async_trait]
pub trait GraphStorage: Send + Sync {
    // ========== Node Operations ==========

    /// Insert or merge a node by its computed id
    async fn upsert_node(&self, input: &GraphNodeInput) -> Result<NodeUpsert>;

    /// Upsert a batch of nodes
    async fn upsert_nodes(&self, inputs: &[GraphNodeInput]) -> Result<Vec<NodeUpsert>> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            results.push(self.upsert_node(input).await?);
        }
        Ok(results)
    }

    /// Get a node by id
    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>>;

    /// Get a node by its provider-native identifier
    async fn get_node_by_native_id(
        &self,
        provider: CloudProvider,
        native_id: &str,
    ) -> Result<Option<GraphNode>>;

    /// Query nodes; all filter fields are ANDed
    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<GraphNode>>;

    /// Hard delete a node together with its edges and group memberships
    async fn delete_node(&self, id: &str) -> Result<bool>;

    /// Mark every node not seen since `older_than` as disappeared
    ///
    /// Returns the ids that transitioned. Nodes already disappeared are left
    /// alone so repeated calls do not report them twice.
    async fn mark_nodes_disappeared(
        &self,
        older_than: DateTime<Utc>,
        provider: Option<CloudProvider>,
    ) -> Result<Vec<String>>;

    /// Hard delete disappeared nodes last seen before `older_than`
    async fn purge_disappeared_nodes(&self, older_than: DateTime<Utc>) -> Result<Vec<String>>;

    // ========== Edge Operations ==========

    /// Insert or re-confirm an edge by its canonical key
    async fn upsert_edge(&self, input: &GraphEdgeInput) -> Result<EdgeUpsert>;

    /// Upsert a batch of edges
    async fn upsert_edges(&self, inputs: &[GraphEdgeInput]) -> Result<Vec<EdgeUpsert>> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            results.push(self.upsert_edge(input).await?);
        }
        Ok(results)
    }

    /// Get an edge by id
    async fn get_edge(&self, id: &str) -> Result<Option<GraphEdge>>;

    /// Delete an edge by id
    async fn delete_edge(&self, id: &str) -> Result<bool>;

    /// Edges touching a node
    ///
    /// Upstream edges have the node as target; downstream edges have it as source.
    async fn get_edges_for_node(
        &self,
        node_id: &str,
        direction: TraversalDirection,
        relationship_type: Option<RelationshipType>,
    ) -> Result<Vec<GraphEdge>>;

    /// Every stored edge
    async fn list_edges(&self) -> Result<Vec<GraphEdge>>;

    /// Remove edges not re-confirmed since `older_than`
    ///
    /// Returns exactly the edges removed, selected and deleted under one write.
    async fn delete_stale_edges(&self, older_than: DateTime<Utc>) -> Result<Vec<GraphEdge>>;

    // ========== Change Ledger ==========

    /// Append a change to the ledger
    async fn append_change(&self, input: GraphChangeInput) -> Result<GraphChange>;

    /// Append a batch of changes, preserving their order
    async fn append_changes(&self, inputs: Vec<GraphChangeInput>) -> Result<Vec<GraphChange>> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            results.push(self.append_change(input).await?);
        }
        Ok(results)
    }

    /// Read changes in detection order
    async fn get_changes(&self, filter: &ChangeFilter) -> Result<Vec<GraphChange>>;

    /// Changes recorded against one node, in detection order
    async fn get_node_timeline(&self, node_id: &str, limit: Option<usize>) -> Result<Vec<GraphChange>> {
        let filter = ChangeFilter {
            limit,
            ..ChangeFilter::for_target(node_id)
        };
        self.get_changes(&filter).await
    }

    // ========== Traversal ==========

    /// Breadth-first expansion from a node up to `depth` hops
    async fn get_neighbors(
        &self,
        node_id: &str,
        depth: u32,
        direction: TraversalDirection,
        edge_types: Option<&[RelationshipType]>,
    ) -> Result<Subgraph> {
        self.get_neighbors_bounded(node_id, depth, direction, edge_types, TraversalLimits::default())
            .await
    }

    /// Breadth-first expansion with a caller-supplied node cap and deadline
    ///
    /// Never revisits a node: once a node is seen at some depth, later
    /// encounters only contribute the connecting edge. Symmetric edges are
    /// followed in either direction.
    async fn get_neighbors_bounded(
        &self,
        node_id: &str,
        depth: u32,
        direction: TraversalDirection,
        edge_types: Option<&[RelationshipType]>,
        limits: TraversalLimits,
    ) -> Result<Subgraph> {
        let root = self
            .get_node(node_id)
            .await?
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;

        let mut depths: HashMap<String, u32> = HashMap::new();
        depths.insert(root.id.clone(), 0);
        let mut nodes = vec![root];
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut seen_edges: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::from([(node_id.to_string(), 0)]);
        let mut truncated = false;

        while let Some((current, current_depth)) = queue.pop_front() {
            if current_depth >= depth {
                continue;
            }
            if limits.expired() {
                truncated = true;
                break;
            }

            let candidates = self
                .get_edges_for_node(&current, TraversalDirection::Both, None)
                .await?;

            for edge in candidates {
                if edge_types.is_some_and(|types| !types.contains(&edge.relationship_type)) {
                    continue;
                }
                let Some(next) = direction.step(&edge, &current) else {
                    continue;
                };
                let next = next.to_string();

                if !depths.contains_key(&next) {
                    if limits.max_nodes.is_some_and(|max| nodes.len() >= max) {
                        truncated = true;
                        continue;
                    }
                    let Some(node) = self.get_node(&next).await? else {
                        continue;
                    };
                    depths.insert(next.clone(), current_depth + 1);
                    nodes.push(node);
                    queue.push_back((next, current_depth + 1));
                }

                if seen_edges.insert(edge.id.clone()) {
                    edges.push(edge);
                }
            }
        }

        Ok(Subgraph {
            root_id: node_id.to_string(),
            depths,
            nodes,
            edges,
            truncated,
        })
    }

    // ========== Groups ==========

    /// Insert or update a group
    async fn upsert_group(&self, group: &GraphGroup) -> Result<()>;

    /// Get a group by id
    async fn get_group(&self, id: &str) -> Result<Option<GraphGroup>>;

    /// List all groups
    async fn list_groups(&self) -> Result<Vec<GraphGroup>>;

    /// Delete a group and its memberships
    async fn delete_group(&self, id: &str) -> Result<bool>;

    /// Add a node to a group (idempotent)
    async fn add_group_member(&self, group_id: &str, node_id: &str) -> Result<()>;

    /// Remove a node from a group
    async fn remove_group_member(&self, group_id: &str, node_id: &str) -> Result<bool>;

    /// Nodes belonging to a group
    async fn get_group_members(&self, group_id: &str) -> Result<Vec<GraphNode>>;

    /// Groups a node belongs to
    async fn get_groups_for_node(&self, node_id: &str) -> Result<Vec<GraphGroup>>;

    /// Roll member costs up to the group
    async fn get_group_cost(&self, group_id: &str) -> Result<GroupCost> {
        if self.get_group(group_id).await?.is_none() {
            return Err(Error::GroupNotFound(group_id.to_string()));
        }
        let members = self.get_group_members(group_id).await?;
        let costs: Vec<f64> = members.iter().filter_map(|n| n.cost_monthly).collect();
        Ok(GroupCost {
            group_id: group_id.to_string(),
            member_count: members.len(),
            costed_members: costs.len(),
            total_cost_monthly: costs.iter().sum(),
        })
    }

    // ========== Sync Records ==========

    /// Insert or update a sync record
    async fn save_sync_record(&self, record: &SyncRecord) -> Result<()>;

    /// Get a sync record by id
    async fn get_sync_record(&self, id: &str) -> Result<Option<SyncRecord>>;

    /// Most recent sync records first
    async fn list_sync_records(
        &self,
        provider: Option<CloudProvider>,
        limit: usize,
    ) -> Result<Vec<SyncRecord>>;

    /// Most recent sync record for a provider
    async fn get_last_sync(&self, provider: CloudProvider) -> Result<Option<SyncRecord>> {
        Ok(self
            .list_sync_records(Some(provider), 1)
            .await?
            .into_iter()
            .next())
    }

    // ========== Statistics ==========

    /// Aggregate statistics computed from current state
    async fn get_stats(&self) -> Result<GraphStats>;
}

/// Direction for graph traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraversalDirection {
    /// Follow edges where the node is the target
    Upstream,
    /// Follow edges where the node is the source
    Downstream,
    /// Follow edges in both directions
    Both,
}

impl TraversalDirection {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "upstream" | "up" | "incoming" => Some(Self::Upstream),
            "downstream" | "down" | "outgoing" => Some(Self::Downstream),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    /// Whether `edge` touches `node_id` on the side this direction selects
    pub fn selects(&self, edge: &GraphEdge, node_id: &str) -> bool {
        match self {
            Self::Upstream => edge.target_node_id == node_id,
            Self::Downstream => edge.source_node_id == node_id,
            Self::Both => edge.source_node_id == node_id || edge.target_node_id == node_id,
        }
    }

    /// The node reached by walking `edge` away from `from`, if allowed
    pub fn step<'a>(&self, edge: &'a GraphEdge, from: &str) -> Option<&'a str> {
        if edge.relationship_type.is_symmetric() {
            return edge.other_end(from);
        }
        match self {
            Self::Downstream if edge.source_node_id == from => Some(&edge.target_node_id),
            Self::Upstream if edge.target_node_id == from => Some(&edge.source_node_id),
            Self::Both => edge.other_end(from),
            _ => None,
        }
    }
}

/// Result of upserting a node
#[derive(Debug, Clone)]
pub struct NodeUpsert {
    /// Node as stored after the upsert
    pub node: GraphNode,
    /// Stored state before the upsert, `None` when the node is new
    pub previous: Option<GraphNode>,
    /// Whether any input-controlled field changed; always true for new nodes
    pub changed: bool,
}

impl NodeUpsert {
    pub fn is_created(&self) -> bool {
        self.previous.is_none()
    }
}

/// Result of upserting an edge
#[derive(Debug, Clone)]
pub struct EdgeUpsert {
    pub edge: GraphEdge,
    pub created: bool,
}

/// Caller-supplied bounds on a traversal
#[derive(Debug, Clone, Copy, Default)]
pub struct TraversalLimits {
    pub max_nodes: Option<usize>,
    pub deadline: Option<Instant>,
}

impl TraversalLimits {
    pub fn max_nodes(max: usize) -> Self {
        Self {
            max_nodes: Some(max),
            deadline: None,
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Nodes and edges reachable from a root within a hop bound
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subgraph {
    pub root_id: String,
    /// Hop distance of each visited node from the root
    pub depths: HashMap<String, u32>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Whether a node cap or deadline cut the expansion short
    pub truncated: bool,
}

impl Subgraph {
    /// Visited node ids, excluding the root
    pub fn reached_ids(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| *id != self.root_id)
            .collect()
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.depths.contains_key(node_id)
    }
}

/// Statistics about the graph
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub total_nodes: u64,
    pub total_edges: u64,
    pub total_changes: u64,
    pub total_groups: u64,
    pub nodes_by_provider: Vec<(CloudProvider, u64)>,
    pub nodes_by_resource_type: Vec<(ResourceType, u64)>,
    pub edges_by_relationship_type: Vec<(RelationshipType, u64)>,
    pub total_cost_monthly: f64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Reject node inputs no backend can store
pub(crate) fn validate_node_input(input: &GraphNodeInput) -> Result<()> {
    if input.native_id.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "{} {} node has an empty nativeId",
            input.provider, input.resource_type
        )));
    }
    if input.cost_monthly.is_some_and(|c| !c.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "node {} has a non-finite cost",
            input.native_id
        )));
    }
    Ok(())
}

/// Reject edge inputs no backend can store
pub(crate) fn validate_edge_input(input: &GraphEdgeInput) -> Result<()> {
    if input.source_node_id.is_empty() || input.target_node_id.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{} edge is missing an endpoint",
            input.relationship_type
        )));
    }
    if !input.confidence.is_finite() {
        return Err(Error::InvalidInput(format!(
            "edge {} -> {} has a non-finite confidence",
            input.source_node_id, input.target_node_id
        )));
    }
    Ok(())
}

/// Sort aggregate buckets by count (descending), then key
pub(crate) fn sort_buckets<K: Ord>(buckets: &mut [(K, u64)]) {
    buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::edge::DiscoveryMethod;

    fn edge(source: &str, target: &str, rt: RelationshipType) -> GraphEdge {
        GraphEdge::from_input(
            &GraphEdgeInput::new(source, target, rt, DiscoveryMethod::ApiField),
            Utc::now(),
        )
    }

    #[test]
    fn test_direction_step() {
        let e = edge("a", "b", RelationshipType::RunsIn);
        assert_eq!(TraversalDirection::Downstream.step(&e, "a"), Some("b"));
        assert_eq!(TraversalDirection::Downstream.step(&e, "b"), None);
        assert_eq!(TraversalDirection::Upstream.step(&e, "b"), Some("a"));
        assert_eq!(TraversalDirection::Both.step(&e, "b"), Some("a"));
    }

    #[test]
    fn test_symmetric_edges_walk_both_ways() {
        let e = edge("b", "a", RelationshipType::PeersWith);
        assert_eq!(e.source_node_id, "a");
        assert_eq!(TraversalDirection::Downstream.step(&e, "b"), Some("a"));
        assert_eq!(TraversalDirection::Upstream.step(&e, "a"), Some("b"));
    }

    #[test]
    fn test_direction_selects() {
        let e = edge("a", "b", RelationshipType::DependsOn);
        assert!(TraversalDirection::Upstream.selects(&e, "b"));
        assert!(!TraversalDirection::Upstream.selects(&e, "a"));
        assert!(TraversalDirection::Both.selects(&e, "a"));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(TraversalDirection::parse("UP"), Some(TraversalDirection::Upstream));
        assert_eq!(TraversalDirection::parse("sideways"), None);
    }

    #[test]
    fn test_input_validation() {
        let empty = GraphNodeInput::new(CloudProvider::Aws, ResourceType::Vpc, " ");
        assert!(matches!(validate_node_input(&empty), Err(Error::InvalidInput(_))));

        let mut nan = GraphEdgeInput::new("a", "b", RelationshipType::DependsOn, DiscoveryMethod::Manual);
        nan.confidence = f64::NAN;
        assert!(validate_edge_input(&nan).is_err());

        let dangling = GraphEdgeInput::new("a", "", RelationshipType::DependsOn, DiscoveryMethod::Manual);
        assert!(validate_edge_input(&dangling).is_err());
    }

    #[test]
    fn test_sort_buckets() {
        let mut buckets = vec![("b", 1), ("a", 1), ("c", 5)];
        sort_buckets(&mut buckets);
        assert_eq!(buckets, vec![("c", 5), ("a", 1), ("b", 1)]);
    }
}
