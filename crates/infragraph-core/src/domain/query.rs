//! Read-side questions asked of the graph

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::domain::graph::storage::sort_buckets;
use crate::domain::graph::{
    CloudProvider, GraphChange, GraphStorage, GroupCost, NodeFilter, RelationshipType, Subgraph,
    TraversalDirection, TraversalLimits,
};
use crate::error::{Error, Result};

/// Cross-cloud edge counts
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossCloudSummary {
    pub total_edges: u64,
    pub by_relationship_type: Vec<(RelationshipType, u64)>,
    /// Provider pairs in canonical (sorted) order
    pub by_provider_pair: Vec<((CloudProvider, CloudProvider), u64)>,
    pub average_confidence: Option<f64>,
}

/// Traversals and rollups over a storage backend
pub struct GraphQueryService {
    storage: Arc<dyn GraphStorage>,
    max_nodes: usize,
}

impl GraphQueryService {
    pub fn new(storage: Arc<dyn GraphStorage>, max_nodes: usize) -> Self {
        Self {
            storage,
            max_nodes: max_nodes.max(1),
        }
    }

    /// Everything that depends on `node_id`, up to `depth` hops
    pub async fn blast_radius(&self, node_id: &str, depth: u32) -> Result<Subgraph> {
        self.neighbors(node_id, depth, TraversalDirection::Upstream, None).await
    }

    /// Everything `node_id` depends on, up to `depth` hops
    pub async fn dependency_chain(&self, node_id: &str, depth: u32) -> Result<Subgraph> {
        self.neighbors(node_id, depth, TraversalDirection::Downstream, None).await
    }

    pub async fn neighbors(
        &self,
        node_id: &str,
        depth: u32,
        direction: TraversalDirection,
        edge_types: Option<&[RelationshipType]>,
    ) -> Result<Subgraph> {
        self.storage
            .get_neighbors_bounded(
                node_id,
                depth,
                direction,
                edge_types,
                TraversalLimits::max_nodes(self.max_nodes),
            )
            .await
    }

    /// Ledger entries for a node, oldest first
    ///
    /// Purged nodes keep their history; an id that was never seen is an error.
    pub async fn node_timeline(&self, node_id: &str, limit: Option<usize>) -> Result<Vec<GraphChange>> {
        let timeline = self.storage.get_node_timeline(node_id, limit).await?;
        if timeline.is_empty() && self.storage.get_node(node_id).await?.is_none() {
            return Err(Error::NodeNotFound(node_id.to_string()));
        }
        Ok(timeline)
    }

    /// Counts of edges whose endpoints live in different providers
    pub async fn cross_cloud_summary(&self) -> Result<CrossCloudSummary> {
        let providers: HashMap<String, CloudProvider> = self
            .storage
            .query_nodes(&NodeFilter::new())
            .await?
            .into_iter()
            .map(|n| (n.id, n.provider))
            .collect();

        let mut by_type: BTreeMap<RelationshipType, u64> = BTreeMap::new();
        let mut by_pair: BTreeMap<(CloudProvider, CloudProvider), u64> = BTreeMap::new();
        let mut confidence_sum = 0.0;
        let mut total = 0u64;

        for edge in self.storage.list_edges().await? {
            let (Some(source), Some(target)) = (
                providers.get(&edge.source_node_id),
                providers.get(&edge.target_node_id),
            ) else {
                continue;
            };
            if source == target {
                continue;
            }
            let pair = if source < target {
                (*source, *target)
            } else {
                (*target, *source)
            };
            *by_type.entry(edge.relationship_type).or_default() += 1;
            *by_pair.entry(pair).or_default() += 1;
            confidence_sum += edge.confidence;
            total += 1;
        }

        let mut by_relationship_type: Vec<_> = by_type.into_iter().collect();
        let mut by_provider_pair: Vec<_> = by_pair.into_iter().collect();
        sort_buckets(&mut by_relationship_type);
        sort_buckets(&mut by_provider_pair);

        Ok(CrossCloudSummary {
            total_edges: total,
            by_relationship_type,
            by_provider_pair,
            average_confidence: (total > 0).then(|| confidence_sum / total as f64),
        })
    }

    pub async fn group_cost(&self, group_id: &str) -> Result<GroupCost> {
        self.storage.get_group_cost(group_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{
        DiscoveryMethod, GraphEdgeInput, GraphGroup, GraphNodeInput, GroupType, ResourceType,
    };
    use crate::infrastructure::InMemoryGraphStorage;

    async fn seeded() -> (GraphQueryService, Vec<String>) {
        let storage = Arc::new(InMemoryGraphStorage::new());
        let inputs = [
            GraphNodeInput::new(CloudProvider::Aws, ResourceType::Database, "db").with_cost(200.0),
            GraphNodeInput::new(CloudProvider::Aws, ResourceType::Function, "api").with_cost(15.0),
            GraphNodeInput::new(CloudProvider::Gcp, ResourceType::Container, "worker"),
            GraphNodeInput::new(CloudProvider::Azure, ResourceType::Vnet, "hub"),
        ];
        let mut ids = Vec::new();
        for input in &inputs {
            ids.push(storage.upsert_node(input).await.unwrap().node.id);
        }
        // api -> db stays inside aws; worker reaches into aws and azure
        let edges = [
            GraphEdgeInput::new(&ids[1], &ids[0], RelationshipType::DependsOn, DiscoveryMethod::ApiField),
            GraphEdgeInput::new(&ids[2], &ids[1], RelationshipType::DependsOn, DiscoveryMethod::ConfigScan),
            GraphEdgeInput::new(&ids[2], &ids[3], RelationshipType::RunsIn, DiscoveryMethod::ConfigScan)
                .with_confidence(0.7),
        ];
        for edge in &edges {
            storage.upsert_edge(edge).await.unwrap();
        }
        (GraphQueryService::new(storage, 100), ids)
    }

    #[tokio::test]
    async fn test_blast_radius_walks_dependents() {
        let (service, ids) = seeded().await;
        let radius = service.blast_radius(&ids[0], 5).await.unwrap();
        assert!(radius.contains_node(&ids[1]));
        assert!(radius.contains_node(&ids[2]));
        assert!(!radius.contains_node(&ids[3]));
        assert_eq!(radius.depths.get(&ids[2]), Some(&2));
    }

    #[tokio::test]
    async fn test_dependency_chain_walks_dependencies() {
        let (service, ids) = seeded().await;
        let chain = service.dependency_chain(&ids[2], 1).await.unwrap();
        assert_eq!(chain.nodes.len(), 3);
        assert!(!chain.contains_node(&ids[0]));
    }

    #[tokio::test]
    async fn test_cross_cloud_summary_excludes_same_provider_edges() {
        let (service, _) = seeded().await;
        let summary = service.cross_cloud_summary().await.unwrap();
        assert_eq!(summary.total_edges, 2);
        assert_eq!(
            summary.by_provider_pair,
            vec![
                ((CloudProvider::Aws, CloudProvider::Gcp), 1),
                ((CloudProvider::Azure, CloudProvider::Gcp), 1)
            ]
        );
        let average = summary.average_confidence.unwrap();
        assert!((average - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_timeline_of_unknown_node_errors() {
        let (service, _) = seeded().await;
        let err = service.node_timeline("aws:::instance:ghost", None).await.unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_group_cost() {
        let (service, ids) = seeded().await;
        let group = GraphGroup::new("payments", GroupType::Application);
        service.storage.upsert_group(&group).await.unwrap();
        service.storage.add_group_member(&group.id, &ids[0]).await.unwrap();
        service.storage.add_group_member(&group.id, &ids[1]).await.unwrap();
        service.storage.add_group_member(&group.id, &ids[2]).await.unwrap();

        let cost = service.group_cost(&group.id).await.unwrap();
        assert_eq!(cost.member_count, 3);
        assert_eq!(cost.costed_members, 2);
        assert_eq!(cost.total_cost_monthly, 215.0);
    }
}
