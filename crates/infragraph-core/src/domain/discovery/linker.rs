//! Same-provider edges read from API reference fields

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::domain::graph::{
    CloudProvider, DiscoveryMethod, EdgeKey, GraphEdgeInput, GraphNodeInput, RelationshipType,
};

/// Reference fields and the relationship each one implies, source being the
/// record that carries the field
const REFERENCE_FIELDS: &[(&str, RelationshipType)] = &[
    ("vpcId", RelationshipType::RunsIn),
    ("subnetId", RelationshipType::RunsIn),
    ("subnetIds", RelationshipType::RunsIn),
    ("networkInterfaceIds", RelationshipType::AttachedTo),
    ("securityGroupIds", RelationshipType::SecuredBy),
    ("namespace", RelationshipType::RunsIn),
    ("clusterId", RelationshipType::MemberOf),
    ("targetIds", RelationshipType::RoutesTo),
    ("roleArn", RelationshipType::AssumesRole),
    ("zoneId", RelationshipType::MemberOf),
];

/// Derives `api-field` edges between nodes of one provider
///
/// A reference resolves to a node with that native id, or failing that to
/// the only node with that name. Ambiguous names and references to nodes
/// outside the batch produce no edge.
#[derive(Debug, Default)]
pub struct ApiFieldLinker {
    by_native_id: HashMap<(CloudProvider, String), String>,
    by_name: HashMap<(CloudProvider, String), Vec<String>>,
}

impl ApiFieldLinker {
    pub fn new(nodes: &[GraphNodeInput]) -> Self {
        let mut linker = Self::default();
        for node in nodes {
            let id = node.id();
            linker
                .by_native_id
                .insert((node.provider, node.native_id.clone()), id.clone());
            linker
                .by_name
                .entry((node.provider, node.name.clone()))
                .or_default()
                .push(id);
        }
        linker
    }

    /// Resolve a reference to a node id
    pub fn resolve(&self, provider: CloudProvider, reference: &str) -> Option<&str> {
        let key = (provider, reference.to_string());
        if let Some(id) = self.by_native_id.get(&key) {
            return Some(id.as_str());
        }
        match self.by_name.get(&key).map(Vec::as_slice) {
            Some([only]) => Some(only.as_str()),
            _ => None,
        }
    }

    /// Edges implied by one node's reference fields
    pub fn edges_for(&self, node: &GraphNodeInput) -> Vec<GraphEdgeInput> {
        let source = node.id();
        let mut edges = Vec::new();

        for (field, relationship_type) in REFERENCE_FIELDS {
            for reference in references(node.metadata.get(*field)) {
                let Some(target) = self.resolve(node.provider, reference) else {
                    continue;
                };
                if target == source {
                    continue;
                }
                edges.push(
                    GraphEdgeInput::new(
                        source.clone(),
                        target,
                        *relationship_type,
                        DiscoveryMethod::ApiField,
                    )
                    .with_metadata("field", Value::String((*field).to_string())),
                );
            }
        }
        edges
    }

    /// Edges for every node, deduplicated by canonical key
    pub fn link(&self, nodes: &[GraphNodeInput]) -> Vec<GraphEdgeInput> {
        let mut seen: BTreeSet<EdgeKey> = BTreeSet::new();
        let mut edges = Vec::new();
        for node in nodes {
            for edge in self.edges_for(node) {
                if seen.insert(edge.key()) {
                    edges.push(edge.canonicalized());
                }
            }
        }
        edges
    }
}

fn references(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::ResourceType;
    use serde_json::json;

    fn aws(resource_type: ResourceType, native_id: &str) -> GraphNodeInput {
        GraphNodeInput::new(CloudProvider::Aws, resource_type, native_id)
            .with_location("111", "us-east-1")
    }

    #[test]
    fn test_links_reference_fields() {
        let vpc = aws(ResourceType::Vpc, "vpc-1");
        let subnet = aws(ResourceType::Subnet, "subnet-1").with_metadata("vpcId", json!("vpc-1"));
        let sg = aws(ResourceType::SecurityGroup, "sg-1");
        let instance = aws(ResourceType::Instance, "i-1")
            .with_metadata("subnetId", json!("subnet-1"))
            .with_metadata("securityGroupIds", json!(["sg-1", "sg-missing"]));
        let nodes = vec![vpc.clone(), subnet.clone(), sg.clone(), instance.clone()];

        let edges = ApiFieldLinker::new(&nodes).link(&nodes);
        assert_eq!(edges.len(), 3);

        let keys: Vec<_> = edges.iter().map(|e| e.key()).collect();
        assert!(keys.contains(&EdgeKey::new(&subnet.id(), &vpc.id(), RelationshipType::RunsIn)));
        assert!(keys.contains(&EdgeKey::new(&instance.id(), &subnet.id(), RelationshipType::RunsIn)));
        assert!(keys.contains(&EdgeKey::new(&instance.id(), &sg.id(), RelationshipType::SecuredBy)));
        assert!(edges.iter().all(|e| e.confidence == 1.0));
        assert!(edges.iter().all(|e| e.discovered_via == DiscoveryMethod::ApiField));
    }

    #[test]
    fn test_name_resolution_requires_uniqueness() {
        let ns = GraphNodeInput::new(CloudProvider::Kubernetes, ResourceType::Namespace, "ns/payments")
            .with_name("payments");
        let pod = GraphNodeInput::new(CloudProvider::Kubernetes, ResourceType::Pod, "payments/pod/api-0")
            .with_metadata("namespace", json!("payments"));

        let nodes = vec![ns.clone(), pod.clone()];
        let edges = ApiFieldLinker::new(&nodes).link(&nodes);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_node_id, ns.id());

        let dup = GraphNodeInput::new(CloudProvider::Kubernetes, ResourceType::Service, "svc/payments")
            .with_name("payments");
        let nodes = vec![ns, pod, dup];
        assert!(ApiFieldLinker::new(&nodes).link(&nodes).is_empty());
    }

    #[test]
    fn test_no_self_or_cross_provider_links() {
        let vpc = aws(ResourceType::Vpc, "vpc-1").with_metadata("vpcId", json!("vpc-1"));
        let gcp = GraphNodeInput::new(CloudProvider::Gcp, ResourceType::Instance, "vm-1")
            .with_metadata("vpcId", json!("vpc-1"));
        let nodes = vec![vpc, gcp];
        assert!(ApiFieldLinker::new(&nodes).link(&nodes).is_empty());
    }
}
