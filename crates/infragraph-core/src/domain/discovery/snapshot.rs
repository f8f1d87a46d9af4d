//! Discovery adapter backed by an exported inventory snapshot
//!
//! A snapshot file is either a bare JSON array of vendor records or a
//! document of the form
//!
//! ```json
//! {
//!   "provider": "aws",
//!   "resources": [ { "nativeId": "vpc-1", "resourceType": "vpc", ... } ],
//!   "relationships": [ { "source": "i-1", "target": "vpc-1", "relationshipType": "runs-in" } ]
//! }
//! ```
//!
//! Relationship endpoints are native ids within the same snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use async_trait::async_trait;
use futures_util::future;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::adapter::{DiscoveryAdapter, DiscoveryOptions, DiscoveryResult};
use super::concurrent::enumerate_concurrently;
use super::linker::ApiFieldLinker;
use super::normalize::record_to_node_input;
use crate::domain::graph::{
    CloudProvider, DiscoveryMethod, EdgeKey, GraphEdgeInput, GraphNodeInput, RelationshipType,
    ResourceType,
};
use crate::error::{Error, Result};

/// Explicit relationship carried by a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRelationship {
    /// Native id of the source resource
    pub source: String,
    /// Native id of the target resource
    pub target: String,
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    resources: Vec<Value>,
    #[serde(default)]
    relationships: Vec<SnapshotRelationship>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Records(Vec<Value>),
    Document(SnapshotDocument),
}

/// Adapter replaying a recorded inventory
pub struct SnapshotAdapter {
    provider: CloudProvider,
    display_name: String,
    records: Vec<Value>,
    relationships: Vec<SnapshotRelationship>,
    failures: BTreeMap<ResourceType, String>,
    unavailable: Option<String>,
    concurrency: usize,
}

impl SnapshotAdapter {
    /// Create an adapter over in-memory records
    pub fn from_records(provider: CloudProvider, records: Vec<Value>) -> Self {
        Self {
            provider,
            display_name: format!("{} snapshot", provider),
            records,
            relationships: Vec::new(),
            failures: BTreeMap::new(),
            unavailable: None,
            concurrency: 4,
        }
    }

    /// Parse a snapshot document or record array
    pub fn from_json_str(provider: CloudProvider, json: &str) -> Result<Self> {
        match serde_json::from_str::<SnapshotFile>(json)? {
            SnapshotFile::Records(records) => Ok(Self::from_records(provider, records)),
            SnapshotFile::Document(doc) => {
                if let Some(declared) = doc.provider.as_deref() {
                    if CloudProvider::parse(declared) != Some(provider) {
                        return Err(Error::InvalidInput(format!(
                            "snapshot declares provider '{}' but was loaded for '{}'",
                            declared, provider
                        )));
                    }
                }
                Ok(Self::from_records(provider, doc.resources).with_relationships(doc.relationships))
            }
        }
    }

    /// Load a snapshot file
    pub fn from_file(provider: CloudProvider, path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let adapter = Self::from_json_str(provider, &contents)?;
        info!(
            provider = %provider,
            path = %path.display(),
            records = adapter.records.len(),
            "Loaded inventory snapshot"
        );
        Ok(adapter.with_display_name(format!("{} snapshot ({})", provider, path.display())))
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_relationships(mut self, relationships: Vec<SnapshotRelationship>) -> Self {
        self.relationships.extend(relationships);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Make enumeration of one resource type fail with `message`
    pub fn with_failure(mut self, resource_type: ResourceType, message: impl Into<String>) -> Self {
        self.failures.insert(resource_type, message.into());
        self
    }

    /// Make the adapter refuse to run at all
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }

    /// Normalize every record, grouping the survivors by resource type
    fn normalize(&self) -> (BTreeMap<ResourceType, Vec<GraphNodeInput>>, Vec<String>) {
        let mut by_type: BTreeMap<ResourceType, Vec<GraphNodeInput>> = BTreeMap::new();
        let mut errors = Vec::new();
        for (index, record) in self.records.iter().enumerate() {
            match record_to_node_input(self.provider, record) {
                Ok(node) => by_type.entry(node.resource_type).or_default().push(node),
                Err(message) => errors.push(format!("record {}: {}", index, message)),
            }
        }
        (by_type, errors)
    }

    fn explicit_edges(&self, nodes: &[GraphNodeInput]) -> Vec<GraphEdgeInput> {
        let by_native_id: HashMap<&str, String> = nodes
            .iter()
            .map(|n| (n.native_id.as_str(), n.id()))
            .collect();

        let mut edges = Vec::new();
        for rel in &self.relationships {
            let (Some(source), Some(target)) = (
                by_native_id.get(rel.source.as_str()),
                by_native_id.get(rel.target.as_str()),
            ) else {
                debug!(source = %rel.source, target = %rel.target, "Snapshot relationship endpoint not in result");
                continue;
            };
            let mut edge = GraphEdgeInput::new(
                source.clone(),
                target.clone(),
                rel.relationship_type,
                DiscoveryMethod::ApiField,
            );
            if let Some(confidence) = rel.confidence {
                edge = edge.with_confidence(confidence);
            }
            edge.metadata = rel.metadata.clone();
            edges.push(edge.canonicalized());
        }
        edges
    }
}

#[async_trait]
impl DiscoveryAdapter for SnapshotAdapter {
    fn provider(&self) -> CloudProvider {
        self.provider
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn supported_resource_types(&self) -> Vec<ResourceType> {
        let mut types: BTreeSet<ResourceType> = self
            .records
            .iter()
            .filter_map(|r| {
                ["resourceType", "type", "kind"]
                    .iter()
                    .find_map(|k| r.get(*k).and_then(Value::as_str))
                    .and_then(ResourceType::parse)
            })
            .collect();
        types.extend(self.failures.keys().copied());
        types.into_iter().collect()
    }

    async fn discover(&self, options: &DiscoveryOptions) -> Result<DiscoveryResult> {
        if let Some(reason) = &self.unavailable {
            return Err(Error::AdapterUnavailable(
                self.provider.to_string(),
                reason.clone(),
            ));
        }

        let (by_type, mut errors) = self.normalize();
        let types: Vec<ResourceType> = self
            .supported_resource_types()
            .into_iter()
            .filter(|rt| options.wants_type(*rt))
            .collect();

        let enumeration = enumerate_concurrently(types, self.concurrency, |resource_type| {
            let outcome = match self.failures.get(&resource_type) {
                Some(message) => Err(message.clone()),
                None => Ok(by_type.get(&resource_type).cloned().unwrap_or_default()),
            };
            future::ready(outcome)
        })
        .await;
        errors.extend(enumeration.errors);

        let nodes = options.apply(enumeration.nodes);

        let mut seen: BTreeSet<EdgeKey> = BTreeSet::new();
        let mut edges = Vec::new();
        let linked = ApiFieldLinker::new(&nodes).link(&nodes);
        for edge in linked.into_iter().chain(self.explicit_edges(&nodes)) {
            if seen.insert(edge.key()) {
                edges.push(edge);
            }
        }

        debug!(
            provider = %self.provider,
            nodes = nodes.len(),
            edges = edges.len(),
            errors = errors.len(),
            "Snapshot discovery finished"
        );

        Ok(DiscoveryResult {
            provider: self.provider,
            nodes,
            edges,
            errors,
        })
    }

    async fn health_check(&self) -> bool {
        self.unavailable.is_none()
    }
}
