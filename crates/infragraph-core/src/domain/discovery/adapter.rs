//! The contract every provider integration satisfies

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::graph::{CloudProvider, GraphEdgeInput, GraphNodeInput, ResourceType};
use crate::error::Result;

/// Options narrowing a discovery run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryOptions {
    /// Only resources carrying every one of these tags
    pub tags: BTreeMap<String, String>,
    /// Maximum nodes to report
    pub limit: Option<usize>,
    /// Only these resource types (empty = all supported)
    pub resource_types: Vec<ResourceType>,
    /// Only these regions (empty = all)
    pub regions: Vec<String>,
}

impl DiscoveryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_types.push(resource_type);
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.regions.push(region.into());
        self
    }

    /// Whether the run sees less than the provider's full inventory
    pub fn is_scoped(&self) -> bool {
        !self.tags.is_empty()
            || self.limit.is_some()
            || !self.resource_types.is_empty()
            || !self.regions.is_empty()
    }

    /// Whether this resource type should be enumerated at all
    pub fn wants_type(&self, resource_type: ResourceType) -> bool {
        self.resource_types.is_empty() || self.resource_types.contains(&resource_type)
    }

    /// Post-normalization filter on tags and region
    pub fn admits(&self, node: &GraphNodeInput) -> bool {
        if !self.regions.is_empty() && !self.regions.contains(&node.region) {
            return false;
        }
        self.tags
            .iter()
            .all(|(k, v)| node.tags.get(k).is_some_and(|actual| actual == v))
    }

    /// Apply filters and the limit to normalized nodes
    ///
    /// Nodes are ordered by id first so a limit always keeps the same subset.
    pub fn apply(&self, mut nodes: Vec<GraphNodeInput>) -> Vec<GraphNodeInput> {
        nodes.retain(|n| self.wants_type(n.resource_type) && self.admits(n));
        nodes.sort_by_key(|n| n.id());
        if let Some(limit) = self.limit {
            nodes.truncate(limit);
        }
        nodes
    }
}

/// What one adapter run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub provider: CloudProvider,
    pub nodes: Vec<GraphNodeInput>,
    /// Same-provider relationships read straight from API fields
    pub edges: Vec<GraphEdgeInput>,
    /// Non-fatal failures, one per failed enumeration or skipped record
    pub errors: Vec<String>,
}

impl DiscoveryResult {
    pub fn empty(provider: CloudProvider) -> Self {
        Self {
            provider,
            nodes: Vec::new(),
            edges: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A provider integration
///
/// `discover` returns `Err` only when the adapter could not be invoked at
/// all. Failures of individual resource types are reported in
/// [`DiscoveryResult::errors`] and never block the other types.
#[async_trait]
pub trait DiscoveryAdapter: Send + Sync {
    fn provider(&self) -> CloudProvider;

    fn display_name(&self) -> &str;

    fn supported_resource_types(&self) -> Vec<ResourceType>;

    async fn discover(&self, options: &DiscoveryOptions) -> Result<DiscoveryResult>;

    async fn health_check(&self) -> bool;

    fn supports_incremental_sync(&self) -> bool {
        false
    }
}
