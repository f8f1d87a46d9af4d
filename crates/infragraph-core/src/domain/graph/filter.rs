//! Node query filters
//!
//! Every set field is ANDed. Both storage backends evaluate the same
//! [`NodeFilter::matches`] so their results agree.

use std::collections::BTreeMap;

use super::node::{CloudProvider, GraphNode, NodeStatus, ResourceType};

/// Filter for `query_nodes`
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub provider: Option<CloudProvider>,
    /// Any of these resource types (empty = all)
    pub resource_types: Vec<ResourceType>,
    pub region: Option<String>,
    pub account: Option<String>,
    /// Any of these statuses (empty = all)
    pub statuses: Vec<NodeStatus>,
    /// Every entry must be present with an equal value
    pub tags: BTreeMap<String, String>,
    /// Case-insensitive substring, or a pattern when it contains `*`
    pub name_pattern: Option<String>,
    pub owner: Option<String>,
    pub min_cost: Option<f64>,
    pub max_cost: Option<f64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: CloudProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_types.push(resource_type);
        self
    }

    pub fn status(mut self, status: NodeStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn name(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn cost_between(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_cost = min;
        self.max_cost = max;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check a node against every set field
    pub fn matches(&self, node: &GraphNode) -> bool {
        if self.provider.is_some_and(|p| p != node.provider) {
            return false;
        }
        if !self.resource_types.is_empty() && !self.resource_types.contains(&node.resource_type) {
            return false;
        }
        if self.region.as_ref().is_some_and(|r| r != &node.region) {
            return false;
        }
        if self.account.as_ref().is_some_and(|a| a != &node.account) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&node.status) {
            return false;
        }
        if !self
            .tags
            .iter()
            .all(|(k, v)| node.tags.get(k).is_some_and(|actual| actual == v))
        {
            return false;
        }
        if let Some(pattern) = &self.name_pattern {
            if !name_matches(pattern, &node.name) {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if node.owner.as_ref() != Some(owner) {
                return false;
            }
        }
        if self.min_cost.is_some() || self.max_cost.is_some() {
            let Some(cost) = node.cost_monthly else {
                return false;
            };
            if self.min_cost.is_some_and(|min| cost < min) {
                return false;
            }
            if self.max_cost.is_some_and(|max| cost > max) {
                return false;
            }
        }
        true
    }

    /// Apply offset and limit to an already-filtered list
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0);
        let iter = items.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// Case-insensitive substring match, or `*` wildcard match when present
pub fn name_matches(pattern: &str, name: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let name = name.to_lowercase();
    if !pattern.contains('*') {
        return name.contains(&pattern);
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = name.as_str();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::node::GraphNodeInput;
    use chrono::Utc;

    fn node(name: &str) -> GraphNode {
        let input = GraphNodeInput::new(CloudProvider::Aws, ResourceType::Instance, name)
            .with_name(name)
            .with_location("123", "us-east-1")
            .with_status(NodeStatus::Running)
            .with_tag("env", "prod")
            .with_cost(42.0)
            .with_owner("platform");
        GraphNode::from_input(&input, Utc::now())
    }

    #[test]
    fn test_name_matching() {
        assert!(name_matches("web", "prod-WEB-01"));
        assert!(name_matches("prod-*", "prod-web-01"));
        assert!(name_matches("*-01", "prod-web-01"));
        assert!(name_matches("prod-*-01", "prod-web-01"));
        assert!(!name_matches("prod-*-02", "prod-web-01"));
        assert!(!name_matches("staging-*", "prod-web-01"));
    }

    #[test]
    fn test_filter_fields_are_anded() {
        let n = node("prod-web-01");
        assert!(NodeFilter::new().matches(&n));
        assert!(NodeFilter::new()
            .provider(CloudProvider::Aws)
            .resource_type(ResourceType::Instance)
            .region("us-east-1")
            .tag("env", "prod")
            .owner("platform")
            .matches(&n));
        assert!(!NodeFilter::new()
            .provider(CloudProvider::Aws)
            .tag("env", "dev")
            .matches(&n));
    }

    #[test]
    fn test_set_fields() {
        let n = node("db");
        let filter = NodeFilter::new()
            .resource_type(ResourceType::Database)
            .resource_type(ResourceType::Instance);
        assert!(filter.matches(&n));
        let filter = NodeFilter::new().status(NodeStatus::Stopped).status(NodeStatus::Error);
        assert!(!filter.matches(&n));
    }

    #[test]
    fn test_cost_range_excludes_uncosted() {
        let n = node("x");
        assert!(NodeFilter::new().cost_between(Some(10.0), Some(50.0)).matches(&n));
        assert!(!NodeFilter::new().cost_between(Some(50.0), None).matches(&n));

        let mut uncosted = node("y");
        uncosted.cost_monthly = None;
        assert!(!NodeFilter::new().cost_between(Some(0.0), None).matches(&uncosted));
    }

    #[test]
    fn test_paginate() {
        let filter = NodeFilter {
            offset: Some(1),
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(filter.paginate(vec![1, 2, 3, 4]), vec![2, 3]);
    }
}
