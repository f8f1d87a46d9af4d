//! Relationship inference across providers

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info};

use super::rules::{InferenceRule, Pairing, default_rules};
use crate::config::InferenceConfig;
use crate::domain::graph::{
    DiscoveryMethod, EdgeKey, GraphEdgeInput, GraphNode, NodeStatus,
};

/// Evaluates the rule registry over a node set
pub struct RelationshipInferenceEngine {
    config: InferenceConfig,
    rules: Vec<InferenceRule>,
}

impl RelationshipInferenceEngine {
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            config,
            rules: default_rules(),
        }
    }

    /// Replace the rule registry
    pub fn with_rules(mut self, rules: Vec<InferenceRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &[InferenceRule] {
        &self.rules
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Infer edges between nodes of different providers
    ///
    /// Rules run in registry order and each sees candidate pairs in node-id
    /// order, so the output is deterministic for a given input. The first
    /// rule to produce a `(source, target, type)` triple wins. Disappeared
    /// nodes are not considered.
    pub fn discover_cross_cloud_relationships(&self, nodes: &[GraphNode]) -> Vec<GraphEdgeInput> {
        let mut live: Vec<&GraphNode> = nodes
            .iter()
            .filter(|n| n.status != NodeStatus::Disappeared)
            .collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen: BTreeSet<EdgeKey> = BTreeSet::new();
        let mut edges = Vec::new();
        let mut skipped = 0usize;

        for rule in &self.rules {
            let before = edges.len();
            for (source, target) in candidate_pairs(rule, &live) {
                let outcome = match (rule.matcher)(&self.config, source, target) {
                    Ok(outcome) => outcome,
                    Err(reason) => {
                        skipped += 1;
                        debug!(
                            rule = rule.name,
                            source = %source.id,
                            target = %target.id,
                            reason = %reason,
                            "Skipped inference on malformed input"
                        );
                        continue;
                    }
                };
                for found in outcome {
                    if !rule.relationship_types.contains(&found.relationship_type) {
                        debug!(
                            rule = rule.name,
                            relationship_type = %found.relationship_type,
                            "Rule returned an undeclared relationship type"
                        );
                        continue;
                    }

                    let mut edge = GraphEdgeInput::new(
                        source.id.clone(),
                        target.id.clone(),
                        found.relationship_type,
                        DiscoveryMethod::ConfigScan,
                    )
                    .with_confidence(found.confidence)
                    .canonicalized();
                    edge.metadata = found.metadata;
                    edge.metadata
                        .insert("rule".to_string(), Value::String(rule.name.to_string()));

                    if seen.insert(edge.key()) {
                        edges.push(edge);
                    }
                }
            }
            debug!(rule = rule.name, edges = edges.len() - before, "Rule evaluated");
        }

        info!(
            nodes = live.len(),
            edges = edges.len(),
            skipped,
            "Cross-cloud inference finished"
        );
        edges
    }
}

/// Candidate `(source, target)` pairs for one rule, in deterministic order
fn candidate_pairs<'a>(rule: &InferenceRule, nodes: &[&'a GraphNode]) -> Vec<(&'a GraphNode, &'a GraphNode)> {
    let mut pairs = Vec::new();
    match rule.pairing {
        Pairing::Ordered => {
            for source in nodes.iter().copied().filter(|n| rule.admits_source(n)) {
                for target in nodes.iter().copied() {
                    if source.id != target.id && rule.admits(source, target) {
                        pairs.push((source, target));
                    }
                }
            }
        }
        Pairing::Unordered => {
            for (i, a) in nodes.iter().copied().enumerate() {
                for b in nodes[i + 1..].iter().copied() {
                    if rule.admits(a, b) || rule.admits(b, a) {
                        pairs.push((a, b));
                    }
                }
            }
        }
    }
    pairs
}
