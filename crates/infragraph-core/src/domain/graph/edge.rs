//! Graph edges: typed, confidence-scored relationships between nodes
//!
//! Edges are deduplicated by `(source, target, relationship_type)`. For
//! symmetric relationship types the pair is order-independent: the
//! lexically smaller node id always becomes the source.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Types of relationships, named `source-verb-target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    /// Source is deployed inside target (instance runs-in subnet)
    RunsIn,
    /// Source contains target
    Contains,
    /// Source is a member of target (node member-of cluster)
    MemberOf,
    /// Source is attached to target (network interface, volume)
    AttachedTo,
    /// Source is protected by target (security group, firewall)
    SecuredBy,
    /// Source sends traffic to target (load balancer routes-to instance)
    RoutesTo,
    /// Source and target are peered networks (symmetric)
    PeersWith,
    /// Source depends on target
    DependsOn,
    /// Source reads data from target
    ReadsFrom,
    /// Source writes data to target
    WritesTo,
    /// DNS source resolves to target
    ResolvesTo,
    /// Source identity is authenticated by target identity provider
    AuthenticatedBy,
    /// Source assumes target role
    AssumesRole,
    /// Source publishes to target topic/queue
    PublishesTo,
    /// Source subscribes to target topic/queue
    SubscribesTo,
    /// Source replicates to target
    ReplicatesTo,
}

impl RelationshipType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunsIn => "runs-in",
            Self::Contains => "contains",
            Self::MemberOf => "member-of",
            Self::AttachedTo => "attached-to",
            Self::SecuredBy => "secured-by",
            Self::RoutesTo => "routes-to",
            Self::PeersWith => "peers-with",
            Self::DependsOn => "depends-on",
            Self::ReadsFrom => "reads-from",
            Self::WritesTo => "writes-to",
            Self::ResolvesTo => "resolves-to",
            Self::AuthenticatedBy => "authenticated-by",
            Self::AssumesRole => "assumes-role",
            Self::PublishesTo => "publishes-to",
            Self::SubscribesTo => "subscribes-to",
            Self::ReplicatesTo => "replicates-to",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "runs-in" => Some(Self::RunsIn),
            "contains" => Some(Self::Contains),
            "member-of" => Some(Self::MemberOf),
            "attached-to" => Some(Self::AttachedTo),
            "secured-by" => Some(Self::SecuredBy),
            "routes-to" => Some(Self::RoutesTo),
            "peers-with" => Some(Self::PeersWith),
            "depends-on" => Some(Self::DependsOn),
            "reads-from" => Some(Self::ReadsFrom),
            "writes-to" => Some(Self::WritesTo),
            "resolves-to" => Some(Self::ResolvesTo),
            "authenticated-by" => Some(Self::AuthenticatedBy),
            "assumes-role" => Some(Self::AssumesRole),
            "publishes-to" => Some(Self::PublishesTo),
            "subscribes-to" => Some(Self::SubscribesTo),
            "replicates-to" => Some(Self::ReplicatesTo),
            _ => None,
        }
    }

    /// Check if this relationship type is symmetric
    ///
    /// Symmetric edges are stored once per unordered node pair.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::PeersWith)
    }

    /// Get all relationship types
    pub fn all() -> &'static [RelationshipType] {
        &[
            Self::RunsIn,
            Self::Contains,
            Self::MemberOf,
            Self::AttachedTo,
            Self::SecuredBy,
            Self::RoutesTo,
            Self::PeersWith,
            Self::DependsOn,
            Self::ReadsFrom,
            Self::WritesTo,
            Self::ResolvesTo,
            Self::AuthenticatedBy,
            Self::AssumesRole,
            Self::PublishesTo,
            Self::SubscribesTo,
            Self::ReplicatesTo,
        ]
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an edge was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    ConfigScan,
    ApiField,
    RuntimeTrace,
    IacParse,
    EventStream,
    Manual,
}

impl DiscoveryMethod {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigScan => "config-scan",
            Self::ApiField => "api-field",
            Self::RuntimeTrace => "runtime-trace",
            Self::IacParse => "iac-parse",
            Self::EventStream => "event-stream",
            Self::Manual => "manual",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "config-scan" => Some(Self::ConfigScan),
            "api-field" => Some(Self::ApiField),
            "runtime-trace" => Some(Self::RuntimeTrace),
            "iac-parse" => Some(Self::IacParse),
            "event-stream" => Some(Self::EventStream),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Confidence an edge gets when nothing more specific is known
    pub fn default_confidence(&self) -> f64 {
        match self {
            Self::ApiField | Self::IacParse | Self::Manual => 1.0,
            Self::RuntimeTrace | Self::EventStream => 0.7,
            Self::ConfigScan => 0.5,
        }
    }
}

impl std::fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dedup key of an edge, already canonicalized
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source_node_id: String,
    pub target_node_id: String,
    pub relationship_type: RelationshipType,
}

impl EdgeKey {
    /// Build a key, sorting the pair for symmetric relationship types
    pub fn new(source: &str, target: &str, relationship_type: RelationshipType) -> Self {
        let (source, target) = if relationship_type.is_symmetric() && target < source {
            (target, source)
        } else {
            (source, target)
        };
        Self {
            source_node_id: source.to_string(),
            target_node_id: target.to_string(),
            relationship_type,
        }
    }

    /// Deterministic edge id derived from the key
    pub fn edge_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_node_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.relationship_type.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.target_node_id.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }
}

/// A stored graph edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub relationship_type: RelationshipType,
    /// Confidence score (0.0 to 1.0)
    pub confidence: f64,
    pub discovered_via: DiscoveryMethod,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl GraphEdge {
    /// Materialize a fresh edge from a (canonicalized) input
    pub fn from_input(input: &GraphEdgeInput, now: DateTime<Utc>) -> Self {
        let key = input.key();
        Self {
            id: key.edge_id(),
            source_node_id: key.source_node_id,
            target_node_id: key.target_node_id,
            relationship_type: input.relationship_type,
            confidence: input.confidence.clamp(0.0, 1.0),
            discovered_via: input.discovered_via,
            metadata: input.metadata.clone(),
            created_at: now,
            last_seen_at: now,
        }
    }

    /// Re-confirm this edge with a new observation
    ///
    /// Confidence and method only move when the new evidence is strictly
    /// stronger; re-discovery never downgrades an edge.
    pub fn reconfirm(&mut self, input: &GraphEdgeInput, now: DateTime<Utc>) {
        let confidence = input.confidence.clamp(0.0, 1.0);
        if confidence > self.confidence {
            self.confidence = confidence;
            self.discovered_via = input.discovered_via;
        }
        self.metadata = input.metadata.clone();
        self.last_seen_at = now;
    }

    /// The node on the other end of this edge, if `node_id` is an endpoint
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.source_node_id == node_id {
            Some(&self.target_node_id)
        } else if self.target_node_id == node_id {
            Some(&self.source_node_id)
        } else {
            None
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.source_node_id, &self.target_node_id, self.relationship_type)
    }
}

/// Adapter- or engine-submitted edge description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdgeInput {
    pub source_node_id: String,
    pub target_node_id: String,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub discovered_via: DiscoveryMethod,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl GraphEdgeInput {
    /// Create an edge input with the method's default confidence
    pub fn new(
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
        relationship_type: RelationshipType,
        discovered_via: DiscoveryMethod,
    ) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            relationship_type,
            confidence: discovered_via.default_confidence(),
            discovered_via,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the confidence (clamped to 0.0-1.0)
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Canonical dedup key
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(&self.source_node_id, &self.target_node_id, self.relationship_type)
    }

    /// Return this input with its endpoints in canonical order
    pub fn canonicalized(mut self) -> Self {
        let key = self.key();
        self.source_node_id = key.source_node_id;
        self.target_node_id = key.target_node_id;
        self
    }
}
