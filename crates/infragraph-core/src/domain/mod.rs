//! Domain layer
//!
//! # Architecture
//!
//! - `graph`: nodes, edges, the change ledger and the `GraphStorage` trait
//! - `discovery`: the adapter contract and shared normalization plumbing
//! - `inference`: cross-cloud relationship rules
//! - `sync`: discovery cycles, drift detection and retention
//! - `query`: traversals and rollups for consumers

pub mod discovery;
pub mod graph;
pub mod inference;
pub mod query;
pub mod sync;

pub use discovery::{DiscoveryAdapter, DiscoveryOptions, DiscoveryResult, SnapshotAdapter};
pub use graph::{
    CloudProvider, GraphChange, GraphEdge, GraphNode, GraphStorage, NodeStatus, RelationshipType,
    ResourceType,
};
pub use inference::RelationshipInferenceEngine;
pub use query::{CrossCloudSummary, GraphQueryService};
pub use sync::{SyncOrchestrator, SyncWaveReport};
