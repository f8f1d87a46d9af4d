//! Infragraph Core Library
//!
//! This crate provides the core functionality for Infragraph, including:
//! - Graph model (nodes, edges, change ledger, groups, sync records)
//! - Storage (SQLite + in-memory backends behind one trait)
//! - Discovery adapter contract and normalization helpers
//! - Cross-cloud relationship inference
//! - Sync orchestration and drift detection
//! - Graph queries (blast radius, dependency chain, timelines)

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::graph::{
        CloudProvider, GraphEdgeInput, GraphNodeInput, GraphStorage, NodeFilter, RelationshipType,
        ResourceType, TraversalDirection,
    };
    pub use crate::domain::{DiscoveryAdapter, GraphQueryService, SyncOrchestrator};
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::{InMemoryGraphStorage, SqliteGraphStorage};
}
