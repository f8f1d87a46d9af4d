//! Infrastructure graph domain model
//!
//! Nodes are discovered resources, edges are typed relationships between
//! them, and changes form an append-only ledger of what moved between sync
//! cycles.
//!
//! # Architecture
//!
//! - `node`: resources and their deterministic ids
//! - `edge`: relationships, confidence and canonical dedup keys
//! - `change`: ledger entries and filters
//! - `group`: logical groupings with cost rollup
//! - `sync_record`: per-cycle discovery records
//! - `filter`: node query filters shared by every backend
//! - `storage`: the `GraphStorage` trait

pub mod change;
pub mod edge;
pub mod filter;
pub mod group;
pub mod node;
pub mod storage;
pub mod sync_record;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

pub use change::{ChangeFilter, ChangeType, GraphChange, GraphChangeInput, edge_target_id};
pub use edge::{DiscoveryMethod, EdgeKey, GraphEdge, GraphEdgeInput, RelationshipType};
pub use filter::{NodeFilter, name_matches};
pub use group::{GraphGroup, GraphGroupMember, GroupCost, GroupType};
pub use node::{CloudProvider, GraphNode, GraphNodeInput, NodeStatus, ResourceType, node_id};
pub use storage::{
    EdgeUpsert, GraphStats, GraphStorage, NodeUpsert, Subgraph, TraversalDirection,
    TraversalLimits,
};
pub use sync_record::{SyncRecord, SyncStatus};

/// Current time at the precision storage persists
///
/// Backends stamp with this so a value read back equals the value returned
/// from the write that produced it.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Render a timestamp the way storage persists it
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_timestamps_sort_chronologically() {
        let earlier = timestamp_now();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
        assert!(format_timestamp(&earlier).ends_with('Z'));
    }
}
