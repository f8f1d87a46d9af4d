//! Provider discovery
//!
//! Adapters enumerate one provider's resources and hand back normalized
//! node inputs plus the relationships the provider's own APIs report.
//!
//! # Architecture
//!
//! - `adapter`: the `DiscoveryAdapter` trait, options and results
//! - `normalize`: vendor record to node input conversion
//! - `linker`: api-field edges from reference fields
//! - `concurrent`: bounded-parallel per-type enumeration
//! - `snapshot`: an adapter replaying an exported inventory

pub mod adapter;
pub mod concurrent;
pub mod linker;
pub mod normalize;
pub mod snapshot;

pub use adapter::{DiscoveryAdapter, DiscoveryOptions, DiscoveryResult};
pub use concurrent::{Enumeration, enumerate_concurrently};
pub use linker::ApiFieldLinker;
pub use normalize::{normalize_address_space, normalize_status, normalize_tags, record_to_node_input};
pub use snapshot::{SnapshotAdapter, SnapshotRelationship};
