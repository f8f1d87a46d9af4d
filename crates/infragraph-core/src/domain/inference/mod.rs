//! Cross-cloud relationship inference
//!
//! Providers only report relationships inside their own boundary. The
//! engine here looks at the merged node set and proposes lower-confidence
//! edges between resources that live in different clouds.

pub mod cidr;
pub mod engine;
pub mod rules;

pub use cidr::{Ipv4Cidr, cidrs_from_metadata};
pub use engine::RelationshipInferenceEngine;
pub use rules::{
    InferenceRule, MatchResult, Matcher, Pairing, RuleMatch, StorageRef, default_rules,
    parse_storage_uri,
};
