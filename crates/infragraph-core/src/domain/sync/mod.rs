//! Sync cycles and drift detection
//!
//! # Architecture
//!
//! - `orchestrator`: runs adapters and merges their output into storage
//! - `drift`: field-level diffs between node states
//! - `retention`: how long disappeared nodes are kept

pub mod drift;
pub mod orchestrator;
pub mod retention;

pub use drift::{FieldChange, diff_nodes};
pub use orchestrator::{InferenceSummary, MaintenanceSummary, SyncOrchestrator, SyncWaveReport};
pub use retention::{KeepForever, RetainFor, RetentionPolicy};
