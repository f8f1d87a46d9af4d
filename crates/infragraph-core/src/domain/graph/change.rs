//! Change ledger entries
//!
//! Changes are append-only. Storage assigns each one an id, a detection
//! timestamp and a monotonically increasing sequence number; nothing ever
//! updates or deletes them afterwards.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of observed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    NodeCreated,
    NodeUpdated,
    NodeDeleted,
    NodeDisappeared,
    NodeDrifted,
    EdgeCreated,
    EdgeDeleted,
    CostChanged,
}

impl ChangeType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeCreated => "node-created",
            Self::NodeUpdated => "node-updated",
            Self::NodeDeleted => "node-deleted",
            Self::NodeDisappeared => "node-disappeared",
            Self::NodeDrifted => "node-drifted",
            Self::EdgeCreated => "edge-created",
            Self::EdgeDeleted => "edge-deleted",
            Self::CostChanged => "cost-changed",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node-created" => Some(Self::NodeCreated),
            "node-updated" => Some(Self::NodeUpdated),
            "node-deleted" => Some(Self::NodeDeleted),
            "node-disappeared" => Some(Self::NodeDisappeared),
            "node-drifted" => Some(Self::NodeDrifted),
            "edge-created" => Some(Self::EdgeCreated),
            "edge-deleted" => Some(Self::EdgeDeleted),
            "cost-changed" => Some(Self::CostChanged),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger target id for an edge
pub fn edge_target_id(edge_id: &str) -> String {
    format!("edge:{}", edge_id)
}

/// A recorded change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphChange {
    pub id: String,
    /// Position in detection order
    pub sequence: i64,
    /// Node id, or `edge:<edgeId>`
    pub target_id: String,
    pub change_type: ChangeType,
    pub field: Option<String>,
    /// JSON-serialized value before the change
    pub previous_value: Option<String>,
    /// JSON-serialized value after the change
    pub new_value: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub detected_via: String,
    /// Sync record that produced this change
    pub correlation_id: Option<String>,
    pub initiator: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

/// Change submitted for appending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphChangeInput {
    pub target_id: String,
    pub change_type: ChangeType,
    pub field: Option<String>,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub detected_via: String,
    pub correlation_id: Option<String>,
    pub initiator: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl GraphChangeInput {
    /// Create a change with no field details
    pub fn new(target_id: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            target_id: target_id.into(),
            change_type,
            field: None,
            previous_value: None,
            new_value: None,
            detected_via: "sync".to_string(),
            correlation_id: None,
            initiator: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Record a field-level transition; values are JSON-serialized
    pub fn with_field(mut self, field: impl Into<String>, previous: &Value, new: &Value) -> Self {
        self.field = Some(field.into());
        self.previous_value = Some(previous.to_string());
        self.new_value = Some(new.to_string());
        self
    }

    /// Attach the sync record that produced this change
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set how the change was detected
    pub fn detected_via(mut self, via: impl Into<String>) -> Self {
        self.detected_via = via.into();
        self
    }

    /// Set who initiated the change
    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    /// Finalize into a stored change
    pub fn into_change(self, id: String, sequence: i64, detected_at: DateTime<Utc>) -> GraphChange {
        GraphChange {
            id,
            sequence,
            target_id: self.target_id,
            change_type: self.change_type,
            field: self.field,
            previous_value: self.previous_value,
            new_value: self.new_value,
            detected_at,
            detected_via: self.detected_via,
            correlation_id: self.correlation_id,
            initiator: self.initiator,
            metadata: self.metadata,
        }
    }
}

/// Filter for reading the ledger
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    pub target_id: Option<String>,
    pub change_types: Vec<ChangeType>,
    pub correlation_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ChangeFilter {
    /// Changes recorded against a single target
    pub fn for_target(target_id: impl Into<String>) -> Self {
        Self {
            target_id: Some(target_id.into()),
            ..Default::default()
        }
    }

    /// Check a change against every set field
    pub fn matches(&self, change: &GraphChange) -> bool {
        if let Some(target) = &self.target_id {
            if &change.target_id != target {
                return false;
            }
        }
        if !self.change_types.is_empty() && !self.change_types.contains(&change.change_type) {
            return false;
        }
        if let Some(correlation) = &self.correlation_id {
            if change.correlation_id.as_ref() != Some(correlation) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if change.detected_at < since {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_values_are_json_serialized() {
        let change = GraphChangeInput::new("n1", ChangeType::NodeUpdated)
            .with_field("status", &json!("running"), &json!("stopped"));
        assert_eq!(change.previous_value.as_deref(), Some("\"running\""));
        assert_eq!(change.new_value.as_deref(), Some("\"stopped\""));
    }

    #[test]
    fn test_edge_target_id() {
        assert_eq!(edge_target_id("abc"), "edge:abc");
    }

    #[test]
    fn test_filter_matches() {
        let change = GraphChangeInput::new("n1", ChangeType::CostChanged)
            .with_correlation("sync-1")
            .into_change("c1".into(), 1, Utc::now());

        assert!(ChangeFilter::for_target("n1").matches(&change));
        assert!(!ChangeFilter::for_target("n2").matches(&change));

        let by_type = ChangeFilter {
            change_types: vec![ChangeType::NodeCreated],
            ..Default::default()
        };
        assert!(!by_type.matches(&change));

        let by_sync = ChangeFilter {
            correlation_id: Some("sync-1".into()),
            ..Default::default()
        };
        assert!(by_sync.matches(&change));
    }

    #[test]
    fn test_change_type_round_trip_names() {
        assert_eq!(ChangeType::parse("node-disappeared"), Some(ChangeType::NodeDisappeared));
        assert_eq!(ChangeType::parse("bogus"), None);
    }
}
