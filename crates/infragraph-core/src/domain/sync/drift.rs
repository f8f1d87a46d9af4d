//! Field-level diff between two states of a node

use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::domain::graph::{ChangeType, GraphChangeInput, GraphNode};

/// One field that moved between two node states
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub change_type: ChangeType,
    /// `name`, `costMonthly`, `tags.<key>`, `metadata.<key>`, ...
    pub field: String,
    pub previous: Value,
    pub new: Value,
}

impl FieldChange {
    fn new(change_type: ChangeType, field: impl Into<String>, previous: Value, new: Value) -> Self {
        Self {
            change_type,
            field: field.into(),
            previous,
            new,
        }
    }

    /// Ledger entry for this change against `target_id`
    pub fn to_change_input(&self, target_id: &str) -> GraphChangeInput {
        GraphChangeInput::new(target_id, self.change_type).with_field(
            self.field.clone(),
            &self.previous,
            &self.new,
        )
    }
}

/// Compare two states of the same node
///
/// Cost moves are `cost-changed`, per-key tag and metadata moves are
/// `node-drifted`, and every other input-controlled field is `node-updated`.
/// Server-managed timestamps are ignored.
pub fn diff_nodes(previous: &GraphNode, current: &GraphNode) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if previous.name != current.name {
        changes.push(FieldChange::new(
            ChangeType::NodeUpdated,
            "name",
            json!(previous.name),
            json!(current.name),
        ));
    }
    if previous.status != current.status {
        changes.push(FieldChange::new(
            ChangeType::NodeUpdated,
            "status",
            json!(previous.status),
            json!(current.status),
        ));
    }
    if previous.owner != current.owner {
        changes.push(FieldChange::new(
            ChangeType::NodeUpdated,
            "owner",
            json!(previous.owner),
            json!(current.owner),
        ));
    }
    if previous.created_at != current.created_at {
        changes.push(FieldChange::new(
            ChangeType::NodeUpdated,
            "createdAt",
            json!(previous.created_at),
            json!(current.created_at),
        ));
    }
    if previous.cost_monthly != current.cost_monthly {
        changes.push(FieldChange::new(
            ChangeType::CostChanged,
            "costMonthly",
            json!(previous.cost_monthly),
            json!(current.cost_monthly),
        ));
    }

    let tag_keys: BTreeSet<&String> = previous.tags.keys().chain(current.tags.keys()).collect();
    for key in tag_keys {
        let before = previous.tags.get(key);
        let after = current.tags.get(key);
        if before != after {
            changes.push(FieldChange::new(
                ChangeType::NodeDrifted,
                format!("tags.{}", key),
                json!(before),
                json!(after),
            ));
        }
    }

    let metadata_keys: BTreeSet<&String> = previous
        .metadata
        .keys()
        .chain(current.metadata.keys())
        .collect();
    for key in metadata_keys {
        let before = previous.metadata.get(key);
        let after = current.metadata.get(key);
        if before != after {
            changes.push(FieldChange::new(
                ChangeType::NodeDrifted,
                format!("metadata.{}", key),
                before.cloned().unwrap_or(Value::Null),
                after.cloned().unwrap_or(Value::Null),
            ));
        }
    }

    changes
}
