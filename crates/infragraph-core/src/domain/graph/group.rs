//! Logical groupings of nodes (applications, teams, environments)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupType {
    Application,
    Team,
    Environment,
    CostCenter,
    Custom,
}

impl GroupType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Team => "team",
            Self::Environment => "environment",
            Self::CostCenter => "cost-center",
            Self::Custom => "custom",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "application" | "app" => Some(Self::Application),
            "team" => Some(Self::Team),
            "environment" | "env" => Some(Self::Environment),
            "cost-center" => Some(Self::CostCenter),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for GroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named group of nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphGroup {
    pub id: String,
    pub name: String,
    pub group_type: GroupType,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GraphGroup {
    /// Create a new group
    pub fn new(name: impl Into<String>, group_type: GroupType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            group_type,
            description: None,
            owner: None,
            tags: BTreeMap::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Junction row between a group and a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphGroupMember {
    pub group_id: String,
    pub node_id: String,
    pub added_at: DateTime<Utc>,
}

/// Cost rolled up from a group's members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCost {
    pub group_id: String,
    pub member_count: usize,
    /// Members with a known cost
    pub costed_members: usize,
    pub total_cost_monthly: f64,
}
