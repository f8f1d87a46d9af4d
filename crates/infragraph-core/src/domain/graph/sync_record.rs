//! Per-cycle discovery records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::CloudProvider;

/// State of a sync cycle
///
/// `pending -> running -> {completed | failed | partial}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

impl SyncStatus {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }

    /// Whether the cycle has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Partial)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row per discovery cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: String,
    pub provider: CloudProvider,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub nodes_discovered: u64,
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub nodes_disappeared: u64,
    pub edges_discovered: u64,
    pub edges_created: u64,
    pub errors: Vec<String>,
    pub duration_ms: Option<u64>,
}

impl SyncRecord {
    /// Create a pending record for a provider
    pub fn new(provider: CloudProvider) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider,
            status: SyncStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            nodes_discovered: 0,
            nodes_created: 0,
            nodes_updated: 0,
            nodes_disappeared: 0,
            edges_discovered: 0,
            edges_created: 0,
            errors: Vec::new(),
            duration_ms: None,
        }
    }

    /// Move to running, stamping the start time
    pub fn start(&mut self, at: DateTime<Utc>) {
        self.status = SyncStatus::Running;
        self.started_at = at;
    }

    /// Finish the cycle; errors degrade a success to partial
    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.status = if self.errors.is_empty() {
            SyncStatus::Completed
        } else {
            SyncStatus::Partial
        };
        self.stamp_completion(at);
    }

    /// Finish the cycle as failed
    pub fn fail(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.errors.push(error.into());
        self.status = SyncStatus::Failed;
        self.stamp_completion(at);
    }

    fn stamp_completion(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
        self.duration_ms = Some((at - self.started_at).num_milliseconds().max(0) as u64);
    }
}
