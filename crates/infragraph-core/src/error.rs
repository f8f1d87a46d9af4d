//! Error types for Infragraph

use thiserror::Error;

/// Result type alias using Infragraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Infragraph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Graph entity errors (E001-E099)
    #[error("Node '{0}' not found. Run `infragraph stats` to check what has been discovered.")]
    NodeNotFound(String),

    #[error("Edge '{0}' not found.")]
    EdgeNotFound(String),

    #[error("Group '{0}' not found.")]
    GroupNotFound(String),

    #[error("Sync record '{0}' not found.")]
    SyncRecordNotFound(String),

    // Discovery errors (E100-E199)
    #[error("Discovery adapter for '{0}' could not be invoked: {1}")]
    AdapterUnavailable(String, String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Stored data is corrupt: {0}")]
    CorruptRecord(String),

    // Serialization errors (E500-E599)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NodeNotFound(_) => "E001",
            Self::EdgeNotFound(_) => "E002",
            Self::GroupNotFound(_) => "E003",
            Self::SyncRecordNotFound(_) => "E004",
            Self::AdapterUnavailable(..) => "E100",
            Self::DatabaseError(_) => "E400",
            Self::CorruptRecord(_) => "E401",
            Self::Serialization(_) => "E500",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NodeNotFound(_) => Some("infragraph stats".to_string()),
            Self::AdapterUnavailable(provider, _) => {
                Some(format!("infragraph sync --provider {}", provider))
            }
            Self::DatabaseError(_) | Self::CorruptRecord(_) => {
                Some("Check the database path with `infragraph --db <path>`".to_string())
            }
            _ => None,
        }
    }

    /// Whether this error came from the persistence layer
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::DatabaseError(_) | Self::CorruptRecord(_))
    }
}
