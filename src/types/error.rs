//! Error types for raseen-vault
//!
//! Errors are split by what the caller should do about them: connection and
//! database failures are retryable, configuration and routing failures are
//! fatal and must propagate.

/// Main error type for datastore operations
#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("Configuration error: {variable} {reason}")]
    Configuration {
        variable: &'static str,
        reason: String,
    },

    #[error("Connection error ({database}): {message}")]
    Connection { database: String, message: String },

    #[error("Database {database} unreachable after {attempts} attempts: {last_error}")]
    Unreachable {
        database: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Migration write failed in '{collection}' during {stage}: {message}")]
    MigrationWrite {
        collection: String,
        stage: String,
        message: String,
    },

    #[error("Routing violation: {0}")]
    RoutingViolation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DatastoreError {
    /// Build a configuration error for a missing environment variable
    pub fn missing_variable(variable: &'static str) -> Self {
        Self::Configuration {
            variable,
            reason: "is not set".to_string(),
        }
    }

    /// Whether backoff and another attempt can plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Unreachable { .. } | Self::Database(_)
        )
    }

    /// Errors that must never be swallowed into stats or health objects
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::RoutingViolation(_))
    }

    /// Message safe to hand to an HTTP collaborator.
    ///
    /// Raw database errors are never surfaced to end users; anything
    /// infrastructure-related collapses into a generic unavailability notice.
    pub fn public_message(&self) -> String {
        match self {
            Self::BadRequest(msg) => format!("Bad request: {}", msg),
            Self::Cancelled(_) => "Operation cancelled".to_string(),
            _ => "Service temporarily unavailable".to_string(),
        }
    }
}

impl From<mongodb::error::Error> for DatastoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for DatastoreError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("BSON serialization error: {}", err))
    }
}

/// Result type alias for datastore operations
pub type Result<T> = std::result::Result<T, DatastoreError>;
