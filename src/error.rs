//! Error taxonomy for the tenant data plane.
//!
//! Resolution and status errors are distinct variants so callers can map
//! them to distinct user-visible signals; they are never collapsed into a
//! generic database error.

use thiserror::Error;

/// Result type for tenant data-plane operations.
pub type Result<T> = std::result::Result<T, TenantError>;

/// Errors that can occur in the tenant data plane.
#[derive(Debug, Error)]
pub enum TenantError {
    /// A slug or derived schema name violates the identifier invariant.
    #[error("invalid tenant identifier: {0}")]
    InvalidIdentifier(String),

    /// A tenant with the same slug or schema name already exists.
    #[error("tenant already exists: {0}")]
    DuplicateTenant(String),

    /// No tenant with the given id or slug.
    #[error("tenant not found: {0}")]
    NotFound(String),

    /// No request signal yielded a tenant on a tenant-required route.
    #[error("no tenant could be resolved from the request")]
    Unresolved,

    /// The tenant is temporarily disabled.
    #[error("tenant '{0}' is suspended")]
    Suspended(String),

    /// The tenant is permanently inactive.
    #[error("tenant '{0}' is archived")]
    Archived(String),

    /// The lifecycle state machine does not allow this transition.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Schema provisioning failed; compensating teardown was attempted.
    #[error("provisioning failed for schema '{schema}': {message}")]
    ProvisionFailed { schema: String, message: String },

    /// The dump tool failed, timed out, or its artifact could not be handled.
    #[error("backup failed: {0}")]
    BackupFailed(String),

    /// Checkout from a tenant pool exceeded the bounded wait.
    #[error("connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// An external operation exceeded its wall-clock budget.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Underlying database error.
    #[error("database error: {0}")]
    Database(String),

    /// Artifact or object-store error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl TenantError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a backup error.
    pub fn backup(message: impl Into<String>) -> Self {
        Self::BackupFailed(message.into())
    }

    /// Create a provisioning error.
    pub fn provision(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProvisionFailed {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Create a transition error.
    pub fn transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error means the tenant is disabled (suspended or archived).
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Suspended(_) | Self::Archived(_))
    }

    /// Check if this is a duplicate error.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateTenant(_))
    }

    /// Check if this is a timeout or pool-exhaustion error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::PoolExhausted(_))
    }
}

impl From<tokio_postgres::Error> for TenantError {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;
        if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            return Self::DuplicateTenant(err.to_string());
        }
        Self::Database(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for TenantError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        if matches!(err, deadpool_postgres::PoolError::Timeout(_)) {
            Self::PoolExhausted(err.to_string())
        } else {
            Self::Database(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(TenantError::NotFound("acme".into()).is_not_found());
        assert!(TenantError::Suspended("acme".into()).is_disabled());
        assert!(TenantError::Archived("acme".into()).is_disabled());
        assert!(!TenantError::Unresolved.is_disabled());
        assert!(TenantError::DuplicateTenant("acme".into()).is_duplicate());
        assert!(TenantError::Timeout(500).is_timeout());
        assert!(TenantError::PoolExhausted("wait".into()).is_timeout());
    }

    #[test]
    fn test_display() {
        let err = TenantError::provision("tenant_acme", "connection refused");
        assert_eq!(
            err.to_string(),
            "provisioning failed for schema 'tenant_acme': connection refused"
        );

        let err = TenantError::transition("archived", "active");
        assert_eq!(err.to_string(), "invalid status transition: archived -> active");
    }
}
