//! Shared error types for the knowledge store.

use thiserror::Error;

/// Top-level error type for every store operation.
///
/// The variants are coarse on purpose: callers (the RPC layer) map them to
/// client-facing codes via [`StoreError::code`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// Input rejected before any query was issued.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced table, column, index or operator does not exist.
    #[error("Schema mismatch: {0}. Run migrations (ensure_schema) against this database")]
    SchemaMismatch(String),

    /// Any other database-level failure.
    #[error("Query failed: {0}")]
    Query(String),

    /// The database could not be reached or the connection was lost.
    #[error("Database connection error: {0}")]
    Connection(String),

    /// No pooled connection became available within the acquire timeout.
    #[error("Timed out waiting for a pooled connection")]
    PoolTimeout,

    /// A uniqueness, foreign-key or check constraint rejected a write.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The operation needs a module this deployment did not enable.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid store configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Stable machine-readable code for this error category.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Validation(_) => "VALIDATION_ERROR",
            StoreError::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            StoreError::Query(_) => "DB_QUERY_ERROR",
            StoreError::Connection(_) => "DB_CONNECTION_ERROR",
            StoreError::PoolTimeout => "POOL_TIMEOUT",
            StoreError::Constraint(_) => "CONSTRAINT_VIOLATION",
            StoreError::NotSupported(_) => "NOT_SUPPORTED",
            StoreError::Serialization(_) => "SERIALIZATION_ERROR",
            StoreError::Config(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Whether a caller-side retry may succeed. This layer never retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::PoolTimeout)
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }
}

/// Alias for Result with StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// Reject an empty or whitespace-only tenant id.
pub fn require_tenant(tenant_id: &str) -> StoreResult<()> {
    if tenant_id.trim().is_empty() {
        return Err(StoreError::validation("tenant_id is required"));
    }
    Ok(())
}

/// Reject an empty or whitespace-only required field.
pub fn require_non_empty(field: &str, value: &str) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Reject an embedding whose length differs from the deployment dimension.
pub fn require_dimension(field: &str, vector: &[f32], expected: usize) -> StoreResult<()> {
    if vector.len() != expected {
        return Err(StoreError::Validation(format!(
            "{field} has dimension {}, expected {expected}",
            vector.len()
        )));
    }
    Ok(())
}
