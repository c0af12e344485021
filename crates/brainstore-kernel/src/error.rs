//! Kernel-specific error types.

use crate::embedding::EmbeddingError;
use brainstore_types::error::StoreError;
use thiserror::Error;

/// Kernel error type wrapping StoreError with kernel-specific context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped StoreError.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid kernel configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The embedding backend failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// The kernel failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
