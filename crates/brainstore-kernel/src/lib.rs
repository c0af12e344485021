//! Service-facing wiring for the brainstore knowledge store.
//!
//! Loads [`BrainConfig`], installs logging, and boots a [`Brain`]: a
//! migrated [`KnowledgeSubstrate`](brainstore_storage::KnowledgeSubstrate)
//! paired with a cached [`Embedder`].

pub mod brain;
pub mod config;
pub mod embedding;
pub mod error;
pub mod logging;

pub use brain::{Brain, SearchOptions};
pub use config::{load_config, BrainConfig};
pub use embedding::{CachedEmbedder, Embedder, EmbeddingError};
pub use error::{KernelError, KernelResult};
