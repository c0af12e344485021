//! Boot sequence and the text-level entry points used by services.

use crate::config::BrainConfig;
use crate::embedding::{CachedEmbedder, Embedder, EmbeddingError};
use crate::error::{KernelError, KernelResult};
use brainstore_storage::{Database, KnowledgeSubstrate, SchemaReport};
use brainstore_types::memory::NewEpisode;
use brainstore_types::search::{FusionMode, HybridSearchRequest, ScopeFilter, SearchResult};
use brainstore_types::store::{MemoryStore, SearchStore};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-call overrides for [`Brain::search_text`]. Unset fields use the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub scope: ScopeFilter,
    pub limit: Option<u32>,
    pub candidate_k: Option<u32>,
    pub fusion: Option<FusionMode>,
}

/// A booted knowledge store with its embedder.
#[derive(Clone)]
pub struct Brain {
    config: Arc<BrainConfig>,
    store: KnowledgeSubstrate,
    embedder: Arc<dyn Embedder>,
}

impl Brain {
    /// Validate, connect, and migrate when `auto_migrate` is set.
    ///
    /// The embedder is wrapped in a [`CachedEmbedder`] sized by
    /// `[embedding_cache]`. Its dimension must equal `store.vector_dim`.
    pub async fn boot<E: Embedder + 'static>(config: BrainConfig, embedder: E) -> KernelResult<Self> {
        config.validate()?;
        check_dimensions(&config, embedder.dimensions())?;

        let cache = &config.embedding_cache;
        let embedder = CachedEmbedder::new(embedder, cache.ttl(), cache.max_entries);
        let store = KnowledgeSubstrate::new(Database::connect(config.store.clone()).await?);

        let report = if config.store.auto_migrate {
            Some(store.ensure_schema().await?)
        } else {
            warn!("auto_migrate disabled; the schema must already be current");
            None
        };
        info!(
            schema = %config.store.schema,
            vector_dim = config.store.vector_dim,
            version = ?report.as_ref().map(|r: &SchemaReport| r.version),
            "Brain booted"
        );
        Ok(Self::from_parts(config, store, Arc::new(embedder)))
    }

    /// Assemble a brain from an existing store without connecting or migrating.
    pub fn from_parts(config: BrainConfig, store: KnowledgeSubstrate, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            embedder,
        }
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    pub fn store(&self) -> &KnowledgeSubstrate {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed `query` and run hybrid search with the configured defaults.
    /// A blank query returns no results without embedding.
    pub async fn search_text(
        &self,
        tenant_id: &str,
        query: &str,
        options: SearchOptions,
    ) -> KernelResult<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embed(query).await?;
        let defaults = &self.config.store.search;
        let mut request = HybridSearchRequest::new(tenant_id, query, vector, defaults);
        request.scope = options.scope;
        if let Some(limit) = options.limit {
            request.limit = limit;
        }
        if let Some(candidate_k) = options.candidate_k {
            request.candidate_k = candidate_k;
        }
        if let Some(fusion) = options.fusion {
            request.fusion = fusion;
        }
        Ok(self.store.hybrid_search(&request).await?)
    }

    /// Embed and append one conversational turn. Returns the episode id.
    pub async fn record_turn(
        &self,
        tenant_id: &str,
        user_id: &str,
        session_id: Option<&str>,
        content: &str,
    ) -> KernelResult<Uuid> {
        let mut episode = NewEpisode::new(tenant_id, user_id, content);
        episode.session_id = session_id.map(str::to_string);
        if !content.trim().is_empty() {
            episode.embedding = Some(self.embed(content).await?);
        }
        Ok(self.store.add_episode(&episode).await?)
    }

    async fn embed(&self, text: &str) -> KernelResult<Vec<f32>> {
        let vector = self.embedder.embed_one(text).await?;
        let expected = self.config.store.vector_dim;
        if vector.len() != expected {
            return Err(EmbeddingError::Dimension {
                expected,
                actual: vector.len(),
            }
            .into());
        }
        Ok(vector)
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
        info!("Brain shut down");
    }
}

fn check_dimensions(config: &BrainConfig, embedder_dims: usize) -> KernelResult<()> {
    if embedder_dims != config.store.vector_dim {
        return Err(KernelError::BootFailed(format!(
            "embedder produces {embedder_dims}-dimensional vectors but store.vector_dim is {}",
            config.store.vector_dim
        )));
    }
    Ok(())
}
