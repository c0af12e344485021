//! The composed knowledge substrate: every store over one shared pool.

use crate::episodes::EpisodicMemory;
use crate::graph::KnowledgeGraph;
use crate::migration::{SchemaManager, SchemaReport};
use crate::news::NewsArchive;
use crate::pool::{Database, PoolStatus};
use crate::search::HybridSearch;
use crate::taxonomy::TaxonomyCatalog;
use crate::traces::TraceLog;
use async_trait::async_trait;
use brainstore_types::config::StoreConfig;
use brainstore_types::error::StoreResult;
use brainstore_types::graph::{Edge, GraphSearchRequest, GraphSearchResult, KgFact, Node, NodeAlias};
use brainstore_types::memory::{Episode, EpisodeStats, NewEpisode, UserFact};
use brainstore_types::news::{NewsFact, NewsPost, RawNewsItem, ScoredNewsFact, ScoredNewsPost};
use brainstore_types::search::{HybridSearchRequest, SearchResult};
use brainstore_types::store::{
    GraphStore, MemoryStore, NewsStore, SearchStore, TaxonomyStore, TraceStore,
};
use brainstore_types::taxonomy::{TaxonomyDomain, TaxonomyEntry};
use brainstore_types::trace::{AgentTrace, NewTrace, TraceQuery};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Implements every capability trait by delegating to the individual stores.
#[derive(Clone)]
pub struct KnowledgeSubstrate {
    db: Database,
    schema: SchemaManager,
    graph: KnowledgeGraph,
    search: HybridSearch,
    memory: EpisodicMemory,
    taxonomy: TaxonomyCatalog,
    traces: TraceLog,
    news: NewsArchive,
}

impl KnowledgeSubstrate {
    /// Connect the pool and build every store over it. Does not migrate.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        Ok(Self::new(Database::connect(config).await?))
    }

    pub fn new(db: Database) -> Self {
        Self {
            schema: SchemaManager::new(db.clone()),
            graph: KnowledgeGraph::new(db.clone()),
            search: HybridSearch::new(db.clone()),
            memory: EpisodicMemory::new(db.clone()),
            taxonomy: TaxonomyCatalog::new(db.clone()),
            traces: TraceLog::new(db.clone()),
            news: NewsArchive::new(db.clone()),
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn search(&self) -> &HybridSearch {
        &self.search
    }

    pub fn memory(&self) -> &EpisodicMemory {
        &self.memory
    }

    pub fn taxonomy(&self) -> &TaxonomyCatalog {
        &self.taxonomy
    }

    pub fn traces(&self) -> &TraceLog {
        &self.traces
    }

    pub fn news(&self) -> &NewsArchive {
        &self.news
    }

    /// Shorthand for [`SchemaManager::ensure_schema`].
    pub async fn ensure_schema(&self) -> StoreResult<SchemaReport> {
        self.schema.ensure_schema().await
    }

    pub fn status(&self) -> PoolStatus {
        self.db.status()
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl GraphStore for KnowledgeSubstrate {
    async fn upsert_graph(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        nodes: &[Node],
        edges: &[Edge],
    ) -> StoreResult<()> {
        self.graph.upsert_graph(tenant_id, user_id, nodes, edges).await
    }

    async fn graph_search(&self, request: &GraphSearchRequest) -> StoreResult<GraphSearchResult> {
        self.graph.graph_search(request).await
    }

    async fn fetch_facts(
        &self,
        tenant_id: &str,
        entrypoint_ids: &[String],
        allowed_relations: Option<&[String]>,
        max_depth: u32,
        max_facts: u32,
    ) -> StoreResult<Vec<KgFact>> {
        self.graph
            .fetch_facts(tenant_id, entrypoint_ids, allowed_relations, max_depth, max_facts)
            .await
    }

    async fn upsert_alias(&self, tenant_id: &str, alias: &NodeAlias) -> StoreResult<()> {
        self.graph.upsert_alias(tenant_id, alias).await
    }

    async fn resolve_aliases(
        &self,
        tenant_id: &str,
        aliases: &[String],
    ) -> StoreResult<HashMap<String, String>> {
        self.graph.resolve_aliases(tenant_id, aliases).await
    }
}

#[async_trait]
impl SearchStore for KnowledgeSubstrate {
    async fn hybrid_search(&self, request: &HybridSearchRequest) -> StoreResult<Vec<SearchResult>> {
        self.search.hybrid_search(request).await
    }
}

#[async_trait]
impl MemoryStore for KnowledgeSubstrate {
    async fn add_episode(&self, episode: &NewEpisode) -> StoreResult<Uuid> {
        self.memory.add_episode(episode).await
    }

    async fn get_recent_episodes(
        &self,
        tenant_id: &str,
        user_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<Episode>> {
        self.memory.get_recent_episodes(tenant_id, user_id, limit).await
    }

    async fn get_old_episodes(
        &self,
        tenant_id: &str,
        older_than_days: u32,
        limit: u32,
    ) -> StoreResult<Vec<Episode>> {
        self.memory
            .get_old_episodes(tenant_id, older_than_days, limit)
            .await
    }

    async fn delete_old_episodes(
        &self,
        tenant_id: &str,
        older_than_days: u32,
        ids: Option<&[Uuid]>,
    ) -> StoreResult<u64> {
        self.memory
            .delete_old_episodes(tenant_id, older_than_days, ids)
            .await
    }

    async fn count_episodes(&self, tenant_id: &str) -> StoreResult<EpisodeStats> {
        self.memory.count_episodes(tenant_id).await
    }

    async fn upsert_fact(
        &self,
        tenant_id: &str,
        user_id: &str,
        key: &str,
        value: serde_json::Value,
        confidence: f64,
        source_id: Option<Uuid>,
    ) -> StoreResult<()> {
        self.memory
            .upsert_fact(tenant_id, user_id, key, value, confidence, source_id)
            .await
    }

    async fn get_user_facts(&self, tenant_id: &str, user_id: &str) -> StoreResult<Vec<UserFact>> {
        self.memory.get_user_facts(tenant_id, user_id).await
    }
}

#[async_trait]
impl TaxonomyStore for KnowledgeSubstrate {
    async fn upsert_taxonomy(&self, entry: &TaxonomyEntry) -> StoreResult<()> {
        self.taxonomy.upsert_taxonomy(entry).await
    }

    async fn get_all_taxonomy(
        &self,
        tenant_id: &str,
        domain: Option<TaxonomyDomain>,
    ) -> StoreResult<Vec<TaxonomyEntry>> {
        self.taxonomy.get_all_taxonomy(tenant_id, domain).await
    }
}

#[async_trait]
impl TraceStore for KnowledgeSubstrate {
    async fn log_trace(&self, trace: &NewTrace) -> StoreResult<Uuid> {
        self.traces.log_trace(trace).await
    }

    async fn get_traces(&self, query: &TraceQuery) -> StoreResult<Vec<AgentTrace>> {
        self.traces.get_traces(query).await
    }
}

#[async_trait]
impl NewsStore for KnowledgeSubstrate {
    async fn upsert_raw(&self, item: &RawNewsItem) -> StoreResult<String> {
        self.news.upsert_raw(item).await
    }

    async fn upsert_news_fact(&self, fact: &NewsFact) -> StoreResult<String> {
        self.news.upsert_news_fact(fact).await
    }

    async fn get_news_facts(
        &self,
        tenant_id: &str,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<NewsFact>> {
        self.news.get_news_facts(tenant_id, limit, since).await
    }

    async fn search_news_facts(
        &self,
        tenant_id: &str,
        vector: &[f32],
        limit: u32,
        min_score: f64,
    ) -> StoreResult<Vec<ScoredNewsFact>> {
        self.news
            .search_news_facts(tenant_id, vector, limit, min_score)
            .await
    }

    async fn upsert_post(&self, post: &NewsPost) -> StoreResult<String> {
        self.news.upsert_post(post).await
    }

    async fn mark_published(
        &self,
        tenant_id: &str,
        post_id: &str,
        message_id: i64,
    ) -> StoreResult<bool> {
        self.news.mark_published(tenant_id, post_id, message_id).await
    }

    async fn search_posts(
        &self,
        tenant_id: &str,
        vector: &[f32],
        limit: u32,
    ) -> StoreResult<Vec<ScoredNewsPost>> {
        self.news.search_posts(tenant_id, vector, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::unreachable_db;
    use brainstore_types::error::StoreError;
    use brainstore_types::store::KnowledgeStore;

    fn substrate() -> KnowledgeSubstrate {
        KnowledgeSubstrate::new(unreachable_db())
    }

    fn assert_knowledge_store<T: KnowledgeStore>(_: &T) {}

    #[tokio::test]
    async fn test_substrate_implements_every_capability() {
        assert_knowledge_store(&substrate());
    }

    #[tokio::test]
    async fn test_trait_calls_delegate_to_stores() {
        let store: &dyn MemoryStore = &substrate();
        let err = store.get_user_facts("", "u1").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let news: &dyn NewsStore = &substrate();
        let err = news.search_posts("acme", &[0.1, 0.2, 0.3], 3).await.unwrap_err();
        assert!(matches!(err, StoreError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_status_reports_configured_max() {
        assert_eq!(substrate().status().max_size, 20);
    }
}
