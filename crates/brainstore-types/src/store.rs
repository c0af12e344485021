//! Capability traits implemented by storage backends.
//!
//! Each trait covers one narrow concern so callers can depend on exactly the
//! capability they use. Every method takes the tenant explicitly; none infers
//! it. Optional modules (taxonomy, news) return [`StoreError::NotSupported`]
//! when the deployment did not enable them.
//!
//! [`StoreError::NotSupported`]: crate::error::StoreError::NotSupported

use crate::error::StoreResult;
use crate::graph::{Edge, GraphSearchRequest, GraphSearchResult, KgFact, Node, NodeAlias};
use crate::memory::{Episode, EpisodeStats, NewEpisode, UserFact};
use crate::news::{NewsFact, NewsPost, RawNewsItem, ScoredNewsFact, ScoredNewsPost};
use crate::search::{HybridSearchRequest, SearchResult};
use crate::taxonomy::{TaxonomyDomain, TaxonomyEntry};
use crate::trace::{AgentTrace, NewTrace, TraceQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Knowledge graph writes and traversal.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert nodes then edges in one transaction.
    async fn upsert_graph(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        nodes: &[Node],
        edges: &[Edge],
    ) -> StoreResult<()>;

    /// Breadth-first walk over outgoing edges from the entrypoints.
    async fn graph_search(&self, request: &GraphSearchRequest) -> StoreResult<GraphSearchResult>;

    /// The same walk, flattened to (source, relation, target) triples.
    async fn fetch_facts(
        &self,
        tenant_id: &str,
        entrypoint_ids: &[String],
        allowed_relations: Option<&[String]>,
        max_depth: u32,
        max_facts: u32,
    ) -> StoreResult<Vec<KgFact>>;

    async fn upsert_alias(&self, tenant_id: &str, alias: &NodeAlias) -> StoreResult<()>;

    /// Map each known alias to its node id. Unknown aliases are absent from the map.
    async fn resolve_aliases(
        &self,
        tenant_id: &str,
        aliases: &[String],
    ) -> StoreResult<HashMap<String, String>>;
}

/// Hybrid vector + lexical retrieval.
#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn hybrid_search(&self, request: &HybridSearchRequest) -> StoreResult<Vec<SearchResult>>;
}

/// Episodic events and per-user facts.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add_episode(&self, episode: &NewEpisode) -> StoreResult<Uuid>;

    async fn get_recent_episodes(
        &self,
        tenant_id: &str,
        user_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<Episode>>;

    /// Oldest-first episodes past the retention cutoff.
    async fn get_old_episodes(
        &self,
        tenant_id: &str,
        older_than_days: u32,
        limit: u32,
    ) -> StoreResult<Vec<Episode>>;

    /// Delete `ids` if given, otherwise everything older than the cutoff.
    async fn delete_old_episodes(
        &self,
        tenant_id: &str,
        older_than_days: u32,
        ids: Option<&[Uuid]>,
    ) -> StoreResult<u64>;

    async fn count_episodes(&self, tenant_id: &str) -> StoreResult<EpisodeStats>;

    async fn upsert_fact(
        &self,
        tenant_id: &str,
        user_id: &str,
        key: &str,
        value: serde_json::Value,
        confidence: f64,
        source_id: Option<Uuid>,
    ) -> StoreResult<()>;

    async fn get_user_facts(&self, tenant_id: &str, user_id: &str) -> StoreResult<Vec<UserFact>>;
}

/// Commerce taxonomy catalog.
#[async_trait]
pub trait TaxonomyStore: Send + Sync {
    async fn upsert_taxonomy(&self, entry: &TaxonomyEntry) -> StoreResult<()>;

    async fn get_all_taxonomy(
        &self,
        tenant_id: &str,
        domain: Option<TaxonomyDomain>,
    ) -> StoreResult<Vec<TaxonomyEntry>>;
}

/// Append-only agent trace log.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Returns the generated trace id.
    async fn log_trace(&self, trace: &NewTrace) -> StoreResult<Uuid>;

    async fn get_traces(&self, query: &TraceQuery) -> StoreResult<Vec<AgentTrace>>;
}

/// News pipeline archive.
#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Returns the id stored for the item's url, which may predate this call.
    async fn upsert_raw(&self, item: &RawNewsItem) -> StoreResult<String>;

    async fn upsert_news_fact(&self, fact: &NewsFact) -> StoreResult<String>;

    async fn get_news_facts(
        &self,
        tenant_id: &str,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<NewsFact>>;

    /// Facts at least `min_score` similar to `vector`, for deduplication.
    async fn search_news_facts(
        &self,
        tenant_id: &str,
        vector: &[f32],
        limit: u32,
        min_score: f64,
    ) -> StoreResult<Vec<ScoredNewsFact>>;

    /// Returns the id of the surviving row, which differs from `post.id`
    /// when an earlier post with the same fact url exists.
    async fn upsert_post(&self, post: &NewsPost) -> StoreResult<String>;

    /// Returns `false` when no post of this tenant has that id.
    async fn mark_published(&self, tenant_id: &str, post_id: &str, message_id: i64)
        -> StoreResult<bool>;

    /// Published posts most similar to `vector`.
    async fn search_posts(
        &self,
        tenant_id: &str,
        vector: &[f32],
        limit: u32,
    ) -> StoreResult<Vec<ScoredNewsPost>>;
}

/// Every capability at once.
pub trait KnowledgeStore:
    GraphStore + SearchStore + MemoryStore + TaxonomyStore + TraceStore + NewsStore
{
}

impl<T> KnowledgeStore for T where
    T: GraphStore + SearchStore + MemoryStore + TaxonomyStore + TraceStore + NewsStore
{
}
