//! Integration tests against a live Postgres with pgvector and ltree.
//!
//! Set `BRAINSTORE_TEST_DATABASE_URL` to run them; without it every test
//! returns immediately. Each test works in its own throwaway schema.

use brainstore_storage::{Database, KnowledgeSubstrate};
use brainstore_types::config::{SearchDefaults, StoreConfig};
use brainstore_types::error::StoreError;
use brainstore_types::graph::{Edge, GraphSearchRequest, Node, NodeAlias};
use brainstore_types::memory::NewEpisode;
use brainstore_types::news::{NewsFact, NewsPost, RawNewsItem};
use brainstore_types::search::{FusionMode, HybridSearchRequest};
use brainstore_types::store::{GraphStore, MemoryStore, NewsStore, SearchStore};
use serde_json::json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct TestDb {
    store: KnowledgeSubstrate,
    schema: String,
}

impl TestDb {
    async fn start() -> Option<Self> {
        let t = Self::connect().await?;
        t.store.ensure_schema().await.unwrap();
        Some(t)
    }

    /// Connected to a fresh, empty schema. Nothing is created yet.
    async fn connect() -> Option<Self> {
        let url = std::env::var("BRAINSTORE_TEST_DATABASE_URL").ok()?;
        let schema = format!("it_{}", Uuid::new_v4().simple());
        let config = StoreConfig {
            database_url: url,
            schema: schema.clone(),
            pool_min_size: 1,
            pool_max_size: 5,
            vector_dim: 3,
            include_commerce: true,
            include_news: true,
            ..Default::default()
        };
        let store = KnowledgeSubstrate::connect(config).await.unwrap();
        Some(Self { store, schema })
    }

    async fn execute(&self, sql: &str) {
        sqlx::raw_sql(sql).execute(self.db().pool()).await.unwrap();
    }

    async fn columns(&self, table: &str) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(self.db().pool())
        .await
        .unwrap()
    }

    fn db(&self) -> &Database {
        self.store.database()
    }

    async fn cleanup(self) {
        let sql = format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema);
        sqlx::raw_sql(&sql).execute(self.db().pool()).await.unwrap();
        self.store.close().await;
    }
}

fn chunk(id: &str, content: &str, embedding: [f32; 3]) -> Node {
    Node::chunk(id, content).with_embedding(embedding.to_vec())
}

fn walk(tenant: &str, from: &str, max_hops: u32) -> GraphSearchRequest {
    GraphSearchRequest {
        tenant_id: tenant.into(),
        entrypoint_ids: vec![from.into()],
        max_hops,
        allowed_relations: None,
        max_results: 200,
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ensure_schema_twice_is_a_no_op() {
    let Some(t) = TestDb::start().await else { return };

    let second = t.store.ensure_schema().await.unwrap();
    assert!(second.applied.is_empty());
    assert_eq!(second.version, 10);
    assert_eq!(t.store.schema().schema_version().await.unwrap(), 10);

    t.cleanup().await;
}

/// Tables as they looked before tenant-scoped facts, lexical search,
/// content hashes, taxonomy paths, provenance and post dedup existed.
/// Embeddings are narrower than the configured dimension.
const LEGACY_TABLES: &str = "
CREATE EXTENSION IF NOT EXISTS vector WITH SCHEMA public;
CREATE EXTENSION IF NOT EXISTS ltree WITH SCHEMA public;
CREATE TABLE {schema}.knowledge_nodes (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    node_kind   TEXT NOT NULL,
    source_type TEXT NULL,
    source_id   TEXT NULL,
    title       TEXT NULL,
    content     TEXT NOT NULL,
    struct_data JSONB NOT NULL DEFAULT '{}'::jsonb,
    embedding   VECTOR(2) NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE {schema}.episodic_events (
    id          UUID PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    session_id  TEXT NULL,
    content     TEXT NOT NULL,
    embedding   VECTOR(2) NULL,
    metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE {schema}.user_facts (
    user_id     TEXT NOT NULL,
    fact_key    TEXT NOT NULL,
    fact_value  JSONB NOT NULL,
    confidence  DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    source_id   UUID NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (user_id, fact_key)
);
CREATE TABLE {schema}.agent_traces (
    id              UUID PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    agent_id        TEXT NOT NULL,
    session_id      TEXT NULL,
    user_id         TEXT NULL,
    graph_name      TEXT NULL,
    tool_calls      JSONB NOT NULL DEFAULT '[]'::jsonb,
    token_usage     JSONB NOT NULL DEFAULT '{}'::jsonb,
    timing_ms       INTEGER NULL,
    security_flags  JSONB NOT NULL DEFAULT '{}'::jsonb,
    metadata        JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE {schema}.catalog_taxonomy (
    tenant_id   TEXT NOT NULL,
    domain      TEXT NOT NULL,
    name        TEXT NOT NULL,
    path        LTREE NOT NULL,
    keywords    TEXT[] NOT NULL DEFAULT '{}',
    metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, domain, path)
);
INSERT INTO {schema}.knowledge_nodes (id, tenant_id, node_kind, content)
    VALUES ('legacy-1', 'acme', 'chunk', 'borrowing rules predate the upgrade');
INSERT INTO {schema}.user_facts (user_id, fact_key, fact_value)
    VALUES ('u1', 'language', '\"rust\"'::jsonb);
";

#[tokio::test]
async fn test_ensure_schema_upgrades_legacy_tables() {
    let Some(t) = TestDb::connect().await else { return };
    t.execute(&format!("CREATE SCHEMA {}", t.schema)).await;
    t.execute(&LEGACY_TABLES.replace("{schema}", &t.schema)).await;

    let report = t.store.ensure_schema().await.unwrap();
    let mut applied = report.applied.clone();
    applied.sort();
    assert_eq!(applied, (1..=10).collect::<Vec<i32>>());
    assert_eq!(report.version, 10);
    assert_eq!(t.store.schema().schema_version().await.unwrap(), 10);

    let nodes = t.columns("knowledge_nodes").await;
    for column in [
        "user_id",
        "keywords_text",
        "content_hash",
        "taxonomy_path",
        "search_vector",
        "keywords_vector",
    ] {
        assert!(nodes.iter().any(|c| c == column), "knowledge_nodes.{column} missing");
    }
    assert!(t.columns("user_facts").await.iter().any(|c| c == "tenant_id"));
    assert!(t.columns("agent_traces").await.iter().any(|c| c == "provenance"));
    assert!(t.columns("catalog_taxonomy").await.iter().any(|c| c == "embedding"));
    assert!(t.columns("news_posts").await.iter().any(|c| c == "message_id"));

    // Pre-existing rows survive and land in the default tenant.
    let facts = t.store.get_user_facts("default", "u1").await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].fact_value, json!("rust"));

    // Generated search columns cover rows written before they existed.
    let lexical = HybridSearchRequest::new("acme", "borrowing", vec![], &SearchDefaults::default());
    let hits = t.store.hybrid_search(&lexical).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].node.id, "legacy-1");

    // The narrow embedding columns are resized to the configured dimension.
    t.store.schema().change_vector_dimension(3).await.unwrap();
    let nodes = vec![chunk("k1", "Lifetimes bound references", [1.0, 0.0, 0.0])];
    t.store.upsert_graph("acme", None, &nodes, &[]).await.unwrap();

    let again = t.store.ensure_schema().await.unwrap();
    assert!(again.applied.is_empty());

    t.cleanup().await;
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_graph_upsert_is_idempotent() {
    let Some(t) = TestDb::start().await else { return };
    let nodes = vec![
        Node::concept("c:rust", "Rust"),
        chunk("k1", "Ownership moves values", [1.0, 0.0, 0.0]),
    ];
    let edges = vec![Edge::new("c:rust", "k1", "explained_by")];

    t.store.upsert_graph("acme", None, &nodes, &edges).await.unwrap();
    t.store.upsert_graph("acme", None, &nodes, &edges).await.unwrap();

    let result = t.store.graph_search(&walk("acme", "c:rust", 2)).await.unwrap();
    assert_eq!(result.nodes.len(), 2);
    assert_eq!(result.edges.len(), 1);
    assert_eq!(result.edges[0].depth, 1);

    t.cleanup().await;
}

#[tokio::test]
async fn test_cyclic_graph_terminates_within_depth_bound() {
    let Some(t) = TestDb::start().await else { return };
    let nodes = vec![
        Node::concept("a", "A"),
        Node::concept("b", "B"),
        Node::concept("c", "C"),
    ];
    let edges = vec![
        Edge::new("a", "b", "next"),
        Edge::new("b", "c", "next"),
        Edge::new("c", "a", "next"),
    ];
    t.store.upsert_graph("acme", None, &nodes, &edges).await.unwrap();

    let deep = t.store.graph_search(&walk("acme", "a", 10)).await.unwrap();
    assert_eq!(deep.edges.len(), 3);
    assert!(deep.edges.iter().all(|e| e.depth <= 3));

    let shallow = t.store.graph_search(&walk("acme", "a", 1)).await.unwrap();
    assert_eq!(shallow.edges.len(), 1);
    assert_eq!(shallow.edges[0].edge.target_id, "b");

    let facts = t
        .store
        .fetch_facts("acme", &["a".to_string()], Some(&["next".to_string()]), 2, 10)
        .await
        .unwrap();
    assert_eq!(facts.len(), 2);

    t.cleanup().await;
}

#[tokio::test]
async fn test_edge_across_tenants_is_rejected() {
    let Some(t) = TestDb::start().await else { return };
    t.store
        .upsert_graph("acme", None, &[Node::concept("a", "A")], &[])
        .await
        .unwrap();
    t.store
        .upsert_graph("globex", None, &[Node::concept("g", "G")], &[])
        .await
        .unwrap();

    let err = t
        .store
        .upsert_graph("acme", None, &[], &[Edge::new("a", "g", "leaks")])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = t
        .store
        .upsert_graph("globex", None, &[Node::concept("a", "hijack")], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    t.cleanup().await;
}

#[tokio::test]
async fn test_aliases_resolve_within_tenant() {
    let Some(t) = TestDb::start().await else { return };
    t.store
        .upsert_graph("acme", None, &[Node::concept("c:rust", "Rust")], &[])
        .await
        .unwrap();
    let alias = NodeAlias {
        alias: "rustlang".into(),
        node_id: "c:rust".into(),
        source: "manual".into(),
    };
    t.store.upsert_alias("acme", &alias).await.unwrap();

    let names = vec!["rustlang".to_string(), "unknown".to_string()];
    let resolved = t.store.resolve_aliases("acme", &names).await.unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved["rustlang"], "c:rust");
    assert!(t.store.resolve_aliases("globex", &names).await.unwrap().is_empty());

    t.cleanup().await;
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_hybrid_search_ranks_and_isolates_tenants() {
    let Some(t) = TestDb::start().await else { return };
    let nodes = vec![
        chunk("k1", "borrow checker rules", [1.0, 0.0, 0.0]),
        chunk("k2", "async runtimes and executors", [0.0, 1.0, 0.0]),
        chunk("k3", "lifetimes and the borrow checker", [0.9, 0.1, 0.0]),
    ];
    t.store.upsert_graph("acme", None, &nodes, &[]).await.unwrap();

    let mut request = HybridSearchRequest::new(
        "acme",
        "borrow checker",
        vec![1.0, 0.0, 0.0],
        &SearchDefaults::default(),
    );
    let hits = t.store.hybrid_search(&request).await.unwrap();
    assert_eq!(hits[0].node.id, "k1");
    assert!(hits[0].vector_score.is_some());
    assert!(hits[0].text_score.is_some());
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    request.fusion = FusionMode::Rrf;
    let rrf = t.store.hybrid_search(&request).await.unwrap();
    assert_eq!(rrf[0].node.id, "k1");

    request.tenant_id = "globex".into();
    assert!(t.store.hybrid_search(&request).await.unwrap().is_empty());
    let foreign = t.store.graph_search(&walk("globex", "k1", 2)).await.unwrap();
    assert!(foreign.is_empty());

    t.cleanup().await;
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_retention_removes_only_old_episodes_of_tenant() {
    let Some(t) = TestDb::start().await else { return };
    let old = NewEpisode::new("acme", "u1", "last month");
    let fresh = NewEpisode::new("acme", "u1", "today");
    let other = NewEpisode::new("globex", "u1", "old but foreign");
    for episode in [&old, &fresh, &other] {
        t.store.add_episode(episode).await.unwrap();
    }
    for (tenant, id) in [("acme", old.id), ("globex", other.id)] {
        let mut tc = t.db().tenant_connection(tenant, None).await.unwrap();
        sqlx::query("UPDATE episodic_events SET created_at = now() - interval '40 days' WHERE id = $1")
            .bind(id)
            .execute(tc.conn())
            .await
            .unwrap();
        tc.commit().await.unwrap();
    }

    let stale = t.store.get_old_episodes("acme", 30, 10).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, old.id);

    assert_eq!(t.store.delete_old_episodes("acme", 30, None).await.unwrap(), 1);
    let stats = t.store.count_episodes("acme").await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(t.store.count_episodes("globex").await.unwrap().total, 1);

    t.cleanup().await;
}

#[tokio::test]
async fn test_fact_upsert_replaces_value() {
    let Some(t) = TestDb::start().await else { return };
    t.store
        .upsert_fact("acme", "u1", "diet", json!("vegetarian"), 0.6, None)
        .await
        .unwrap();
    t.store
        .upsert_fact("acme", "u1", "diet", json!("vegan"), 0.9, None)
        .await
        .unwrap();

    let facts = t.store.get_user_facts("acme", "u1").await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].fact_value, json!("vegan"));
    assert!((facts[0].confidence - 0.9).abs() < 1e-9);
    assert!(t.store.get_user_facts("globex", "u1").await.unwrap().is_empty());

    t.cleanup().await;
}

// ---------------------------------------------------------------------------
// News and tenant context
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_posts_deduplicate_by_fact_url() {
    let Some(t) = TestDb::start().await else { return };
    let first = NewsPost {
        id: "p1".into(),
        tenant_id: "acme".into(),
        fact_id: None,
        agent: "wit".into(),
        headline: "Headline".into(),
        content: "first take".into(),
        emoji: "📰".into(),
        fact_url: Some("https://example.org/story".into()),
        embedding: Some(vec![0.0, 0.0, 1.0]),
        scheduled_at: None,
    };
    let second = NewsPost {
        id: "p2".into(),
        content: "second take".into(),
        ..first.clone()
    };
    assert_eq!(t.store.upsert_post(&first).await.unwrap(), "p1");
    assert_eq!(t.store.upsert_post(&second).await.unwrap(), "p1");

    assert!(t.store.search_posts("acme", &[0.0, 0.0, 1.0], 3).await.unwrap().is_empty());
    assert!(t.store.mark_published("acme", "p1", 77).await.unwrap());
    assert!(!t.store.mark_published("globex", "p1", 78).await.unwrap());
    let posts = t.store.search_posts("acme", &[0.0, 0.0, 1.0], 3).await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].content, "second take");

    t.cleanup().await;
}

#[tokio::test]
async fn test_news_upserts_return_the_stored_id() {
    let Some(t) = TestDb::start().await else { return };
    let url = "https://example.org/launch";
    let harvested = RawNewsItem {
        id: "raw-1".into(),
        tenant_id: "acme".into(),
        url: url.into(),
        headline: "Launch".into(),
        summary: "It launched".into(),
        category: None,
        source_api: "wire".into(),
        metadata: Default::default(),
    };
    let reharvested = RawNewsItem {
        id: "raw-2".into(),
        headline: "Launch, updated".into(),
        ..harvested.clone()
    };
    assert_eq!(t.store.upsert_raw(&harvested).await.unwrap(), "raw-1");
    assert_eq!(t.store.upsert_raw(&reharvested).await.unwrap(), "raw-1");

    let fact = NewsFact::new("fact-1", "acme", url, "Launch", "It launched");
    let refact = NewsFact {
        id: "fact-2".into(),
        headline: "Launch confirmed".into(),
        ..fact.clone()
    };
    assert_eq!(t.store.upsert_news_fact(&fact).await.unwrap(), "fact-1");
    assert_eq!(t.store.upsert_news_fact(&refact).await.unwrap(), "fact-1");

    let facts = t.store.get_news_facts("acme", 10, None).await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].id, "fact-1");
    assert_eq!(facts[0].headline, "Launch confirmed");

    t.cleanup().await;
}

#[tokio::test]
async fn test_missing_tenant_fails_closed() {
    let Some(t) = TestDb::start().await else { return };
    assert!(matches!(
        t.db().tenant_connection("", None).await,
        Err(StoreError::Validation(_))
    ));
    assert!(t.store.get_recent_episodes("", "u1", 5).await.is_err());
    t.cleanup().await;
}
