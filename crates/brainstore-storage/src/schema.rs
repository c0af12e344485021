//! DDL builders: tables, indexes, extensions and row-level security.
//!
//! Every statement returned here is safe to re-run against a database in any
//! prior state. `CREATE TABLE` statements describe the current shape of each
//! table; columns added after a table first shipped are retrofitted by the
//! numbered migrations in [`crate::migration`].

/// Lexical search document for a node: content terms plus keyword terms.
/// Queries must spell it exactly like this to use `knowledge_nodes_lexical_gin`.
pub const LEXICAL_DOCUMENT: &str = "(search_vector || COALESCE(keywords_vector, ''::tsvector))";

/// pgvector refuses HNSW indexes on `vector` columns wider than this.
pub const HNSW_MAX_DIM: usize = 2000;

/// Tenant-scoped tables every deployment has.
pub const CORE_TABLES: &[&str] = &[
    "knowledge_nodes",
    "knowledge_edges",
    "knowledge_aliases",
    "episodic_events",
    "user_facts",
    "agent_traces",
];

pub const COMMERCE_TABLES: &[&str] = &["catalog_taxonomy"];

pub const NEWS_TABLES: &[&str] = &["news_raw", "news_facts", "news_posts"];

/// Which optional table groups a deployment carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaModules {
    pub commerce: bool,
    pub news: bool,
}

impl SchemaModules {
    /// Tenant-scoped tables present in this deployment.
    pub fn tenant_tables(&self) -> Vec<&'static str> {
        let mut tables = CORE_TABLES.to_vec();
        if self.commerce {
            tables.extend_from_slice(COMMERCE_TABLES);
        }
        if self.news {
            tables.extend_from_slice(NEWS_TABLES);
        }
        tables
    }

    /// `(table, index)` for every embedding column present in this deployment.
    pub fn embedding_columns(&self) -> Vec<(&'static str, &'static str)> {
        let mut columns = vec![
            ("knowledge_nodes", "knowledge_nodes_embedding_hnsw"),
            ("episodic_events", "episodic_events_embedding_hnsw"),
        ];
        if self.commerce {
            columns.push(("catalog_taxonomy", "catalog_taxonomy_embedding_hnsw"));
        }
        if self.news {
            columns.push(("news_facts", "news_facts_embedding_hnsw"));
            columns.push(("news_posts", "news_posts_embedding_hnsw"));
        }
        columns
    }
}

pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {schema}")
}

pub fn search_path_sql(schema: &str) -> String {
    format!("SET search_path TO {schema}, public")
}

/// Extensions live in `public` so every schema on the search path sees their types.
pub fn extension_sql() -> Vec<String> {
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector WITH SCHEMA public".to_string(),
        "CREATE EXTENSION IF NOT EXISTS ltree WITH SCHEMA public".to_string(),
    ]
}

pub const SCHEMA_MIGRATIONS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version     INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)";

/// Cosine HNSW index on `table.embedding`, or nothing when `dim` exceeds pgvector's limit.
pub fn embedding_index_sql(table: &str, index: &str, dim: usize) -> Option<String> {
    (dim <= HNSW_MAX_DIM).then(|| {
        format!("CREATE INDEX IF NOT EXISTS {index} ON {table} USING hnsw (embedding vector_cosine_ops)")
    })
}

/// All table and index DDL for the enabled modules, in dependency order.
///
/// Indexes on columns that a numbered migration retrofits are created by
/// that migration, never here: on a pre-existing table the column may not
/// exist until the backfill step runs.
pub fn build_schema_sql(dim: usize, modules: SchemaModules) -> Vec<String> {
    let mut statements = core_table_sql(dim);
    if modules.commerce {
        statements.extend(commerce_table_sql(dim));
    }
    if modules.news {
        statements.extend(news_table_sql(dim));
    }
    statements
}

fn core_table_sql(dim: usize) -> Vec<String> {
    let mut statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS knowledge_nodes (
    id              TEXT PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    user_id         TEXT NULL,
    node_kind       TEXT NOT NULL CHECK (node_kind IN ('chunk', 'concept')),
    source_type     TEXT NULL CHECK (source_type IN ('video', 'book', 'qa', 'web', 'knowledge')),
    source_id       TEXT NULL,
    title           TEXT NULL,
    content         TEXT NOT NULL,
    struct_data     JSONB NOT NULL DEFAULT '{{}}'::jsonb,
    keywords_text   TEXT NULL,
    content_hash    TEXT NULL,
    taxonomy_path   LTREE NULL,
    search_vector   TSVECTOR GENERATED ALWAYS AS (to_tsvector('simple', content)) STORED,
    keywords_vector TSVECTOR GENERATED ALWAYS AS (to_tsvector('simple', COALESCE(keywords_text, ''))) STORED,
    embedding       VECTOR({dim}) NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
)"
        ),
        "CREATE INDEX IF NOT EXISTS knowledge_nodes_source_type_idx ON knowledge_nodes (source_type)".into(),
        "CREATE INDEX IF NOT EXISTS knowledge_nodes_source_id_idx ON knowledge_nodes (source_id)".into(),
        "CREATE INDEX IF NOT EXISTS knowledge_nodes_node_kind_idx ON knowledge_nodes (node_kind)".into(),
        "CREATE INDEX IF NOT EXISTS knowledge_nodes_tenant_idx ON knowledge_nodes (tenant_id)".into(),
        "CREATE INDEX IF NOT EXISTS knowledge_nodes_struct_data_gin ON knowledge_nodes USING GIN (struct_data)".into(),
        "CREATE TABLE IF NOT EXISTS knowledge_edges (
    tenant_id   TEXT NOT NULL,
    source_id   TEXT NOT NULL REFERENCES knowledge_nodes(id) ON DELETE CASCADE,
    target_id   TEXT NOT NULL REFERENCES knowledge_nodes(id) ON DELETE CASCADE,
    relation    TEXT NOT NULL,
    weight      DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
    PRIMARY KEY (tenant_id, source_id, target_id, relation)
)"
        .into(),
        "CREATE INDEX IF NOT EXISTS knowledge_edges_source_idx ON knowledge_edges (source_id)".into(),
        "CREATE INDEX IF NOT EXISTS knowledge_edges_target_idx ON knowledge_edges (target_id)".into(),
        "CREATE INDEX IF NOT EXISTS knowledge_edges_relation_idx ON knowledge_edges (relation)".into(),
        "CREATE INDEX IF NOT EXISTS knowledge_edges_tenant_idx ON knowledge_edges (tenant_id)".into(),
        "CREATE TABLE IF NOT EXISTS knowledge_aliases (
    tenant_id   TEXT NOT NULL,
    alias       TEXT NOT NULL,
    node_id     TEXT NOT NULL REFERENCES knowledge_nodes(id) ON DELETE CASCADE,
    source      TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, alias)
)"
        .into(),
        "CREATE INDEX IF NOT EXISTS knowledge_aliases_node_id_idx ON knowledge_aliases (node_id)".into(),
        "CREATE INDEX IF NOT EXISTS knowledge_aliases_tenant_idx ON knowledge_aliases (tenant_id)".into(),
        format!(
            "CREATE TABLE IF NOT EXISTS episodic_events (
    id          UUID PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    session_id  TEXT NULL,
    content     TEXT NOT NULL,
    embedding   VECTOR({dim}) NULL,
    metadata    JSONB NOT NULL DEFAULT '{{}}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)"
        ),
        "CREATE INDEX IF NOT EXISTS episodic_events_user_idx ON episodic_events (user_id)".into(),
        "CREATE INDEX IF NOT EXISTS episodic_events_session_idx ON episodic_events (session_id)".into(),
        "CREATE INDEX IF NOT EXISTS episodic_events_tenant_created_idx ON episodic_events (tenant_id, created_at)".into(),
        "CREATE TABLE IF NOT EXISTS user_facts (
    tenant_id   TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    fact_key    TEXT NOT NULL,
    fact_value  JSONB NOT NULL,
    confidence  DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    source_id   UUID NULL REFERENCES episodic_events(id) ON DELETE SET NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, user_id, fact_key)
)"
        .into(),
        "CREATE INDEX IF NOT EXISTS user_facts_user_idx ON user_facts (user_id)".into(),
        "CREATE TABLE IF NOT EXISTS agent_traces (
    id              UUID PRIMARY KEY DEFAULT gen_random_uuid(),
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
    provenance      TEXT[] NOT NULL DEFAULT '{}',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
)"
        .into(),
        "CREATE INDEX IF NOT EXISTS agent_traces_agent_idx ON agent_traces (agent_id)".into(),
        "CREATE INDEX IF NOT EXISTS agent_traces_session_idx ON agent_traces (session_id)".into(),
        "CREATE INDEX IF NOT EXISTS agent_traces_tenant_created_idx ON agent_traces (tenant_id, created_at DESC)".into(),
    ];
    statements.extend(embedding_index_sql(
        "knowledge_nodes",
        "knowledge_nodes_embedding_hnsw",
        dim,
    ));
    statements.extend(embedding_index_sql(
        "episodic_events",
        "episodic_events_embedding_hnsw",
        dim,
    ));
    statements
}

fn commerce_table_sql(dim: usize) -> Vec<String> {
    let domains = taxonomy_domain_list();
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS catalog_taxonomy (
    tenant_id   TEXT NOT NULL,
    domain      TEXT NOT NULL,
    name        TEXT NOT NULL,
    path        LTREE NOT NULL,
    keywords    TEXT[] NOT NULL DEFAULT '{{}}',
    embedding   VECTOR({dim}) NULL,
    metadata    JSONB NOT NULL DEFAULT '{{}}'::jsonb,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, domain, path),
    CONSTRAINT catalog_taxonomy_domain_check CHECK (domain IN ({domains}))
)"
        ),
        "CREATE INDEX IF NOT EXISTS catalog_taxonomy_path_gist ON catalog_taxonomy USING GIST (path)".into(),
        "CREATE INDEX IF NOT EXISTS catalog_taxonomy_domain_idx ON catalog_taxonomy (domain)".into(),
    ]
}

fn news_table_sql(dim: usize) -> Vec<String> {
    let mut statements = vec![
        "CREATE TABLE IF NOT EXISTS news_raw (
    id              TEXT PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    url             TEXT NOT NULL,
    headline        TEXT NOT NULL,
    summary         TEXT NOT NULL,
    category        TEXT NULL,
    source_api      TEXT NOT NULL,
    metadata        JSONB NOT NULL DEFAULT '{}'::jsonb,
    harvested_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (tenant_id, url)
)"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS news_raw_harvested_idx ON news_raw (harvested_at DESC)".into(),
        "CREATE INDEX IF NOT EXISTS news_raw_category_idx ON news_raw (category)".into(),
        format!(
            "CREATE TABLE IF NOT EXISTS news_facts (
    id              TEXT PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    url             TEXT NOT NULL,
    headline        TEXT NOT NULL,
    summary         TEXT NOT NULL,
    category        TEXT NULL,
    suggested_agent TEXT NULL,
    significance    DOUBLE PRECISION NOT NULL DEFAULT 0.5,
    atomic_facts    TEXT[] NOT NULL DEFAULT '{{}}',
    irony_potential TEXT NULL,
    embedding       VECTOR({dim}) NULL,
    metadata        JSONB NOT NULL DEFAULT '{{}}'::jsonb,
    raw_id          TEXT NULL REFERENCES news_raw(id) ON DELETE SET NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (tenant_id, url)
)"
        ),
        "CREATE INDEX IF NOT EXISTS news_facts_created_idx ON news_facts (created_at DESC)".into(),
        "CREATE INDEX IF NOT EXISTS news_facts_category_idx ON news_facts (category)".into(),
        format!(
            "CREATE TABLE IF NOT EXISTS news_posts (
    id              TEXT PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    fact_id         TEXT NULL REFERENCES news_facts(id) ON DELETE SET NULL,
    agent           TEXT NOT NULL,
    headline        TEXT NOT NULL,
    content         TEXT NOT NULL,
    emoji           TEXT NOT NULL DEFAULT '📰',
    fact_url        TEXT NULL,
    embedding       VECTOR({dim}) NULL,
    scheduled_at    TIMESTAMPTZ NULL,
    published_at    TIMESTAMPTZ NULL,
    message_id      BIGINT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
)"
        ),
        "CREATE INDEX IF NOT EXISTS news_posts_tenant_idx ON news_posts (tenant_id)".into(),
        "CREATE INDEX IF NOT EXISTS news_posts_scheduled_idx ON news_posts (scheduled_at)".into(),
        "CREATE INDEX IF NOT EXISTS news_posts_published_idx ON news_posts (published_at)".into(),
    ];
    statements.extend(embedding_index_sql(
        "news_facts",
        "news_facts_embedding_hnsw",
        dim,
    ));
    statements.extend(embedding_index_sql(
        "news_posts",
        "news_posts_embedding_hnsw",
        dim,
    ));
    statements
}

/// `'category', 'categories', ...` for the taxonomy domain CHECK constraint.
pub(crate) fn taxonomy_domain_list() -> String {
    brainstore_types::taxonomy::TaxonomyDomain::all_spellings()
        .iter()
        .map(|d| format!("'{d}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Predicate shared by every tenant-isolation policy. `'*'` grants admin visibility.
const TENANT_PREDICATE: &str = "tenant_id = current_setting('app.current_tenant', true) \
     OR current_setting('app.current_tenant', true) = '*'";

const CREATE_ROLES_SQL: &str = "DO $$
BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = 'brain_app') THEN
        CREATE ROLE brain_app NOLOGIN;
    END IF;
    IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = 'brain_admin') THEN
        CREATE ROLE brain_admin NOLOGIN BYPASSRLS;
    END IF;
END
$$";

/// Roles, grants and tenant-isolation policies for `tables`.
///
/// Each statement stands alone so the caller can skip individual failures.
pub fn rls_sql(schema: &str, tables: &[&str]) -> Vec<String> {
    let mut statements = vec![
        CREATE_ROLES_SQL.to_string(),
        format!("GRANT USAGE ON SCHEMA {schema} TO brain_app, brain_admin"),
    ];
    for table in tables {
        statements.push(format!("ALTER TABLE IF EXISTS {table} ENABLE ROW LEVEL SECURITY"));
        statements.push(format!("ALTER TABLE IF EXISTS {table} FORCE ROW LEVEL SECURITY"));
        statements.push(format!(
            "DROP POLICY IF EXISTS {table}_tenant_isolation ON {table}"
        ));
        statements.push(format!(
            "CREATE POLICY {table}_tenant_isolation ON {table} \
             USING ({TENANT_PREDICATE}) WITH CHECK ({TENANT_PREDICATE})"
        ));
        statements.push(format!(
            "GRANT SELECT, INSERT, UPDATE, DELETE ON {table} TO brain_app"
        ));
        statements.push(format!("GRANT ALL ON {table} TO brain_admin"));
    }
    statements
}

/// Drop the similarity index, retype the column (nulling embeddings), rebuild the index.
pub fn vector_resize_sql(table: &str, index: &str, dim: usize) -> Vec<String> {
    let mut statements = vec![
        format!("DROP INDEX IF EXISTS {index}"),
        format!("ALTER TABLE {table} ALTER COLUMN embedding TYPE VECTOR({dim}) USING NULL"),
    ];
    statements.extend(embedding_index_sql(table, index, dim));
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_modules() -> SchemaModules {
        SchemaModules {
            commerce: true,
            news: true,
        }
    }

    #[test]
    fn test_every_statement_is_rerunnable() {
        for stmt in build_schema_sql(1536, all_modules()) {
            assert!(
                stmt.contains("IF NOT EXISTS"),
                "statement is not idempotent: {stmt}"
            );
        }
    }

    #[test]
    fn test_vector_dimension_is_interpolated() {
        let sql = build_schema_sql(768, SchemaModules::default()).join("\n");
        assert!(sql.contains("VECTOR(768)"));
        assert!(!sql.contains("VECTOR(1536)"));
        // Braces in JSON defaults survive formatting.
        assert!(sql.contains("DEFAULT '{}'::jsonb"));
    }

    #[test]
    fn test_optional_modules_are_gated() {
        let core = build_schema_sql(8, SchemaModules::default()).join("\n");
        assert!(!core.contains("catalog_taxonomy"));
        assert!(!core.contains("news_posts"));
        let full = build_schema_sql(8, all_modules()).join("\n");
        assert!(full.contains("CREATE TABLE IF NOT EXISTS catalog_taxonomy"));
        assert!(full.contains("CREATE TABLE IF NOT EXISTS news_posts"));
    }

    #[test]
    fn test_wide_vectors_skip_hnsw() {
        let sql = build_schema_sql(3072, SchemaModules::default()).join("\n");
        assert!(sql.contains("VECTOR(3072)"));
        assert!(!sql.contains("USING hnsw"));
        let sql = build_schema_sql(1536, SchemaModules::default()).join("\n");
        assert!(sql.contains("knowledge_nodes_embedding_hnsw"));
    }

    #[test]
    fn test_backfilled_column_indexes_left_to_migrations() {
        let sql = build_schema_sql(8, all_modules()).join("\n");
        assert!(!sql.contains("knowledge_nodes_tenant_content_hash_uq"));
        assert!(!sql.contains("knowledge_nodes_search_vector_gin"));
        assert!(!sql.contains("catalog_taxonomy_embedding_hnsw"));
    }

    #[test]
    fn test_tenant_tables_follow_modules() {
        assert_eq!(SchemaModules::default().tenant_tables().len(), 6);
        let tables = all_modules().tenant_tables();
        assert_eq!(tables.len(), 10);
        assert!(tables.contains(&"news_raw"));
    }

    #[test]
    fn test_rls_covers_every_table_with_wildcard() {
        let tables = all_modules().tenant_tables();
        let stmts = rls_sql("brain", &tables);
        let sql = stmts.join("\n");
        for table in &tables {
            assert!(sql.contains(&format!("CREATE POLICY {table}_tenant_isolation")));
            assert!(sql.contains(&format!("ALTER TABLE IF EXISTS {table} FORCE ROW LEVEL SECURITY")));
        }
        assert!(sql.contains("= '*'"));
        assert!(sql.contains("WITH CHECK"));
    }

    #[test]
    fn test_rls_creates_roles() {
        let sql = rls_sql("brain", CORE_TABLES).join("\n");
        assert!(sql.contains("CREATE ROLE brain_app NOLOGIN"));
        assert!(sql.contains("CREATE ROLE brain_admin NOLOGIN BYPASSRLS"));
        assert!(sql.contains("GRANT USAGE ON SCHEMA brain"));
    }

    #[test]
    fn test_rls_policies_are_dropped_before_recreate() {
        let stmts = rls_sql("brain", &["user_facts"]);
        let drop = stmts
            .iter()
            .position(|s| s.starts_with("DROP POLICY IF EXISTS user_facts_tenant_isolation"))
            .unwrap();
        let create = stmts
            .iter()
            .position(|s| s.starts_with("CREATE POLICY user_facts_tenant_isolation"))
            .unwrap();
        assert!(drop < create);
    }

    #[test]
    fn test_vector_resize_nulls_embeddings() {
        let stmts = vector_resize_sql("knowledge_nodes", "knowledge_nodes_embedding_hnsw", 768);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].starts_with("DROP INDEX IF EXISTS"));
        assert!(stmts[1].contains("VECTOR(768) USING NULL"));
        assert!(stmts[2].contains("USING hnsw"));
    }

    #[test]
    fn test_embedding_columns_follow_modules() {
        assert_eq!(SchemaModules::default().embedding_columns().len(), 2);
        assert_eq!(all_modules().embedding_columns().len(), 5);
    }
}
