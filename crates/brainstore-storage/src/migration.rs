//! Schema bootstrap and versioned migrations.
//!
//! `ensure_schema` brings a database in any prior state to the expected shape:
//!
//! 1. create the schema namespace
//! 2. install extensions (soft-fail)
//! 3. set the search path
//! 4. create tables and indexes
//! 5. apply pending backfill migrations
//! 6. apply pending constraint-upgrade migrations
//! 7. apply row-level security (soft-fail)
//!
//! Every statement runs auto-committed on a dedicated connection so one
//! failure never rolls back earlier DDL.

use crate::error::classify;
use crate::pool::Database;
use crate::schema::{self, SchemaModules};
use brainstore_types::error::{StoreError, StoreResult};
use sqlx::postgres::PgConnection;
use sqlx::Row;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// When a migration runs within `ensure_schema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Step 5: retrofit columns and indexes onto pre-existing tables.
    Backfill,
    /// Step 6: replace constraints whose definition changed.
    ConstraintUpgrade,
}

/// Table group a migration touches. Migrations for disabled groups stay pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationModule {
    Core,
    Commerce,
    News,
}

impl MigrationModule {
    fn enabled(&self, modules: SchemaModules) -> bool {
        match self {
            MigrationModule::Core => true,
            MigrationModule::Commerce => modules.commerce,
            MigrationModule::News => modules.news,
        }
    }
}

/// One numbered schema change. Each statement is individually idempotent.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i32,
    pub phase: MigrationPhase,
    pub module: MigrationModule,
    pub description: &'static str,
    /// Statements for the given vector dimension.
    pub statements: fn(usize) -> Vec<String>,
}

/// Every migration, ordered by version.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        phase: MigrationPhase::Backfill,
        module: MigrationModule::Core,
        description: "user_facts tenant column and tenant indexes",
        statements: |_| {
            vec![
                "ALTER TABLE user_facts ADD COLUMN IF NOT EXISTS tenant_id TEXT NOT NULL DEFAULT 'default'".into(),
                "CREATE INDEX IF NOT EXISTS user_facts_tenant_idx ON user_facts (tenant_id)".into(),
                "CREATE INDEX IF NOT EXISTS episodic_events_tenant_idx ON episodic_events (tenant_id)".into(),
            ]
        },
    },
    Migration {
        version: 2,
        phase: MigrationPhase::Backfill,
        module: MigrationModule::Core,
        description: "knowledge_nodes owner, keyword, hash and path columns",
        statements: |_| {
            vec![
                "ALTER TABLE knowledge_nodes ADD COLUMN IF NOT EXISTS user_id TEXT NULL".into(),
                "ALTER TABLE knowledge_nodes ADD COLUMN IF NOT EXISTS keywords_text TEXT NULL".into(),
                "ALTER TABLE knowledge_nodes ADD COLUMN IF NOT EXISTS content_hash TEXT NULL".into(),
                "ALTER TABLE knowledge_nodes ADD COLUMN IF NOT EXISTS taxonomy_path LTREE NULL".into(),
                "CREATE INDEX IF NOT EXISTS knowledge_nodes_taxonomy_path_gist ON knowledge_nodes USING GIST (taxonomy_path)".into(),
            ]
        },
    },
    Migration {
        version: 3,
        phase: MigrationPhase::Backfill,
        module: MigrationModule::Core,
        description: "knowledge_nodes generated tsvector columns",
        statements: |_| {
            vec![
                "ALTER TABLE knowledge_nodes ADD COLUMN IF NOT EXISTS search_vector TSVECTOR \
                 GENERATED ALWAYS AS (to_tsvector('simple', content)) STORED"
                    .into(),
                "ALTER TABLE knowledge_nodes ADD COLUMN IF NOT EXISTS keywords_vector TSVECTOR \
                 GENERATED ALWAYS AS (to_tsvector('simple', COALESCE(keywords_text, ''))) STORED"
                    .into(),
                "CREATE INDEX IF NOT EXISTS knowledge_nodes_search_vector_gin ON knowledge_nodes USING GIN (search_vector)".into(),
                "CREATE INDEX IF NOT EXISTS knowledge_nodes_keywords_vector_gin ON knowledge_nodes USING GIN (keywords_vector)".into(),
            ]
        },
    },
    Migration {
        version: 4,
        phase: MigrationPhase::Backfill,
        module: MigrationModule::Core,
        description: "agent_traces provenance chain",
        statements: |_| {
            vec!["ALTER TABLE agent_traces ADD COLUMN IF NOT EXISTS provenance TEXT[] NOT NULL DEFAULT '{}'".into()]
        },
    },
    Migration {
        version: 5,
        phase: MigrationPhase::Backfill,
        module: MigrationModule::Commerce,
        description: "catalog_taxonomy embedding column",
        statements: |dim| {
            let mut stmts = vec![format!(
                "ALTER TABLE catalog_taxonomy ADD COLUMN IF NOT EXISTS embedding VECTOR({dim}) NULL"
            )];
            stmts.extend(schema::embedding_index_sql(
                "catalog_taxonomy",
                "catalog_taxonomy_embedding_hnsw",
                dim,
            ));
            stmts
        },
    },
    Migration {
        version: 6,
        phase: MigrationPhase::Backfill,
        module: MigrationModule::News,
        description: "news_posts fact url dedup index and message id",
        statements: |_| {
            vec![
                "CREATE UNIQUE INDEX IF NOT EXISTS news_posts_tenant_fact_url_uq ON news_posts (tenant_id, fact_url)".into(),
                "ALTER TABLE news_posts ADD COLUMN IF NOT EXISTS message_id BIGINT NULL".into(),
            ]
        },
    },
    Migration {
        version: 7,
        phase: MigrationPhase::ConstraintUpgrade,
        module: MigrationModule::Core,
        description: "user_facts primary key includes tenant",
        statements: |_| {
            vec![
                "ALTER TABLE user_facts DROP CONSTRAINT IF EXISTS user_facts_pkey, \
                 ADD CONSTRAINT user_facts_pkey PRIMARY KEY (tenant_id, user_id, fact_key)"
                    .into(),
            ]
        },
    },
    Migration {
        version: 8,
        phase: MigrationPhase::ConstraintUpgrade,
        module: MigrationModule::Core,
        description: "chunk content hash unique per tenant",
        statements: |_| {
            vec![
                "DROP INDEX IF EXISTS knowledge_nodes_chunk_content_hash_uq".into(),
                "CREATE UNIQUE INDEX IF NOT EXISTS knowledge_nodes_tenant_content_hash_uq \
                 ON knowledge_nodes (tenant_id, node_kind, content_hash) \
                 WHERE node_kind = 'chunk' AND content_hash IS NOT NULL"
                    .into(),
            ]
        },
    },
    Migration {
        version: 9,
        phase: MigrationPhase::ConstraintUpgrade,
        module: MigrationModule::Commerce,
        description: "catalog_taxonomy domain check accepts gender",
        statements: |_| {
            vec![format!(
                "ALTER TABLE catalog_taxonomy DROP CONSTRAINT IF EXISTS catalog_taxonomy_domain_check, \
                 ADD CONSTRAINT catalog_taxonomy_domain_check CHECK (domain IN ({}))",
                schema::taxonomy_domain_list()
            )]
        },
    },
    Migration {
        version: 10,
        phase: MigrationPhase::Backfill,
        module: MigrationModule::Core,
        description: "knowledge_nodes combined lexical document index",
        statements: |_| {
            vec![format!(
                "CREATE INDEX IF NOT EXISTS knowledge_nodes_lexical_gin ON knowledge_nodes USING GIN ({})",
                schema::LEXICAL_DOCUMENT
            )]
        },
    },
];

/// Migrations of `phase` for enabled modules that are not yet recorded, in version order.
pub fn pending<'a>(
    migrations: &'a [Migration],
    applied: &HashSet<i32>,
    phase: MigrationPhase,
    modules: SchemaModules,
) -> Vec<&'a Migration> {
    let mut pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| m.phase == phase && m.module.enabled(modules) && !applied.contains(&m.version))
        .collect();
    pending.sort_by_key(|m| m.version);
    pending
}

/// Outcome of one `ensure_schema` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    /// Versions applied during this run.
    pub applied: Vec<i32>,
    /// Highest recorded version after the run.
    pub version: i32,
    /// Soft-failed extension and RLS statements.
    pub skipped: usize,
}

/// Applies DDL and migrations for one database.
#[derive(Clone)]
pub struct SchemaManager {
    db: Database,
}

impl SchemaManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn modules(&self) -> SchemaModules {
        let config = self.db.config();
        SchemaModules {
            commerce: config.include_commerce,
            news: config.include_news,
        }
    }

    /// Bring the database to the expected shape. Safe to call on every boot.
    pub async fn ensure_schema(&self) -> StoreResult<SchemaReport> {
        let config = self.db.config();
        let schema_name = config.schema.as_str();
        let dim = config.vector_dim;
        let modules = self.modules();
        let mut conn = self.db.pool().acquire().await.map_err(classify)?;
        let mut report = SchemaReport::default();

        // 1. Namespace
        run(&mut conn, &schema::create_schema_sql(schema_name)).await?;

        // 2. Extensions (may need privileges an operator pre-provisions)
        for stmt in schema::extension_sql() {
            if let Err(e) = run(&mut conn, &stmt).await {
                warn!(statement = %stmt, error = %e, "Cannot create extension; ensure it is pre-provisioned");
                report.skipped += 1;
            }
        }

        // 3. Search path for this session
        run(&mut conn, &schema::search_path_sql(schema_name)).await?;

        // 4. Tables and indexes
        for stmt in schema::build_schema_sql(dim, modules) {
            run(&mut conn, &stmt).await?;
        }
        run(&mut conn, schema::SCHEMA_MIGRATIONS_TABLE_SQL).await?;

        // 5 + 6. Versioned migrations
        let mut applied = applied_versions(&mut conn).await?;
        for phase in [MigrationPhase::Backfill, MigrationPhase::ConstraintUpgrade] {
            for migration in pending(MIGRATIONS, &applied, phase, modules) {
                apply_migration(&mut conn, migration, dim).await?;
                applied.insert(migration.version);
                report.applied.push(migration.version);
            }
        }

        // 7. Row-level security
        for stmt in schema::rls_sql(schema_name, &modules.tenant_tables()) {
            if let Err(e) = run(&mut conn, &stmt).await {
                warn!(error = %e, "RLS statement skipped (needs table owner or superuser)");
                report.skipped += 1;
            }
        }

        report.version = applied.iter().copied().max().unwrap_or(0);
        info!(
            schema = schema_name,
            commerce = modules.commerce,
            news = modules.news,
            version = report.version,
            applied = report.applied.len(),
            skipped = report.skipped,
            "Schema ensured"
        );
        Ok(report)
    }

    /// Highest recorded migration version, 0 for a database never migrated.
    pub async fn schema_version(&self) -> StoreResult<i32> {
        let mut conn = self.db.pool().acquire().await.map_err(classify)?;
        let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&mut *conn)
            .await
            .map_err(classify)?;
        Ok(version.unwrap_or(0))
    }

    /// Retype every embedding column to `new_dim`. Existing embeddings become NULL
    /// and must be recomputed.
    pub async fn change_vector_dimension(&self, new_dim: usize) -> StoreResult<()> {
        if new_dim == 0 {
            return Err(StoreError::Validation("vector dimension must be positive".into()));
        }
        let mut conn = self.db.pool().acquire().await.map_err(classify)?;
        for (table, index) in self.modules().embedding_columns() {
            for stmt in schema::vector_resize_sql(table, index, new_dim) {
                run(&mut conn, &stmt).await?;
            }
            warn!(table, new_dim, "Embedding column resized; existing vectors cleared");
        }
        Ok(())
    }
}

async fn run(conn: &mut PgConnection, sql: &str) -> StoreResult<()> {
    sqlx::raw_sql(sql).execute(&mut *conn).await.map_err(classify)?;
    Ok(())
}

async fn applied_versions(conn: &mut PgConnection) -> StoreResult<HashSet<i32>> {
    let rows = sqlx::query("SELECT version FROM schema_migrations")
        .fetch_all(&mut *conn)
        .await
        .map_err(classify)?;
    rows.iter()
        .map(|row| row.try_get::<i32, _>("version").map_err(classify))
        .collect()
}

async fn apply_migration(conn: &mut PgConnection, migration: &Migration, dim: usize) -> StoreResult<()> {
    debug!(version = migration.version, description = migration.description, "Applying migration");
    for stmt in (migration.statements)(dim) {
        run(conn, &stmt).await.map_err(|e| {
            StoreError::Query(format!(
                "migration {} ({}) failed: {e}",
                migration.version, migration.description
            ))
        })?;
    }
    sqlx::query(
        "INSERT INTO schema_migrations (version, description) VALUES ($1, $2) \
         ON CONFLICT (version) DO NOTHING",
    )
    .bind(migration.version)
    .bind(migration.description)
    .execute(&mut *conn)
    .await
    .map_err(classify)?;
    info!(version = migration.version, description = migration.description, "Migration applied");
    Ok(())
}
