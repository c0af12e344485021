//! Hybrid search: parallel vector and lexical branches, fused and rehydrated.

use crate::error::classify;
use crate::fusion::{fuse, BranchHit};
use crate::graph::{row_to_node, NODE_COLUMNS};
use crate::pool::Database;
use crate::schema::LEXICAL_DOCUMENT;
use brainstore_types::error::{require_dimension, StoreResult};
use brainstore_types::graph::Node;
use brainstore_types::search::{HybridSearchRequest, ScopeFilter, SearchResult};
use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;

/// A bind value for a scope condition.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FilterArg {
    Text(String),
    TextArray(Vec<String>),
}

/// Extra `AND` conditions plus their bind values, numbered from a given placeholder.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ScopeClause {
    pub sql: String,
    pub args: Vec<FilterArg>,
}

/// Build the optional scope conditions. Tenant is bound separately as `$1`.
pub(crate) fn scope_clause(scope: &ScopeFilter, first_placeholder: usize) -> ScopeClause {
    let mut clause = ScopeClause::default();
    if scope.is_unrestricted() {
        return clause;
    }
    let mut n = first_placeholder;
    if let Some(user_id) = scope.user_id.as_deref() {
        clause
            .sql
            .push_str(&format!(" AND (user_id = ${n} OR user_id IS NULL)"));
        clause.args.push(FilterArg::Text(user_id.to_string()));
        n += 1;
    }
    if let Some(path) = scope.path_scope.as_ref() {
        clause
            .sql
            .push_str(&format!(" AND taxonomy_path <@ ${n}::ltree"));
        clause.args.push(FilterArg::Text(path.as_str().to_string()));
        n += 1;
    }
    if !scope.source_types.is_empty() {
        clause.sql.push_str(&format!(" AND source_type = ANY(${n})"));
        clause
            .args
            .push(FilterArg::TextArray(scope.source_types.clone()));
    }
    clause
}

fn vector_sql(scope: &ScopeClause) -> String {
    format!(
        "SELECT id, (1 - (embedding <=> $2))::float8 AS score
         FROM knowledge_nodes
         WHERE tenant_id = $1 AND node_kind = 'chunk' AND embedding IS NOT NULL{}
         ORDER BY embedding <=> $2, id
         LIMIT $3",
        scope.sql
    )
}

fn text_sql(scope: &ScopeClause) -> String {
    format!(
        "SELECT id, ts_rank_cd({LEXICAL_DOCUMENT}, query)::float8 AS score
         FROM knowledge_nodes, websearch_to_tsquery('simple', $2) AS query
         WHERE tenant_id = $1 AND node_kind = 'chunk' AND {LEXICAL_DOCUMENT} @@ query{}
         ORDER BY score DESC, id
         LIMIT $3",
        scope.sql
    )
}

/// Hybrid retrieval over chunk nodes.
#[derive(Clone)]
pub struct HybridSearch {
    db: Database,
}

impl HybridSearch {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Rank chunks against the request's text and vector.
    ///
    /// Returns an empty list, without querying, when the tenant is blank or
    /// either bound is zero. An empty `query_vector` disables the vector
    /// branch; blank `query_text` disables the lexical branch.
    pub async fn hybrid_search(&self, request: &HybridSearchRequest) -> StoreResult<Vec<SearchResult>> {
        if request.tenant_id.trim().is_empty() {
            return Ok(Vec::new());
        }
        let Some(limit) = request.effective_limit() else {
            return Ok(Vec::new());
        };
        if !request.query_vector.is_empty() {
            require_dimension(
                "query_vector",
                &request.query_vector,
                self.db.config().vector_dim,
            )?;
        }

        let (vector_hits, text_hits) =
            tokio::try_join!(self.vector_branch(request), self.text_branch(request))?;
        let fused = fuse(
            &vector_hits,
            &text_hits,
            request.fusion,
            &request.params,
            limit as usize,
        );
        debug!(
            tenant_id = %request.tenant_id,
            vector = vector_hits.len(),
            text = text_hits.len(),
            fused = fused.len(),
            fusion = ?request.fusion,
            "Hybrid search branches fused"
        );
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = fused.iter().map(|h| h.id.clone()).collect();
        let mut nodes = self.fetch_nodes(&request.tenant_id, &ids).await?;
        Ok(fused
            .into_iter()
            .filter_map(|hit| {
                nodes.remove(&hit.id).map(|node| SearchResult {
                    node,
                    score: hit.score,
                    vector_score: hit.vector_score,
                    text_score: hit.text_score,
                })
            })
            .collect())
    }

    async fn vector_branch(&self, request: &HybridSearchRequest) -> StoreResult<Vec<BranchHit>> {
        if request.query_vector.is_empty() {
            return Ok(Vec::new());
        }
        let scope = scope_clause(&request.scope, 4);
        let sql = vector_sql(&scope);
        let mut query = sqlx::query(&sql)
            .bind(&request.tenant_id)
            .bind(pgvector::Vector::from(request.query_vector.clone()))
            .bind(i64::from(request.candidate_k));
        for arg in &scope.args {
            query = match arg {
                FilterArg::Text(value) => query.bind(value),
                FilterArg::TextArray(values) => query.bind(values),
            };
        }

        let mut tc = self.db.tenant_connection(&request.tenant_id, None).await?;
        let rows = query.fetch_all(tc.conn()).await.map_err(classify)?;
        tc.commit().await?;
        rows.iter().map(row_to_hit).collect()
    }

    async fn text_branch(&self, request: &HybridSearchRequest) -> StoreResult<Vec<BranchHit>> {
        let text = request.query_text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let scope = scope_clause(&request.scope, 4);
        let sql = text_sql(&scope);
        let mut query = sqlx::query(&sql)
            .bind(&request.tenant_id)
            .bind(text)
            .bind(i64::from(request.candidate_k));
        for arg in &scope.args {
            query = match arg {
                FilterArg::Text(value) => query.bind(value),
                FilterArg::TextArray(values) => query.bind(values),
            };
        }

        let mut tc = self.db.tenant_connection(&request.tenant_id, None).await?;
        let rows = query.fetch_all(tc.conn()).await.map_err(classify)?;
        tc.commit().await?;
        rows.iter().map(row_to_hit).collect()
    }

    async fn fetch_nodes(&self, tenant_id: &str, ids: &[String]) -> StoreResult<HashMap<String, Node>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM knowledge_nodes WHERE tenant_id = $1 AND id = ANY($2)");
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(ids)
            .fetch_all(tc.conn())
            .await
            .map_err(classify)?;
        tc.commit().await?;
        rows.iter()
            .map(|row| row_to_node(row).map(|node| (node.id.clone(), node)))
            .collect()
    }
}

fn row_to_hit(row: &sqlx::postgres::PgRow) -> StoreResult<BranchHit> {
    Ok(BranchHit {
        id: row.try_get("id").map_err(classify)?,
        score: row.try_get("score").map_err(classify)?,
    })
}
