//! Knowledge graph store: node and edge upserts, recursive traversal, aliases.

use crate::error::classify;
use crate::pool::Database;
use brainstore_types::error::{
    require_dimension, require_non_empty, require_tenant, StoreError, StoreResult,
};
use brainstore_types::graph::{
    truncate_preview, Edge, GraphSearchRequest, GraphSearchResult, KgFact, Node, NodeAlias,
    NodeKind, TaxonomyPath, TraversedEdge, SOURCE_TYPES,
};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Columns selected whenever a node is read back. Embeddings are never read.
pub(crate) const NODE_COLUMNS: &str = "id, tenant_id, user_id, node_kind, source_type, source_id, \
     title, content, struct_data, keywords_text, content_hash, taxonomy_path::text AS taxonomy_path, created_at";

const UPSERT_NODE_SQL: &str = "INSERT INTO knowledge_nodes (
        id, tenant_id, user_id, node_kind, source_type, source_id, title, content,
        struct_data, keywords_text, content_hash, taxonomy_path, embedding
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12::ltree, $13)
    ON CONFLICT (id) DO UPDATE SET
        title = EXCLUDED.title,
        content = EXCLUDED.content,
        struct_data = EXCLUDED.struct_data,
        keywords_text = EXCLUDED.keywords_text,
        content_hash = EXCLUDED.content_hash,
        taxonomy_path = EXCLUDED.taxonomy_path,
        embedding = EXCLUDED.embedding
    WHERE knowledge_nodes.tenant_id = EXCLUDED.tenant_id";

/// Inserts nothing unless both endpoints are nodes of the edge's tenant.
const UPSERT_EDGE_SQL: &str = "INSERT INTO knowledge_edges (tenant_id, source_id, target_id, relation, weight, metadata)
    SELECT $1, $2, $3, $4, $5, $6
    WHERE EXISTS (SELECT 1 FROM knowledge_nodes WHERE id = $2 AND tenant_id = $1)
      AND EXISTS (SELECT 1 FROM knowledge_nodes WHERE id = $3 AND tenant_id = $1)
    ON CONFLICT (tenant_id, source_id, target_id, relation) DO UPDATE SET
        weight = EXCLUDED.weight,
        metadata = EXCLUDED.metadata";

/// Breadth-first walk over outgoing edges. `UNION` plus the depth bound
/// guarantees termination on cyclic graphs; each edge is reported at the
/// shallowest depth it was reached.
const WALK_SQL: &str = "WITH RECURSIVE walk (source_id, target_id, relation, depth) AS (
        SELECT e.source_id, e.target_id, e.relation, 1
        FROM knowledge_edges e
        WHERE e.tenant_id = $1
          AND e.source_id = ANY($2)
          AND ($3::text[] IS NULL OR e.relation = ANY($3))
      UNION
        SELECT e.source_id, e.target_id, e.relation, w.depth + 1
        FROM walk w
        JOIN knowledge_edges e ON e.source_id = w.target_id AND e.tenant_id = $1
        WHERE w.depth < $4
          AND ($3::text[] IS NULL OR e.relation = ANY($3))
    ),
    found AS (
        SELECT source_id, target_id, relation, MIN(depth) AS depth
        FROM walk
        GROUP BY source_id, target_id, relation
    )
    SELECT f.source_id, f.target_id, f.relation, f.depth, e.weight, e.metadata
    FROM found f
    JOIN knowledge_edges e
      ON e.tenant_id = $1 AND e.source_id = f.source_id
     AND e.target_id = f.target_id AND e.relation = f.relation
    ORDER BY f.depth, f.source_id, f.target_id, f.relation
    LIMIT $5";

/// Knowledge graph over `knowledge_nodes`, `knowledge_edges` and `knowledge_aliases`.
#[derive(Clone)]
pub struct KnowledgeGraph {
    db: Database,
}

impl KnowledgeGraph {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert every node, then every edge, in one transaction.
    pub async fn upsert_graph(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
        nodes: &[Node],
        edges: &[Edge],
    ) -> StoreResult<()> {
        require_tenant(tenant_id)?;
        let dim = self.db.config().vector_dim;
        for node in nodes {
            validate_node(node, tenant_id, dim)?;
        }
        for edge in edges {
            validate_edge(edge, tenant_id)?;
        }
        if nodes.is_empty() && edges.is_empty() {
            return Ok(());
        }

        let mut tc = self.db.tenant_connection(tenant_id, user_id).await?;
        for node in nodes {
            upsert_node(tc.conn(), tenant_id, user_id, node).await?;
        }
        for edge in edges {
            upsert_edge(tc.conn(), tenant_id, edge).await?;
        }
        tc.commit().await?;
        debug!(
            tenant_id,
            nodes = nodes.len(),
            edges = edges.len(),
            "Graph upserted"
        );
        Ok(())
    }

    /// Multi-hop traversal from the entrypoints.
    pub async fn graph_search(&self, request: &GraphSearchRequest) -> StoreResult<GraphSearchResult> {
        require_tenant(&request.tenant_id)?;
        if request.entrypoint_ids.is_empty() {
            return Ok(GraphSearchResult::default());
        }
        let tenant_id = request.tenant_id.as_str();
        let relations = normalize_relations(request.allowed_relations.as_deref());
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;

        let edges = if request.max_hops == 0 || request.max_results == 0 {
            Vec::new()
        } else {
            walk_edges(
                tc.conn(),
                tenant_id,
                &request.entrypoint_ids,
                relations,
                request.max_hops,
                request.max_results,
            )
            .await?
        };

        let mut ids: BTreeSet<&str> = request.entrypoint_ids.iter().map(String::as_str).collect();
        for traversed in &edges {
            ids.insert(&traversed.edge.source_id);
            ids.insert(&traversed.edge.target_id);
        }
        let ids: Vec<String> = ids.into_iter().map(str::to_string).collect();

        let preview = self.db.config().graph.preview_chars;
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM knowledge_nodes WHERE tenant_id = $1 AND id = ANY($2) ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(&ids)
            .fetch_all(tc.conn())
            .await
            .map_err(classify)?;
        let nodes = rows
            .iter()
            .map(|row| {
                let mut node = row_to_node(row)?;
                node.content = truncate_preview(&node.content, preview);
                Ok(node)
            })
            .collect::<StoreResult<Vec<_>>>()?;
        tc.commit().await?;

        debug!(
            tenant_id,
            nodes = nodes.len(),
            edges = edges.len(),
            max_hops = request.max_hops,
            "Graph search complete"
        );
        Ok(GraphSearchResult { nodes, edges })
    }

    /// The traversal flattened to triples, for prompt grounding.
    pub async fn fetch_facts(
        &self,
        tenant_id: &str,
        entrypoint_ids: &[String],
        allowed_relations: Option<&[String]>,
        max_depth: u32,
        max_facts: u32,
    ) -> StoreResult<Vec<KgFact>> {
        require_tenant(tenant_id)?;
        if entrypoint_ids.is_empty() || max_depth == 0 || max_facts == 0 {
            return Ok(Vec::new());
        }
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let edges = walk_edges(
            tc.conn(),
            tenant_id,
            entrypoint_ids,
            normalize_relations(allowed_relations),
            max_depth,
            max_facts,
        )
        .await?;
        tc.commit().await?;
        Ok(edges
            .into_iter()
            .map(|t| KgFact {
                source_id: t.edge.source_id,
                relation: t.edge.relation,
                target_id: t.edge.target_id,
            })
            .collect())
    }

    /// Point `alias` at a node of the same tenant, replacing any previous target.
    pub async fn upsert_alias(&self, tenant_id: &str, alias: &NodeAlias) -> StoreResult<()> {
        require_tenant(tenant_id)?;
        require_non_empty("alias", &alias.alias)?;
        require_non_empty("alias node_id", &alias.node_id)?;
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let result = sqlx::query(
            "INSERT INTO knowledge_aliases (tenant_id, alias, node_id, source)
             SELECT $1, $2, $3, $4
             WHERE EXISTS (SELECT 1 FROM knowledge_nodes WHERE id = $3 AND tenant_id = $1)
             ON CONFLICT (tenant_id, alias) DO UPDATE SET
                 node_id = EXCLUDED.node_id,
                 source = EXCLUDED.source",
        )
        .bind(tenant_id)
        .bind(alias.alias.trim())
        .bind(&alias.node_id)
        .bind(&alias.source)
        .execute(tc.conn())
        .await
        .map_err(classify)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Validation(format!(
                "alias target '{}' is not a node of tenant '{tenant_id}'",
                alias.node_id
            )));
        }
        tc.commit().await
    }

    pub async fn resolve_aliases(
        &self,
        tenant_id: &str,
        aliases: &[String],
    ) -> StoreResult<HashMap<String, String>> {
        require_tenant(tenant_id)?;
        if aliases.is_empty() {
            return Ok(HashMap::new());
        }
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let rows = sqlx::query(
            "SELECT alias, node_id FROM knowledge_aliases WHERE tenant_id = $1 AND alias = ANY($2)",
        )
        .bind(tenant_id)
        .bind(aliases)
        .fetch_all(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        rows.iter()
            .map(|row| {
                let alias: String = row.try_get("alias").map_err(classify)?;
                let node_id: String = row.try_get("node_id").map_err(classify)?;
                Ok((alias, node_id))
            })
            .collect()
    }
}

async fn upsert_node(
    conn: &mut PgConnection,
    tenant_id: &str,
    user_id: Option<&str>,
    node: &Node,
) -> StoreResult<()> {
    let result = sqlx::query(UPSERT_NODE_SQL)
        .bind(&node.id)
        .bind(tenant_id)
        .bind(node.user_id.as_deref().or(user_id))
        .bind(node.kind.as_str())
        .bind(&node.source_type)
        .bind(&node.source_id)
        .bind(&node.title)
        .bind(&node.content)
        .bind(Json(&node.metadata))
        .bind(&node.keywords_text)
        .bind(&node.content_hash)
        .bind(node.taxonomy_path.as_ref().map(TaxonomyPath::as_str))
        .bind(node.embedding.clone().map(pgvector::Vector::from))
        .execute(conn)
        .await
        .map_err(classify)?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Validation(format!(
            "node id '{}' already belongs to another tenant",
            node.id
        )));
    }
    Ok(())
}

async fn upsert_edge(conn: &mut PgConnection, tenant_id: &str, edge: &Edge) -> StoreResult<()> {
    let result = sqlx::query(UPSERT_EDGE_SQL)
        .bind(tenant_id)
        .bind(&edge.source_id)
        .bind(&edge.target_id)
        .bind(&edge.relation)
        .bind(edge.weight)
        .bind(Json(&edge.metadata))
        .execute(conn)
        .await
        .map_err(classify)?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Validation(format!(
            "edge {} -[{}]-> {} must connect two nodes of tenant '{tenant_id}'",
            edge.source_id, edge.relation, edge.target_id
        )));
    }
    Ok(())
}

async fn walk_edges(
    conn: &mut PgConnection,
    tenant_id: &str,
    entrypoint_ids: &[String],
    relations: Option<&[String]>,
    max_hops: u32,
    limit: u32,
) -> StoreResult<Vec<TraversedEdge>> {
    let rows = sqlx::query(WALK_SQL)
        .bind(tenant_id)
        .bind(entrypoint_ids)
        .bind(relations)
        .bind(i32::try_from(max_hops).unwrap_or(i32::MAX))
        .bind(i64::from(limit))
        .fetch_all(conn)
        .await
        .map_err(classify)?;
    rows.iter()
        .map(|row| {
            let depth: i32 = row.try_get("depth").map_err(classify)?;
            let Json(metadata): Json<HashMap<String, serde_json::Value>> =
                row.try_get("metadata").map_err(classify)?;
            Ok(TraversedEdge {
                edge: Edge {
                    tenant_id: Some(tenant_id.to_string()),
                    source_id: row.try_get("source_id").map_err(classify)?,
                    target_id: row.try_get("target_id").map_err(classify)?,
                    relation: row.try_get("relation").map_err(classify)?,
                    weight: row.try_get("weight").map_err(classify)?,
                    metadata,
                },
                depth: depth.max(0) as u32,
            })
        })
        .collect()
}

/// An empty allowlist means "all relations".
fn normalize_relations(relations: Option<&[String]>) -> Option<&[String]> {
    relations.filter(|r| !r.is_empty())
}

/// Decode a row selected with [`NODE_COLUMNS`].
pub(crate) fn row_to_node(row: &PgRow) -> StoreResult<Node> {
    let kind: String = row.try_get("node_kind").map_err(classify)?;
    let path: Option<String> = row.try_get("taxonomy_path").map_err(classify)?;
    let Json(metadata): Json<HashMap<String, serde_json::Value>> =
        row.try_get("struct_data").map_err(classify)?;
    Ok(Node {
        id: row.try_get("id").map_err(classify)?,
        tenant_id: row.try_get("tenant_id").map_err(classify)?,
        user_id: row.try_get("user_id").map_err(classify)?,
        kind: kind.parse::<NodeKind>()?,
        source_type: row.try_get("source_type").map_err(classify)?,
        source_id: row.try_get("source_id").map_err(classify)?,
        title: row.try_get("title").map_err(classify)?,
        content: row.try_get("content").map_err(classify)?,
        metadata,
        keywords_text: row.try_get("keywords_text").map_err(classify)?,
        content_hash: row.try_get("content_hash").map_err(classify)?,
        taxonomy_path: path
            .map(TaxonomyPath::new)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        embedding: None,
        created_at: row.try_get("created_at").map_err(classify)?,
    })
}

pub(crate) fn validate_node(node: &Node, tenant_id: &str, dim: usize) -> StoreResult<()> {
    require_non_empty("node id", &node.id)?;
    require_non_empty("node content", &node.content)?;
    if let Some(owner) = node.tenant_id.as_deref() {
        if owner != tenant_id {
            return Err(StoreError::Validation(format!(
                "node '{}' has tenant '{owner}' but the call is for '{tenant_id}'",
                node.id
            )));
        }
    }
    if let Some(source_type) = node.source_type.as_deref() {
        if !SOURCE_TYPES.contains(&source_type) {
            return Err(StoreError::Validation(format!(
                "unknown source_type '{source_type}' (expected one of {SOURCE_TYPES:?})"
            )));
        }
    }
    if let Some(embedding) = node.embedding.as_deref() {
        require_dimension("node embedding", embedding, dim)?;
    }
    Ok(())
}

pub(crate) fn validate_edge(edge: &Edge, tenant_id: &str) -> StoreResult<()> {
    require_non_empty("edge source_id", &edge.source_id)?;
    require_non_empty("edge target_id", &edge.target_id)?;
    require_non_empty("edge relation", &edge.relation)?;
    if let Some(owner) = edge.tenant_id.as_deref() {
        if owner != tenant_id {
            return Err(StoreError::Validation(format!(
                "edge {} -> {} has tenant '{owner}' but the call is for '{tenant_id}'",
                edge.source_id, edge.target_id
            )));
        }
    }
    if !edge.weight.is_finite() {
        return Err(StoreError::Validation("edge weight must be finite".into()));
    }
    Ok(())
}
