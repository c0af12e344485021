//! Commerce taxonomy catalog over `catalog_taxonomy`.

use crate::error::classify;
use crate::pool::Database;
use brainstore_types::error::{require_dimension, require_non_empty, require_tenant, StoreError, StoreResult};
use brainstore_types::graph::TaxonomyPath;
use brainstore_types::taxonomy::{TaxonomyDomain, TaxonomyEntry};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;

const ENTRY_COLUMNS: &str = "tenant_id, domain, name, path::text AS path, keywords, metadata, updated_at";

#[derive(Clone)]
pub struct TaxonomyCatalog {
    db: Database,
}

impl TaxonomyCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn ensure_enabled(&self) -> StoreResult<()> {
        if !self.db.config().include_commerce {
            return Err(StoreError::NotSupported(
                "taxonomy catalog requires include_commerce".into(),
            ));
        }
        Ok(())
    }

    /// Insert or replace the entry keyed by (tenant, domain, path).
    pub async fn upsert_taxonomy(&self, entry: &TaxonomyEntry) -> StoreResult<()> {
        self.ensure_enabled()?;
        require_tenant(&entry.tenant_id)?;
        require_non_empty("taxonomy name", &entry.name)?;
        if let Some(embedding) = entry.embedding.as_deref() {
            require_dimension("taxonomy embedding", embedding, self.db.config().vector_dim)?;
        }

        let mut tc = self.db.tenant_connection(&entry.tenant_id, None).await?;
        sqlx::query(
            "INSERT INTO catalog_taxonomy (tenant_id, domain, name, path, keywords, embedding, metadata, updated_at)
             VALUES ($1, $2, $3, $4::ltree, $5, $6, $7, now())
             ON CONFLICT (tenant_id, domain, path) DO UPDATE SET
                 name = EXCLUDED.name,
                 keywords = EXCLUDED.keywords,
                 embedding = EXCLUDED.embedding,
                 metadata = EXCLUDED.metadata,
                 updated_at = now()",
        )
        .bind(&entry.tenant_id)
        .bind(entry.domain.singular())
        .bind(&entry.name)
        .bind(entry.path.as_str())
        .bind(&entry.keywords)
        .bind(entry.embedding.clone().map(pgvector::Vector::from))
        .bind(Json(&entry.metadata))
        .execute(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        debug!(
            tenant_id = %entry.tenant_id,
            domain = %entry.domain,
            path = entry.path.as_str(),
            "Taxonomy entry upserted"
        );
        Ok(())
    }

    /// Every entry of the tenant, optionally restricted to one domain, ordered by domain then path.
    pub async fn get_all_taxonomy(
        &self,
        tenant_id: &str,
        domain: Option<TaxonomyDomain>,
    ) -> StoreResult<Vec<TaxonomyEntry>> {
        self.ensure_enabled()?;
        require_tenant(tenant_id)?;

        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let rows = match domain {
            Some(domain) => {
                let sql = format!(
                    "SELECT {ENTRY_COLUMNS} FROM catalog_taxonomy
                     WHERE tenant_id = $1 AND domain IN ($2, $3)
                     ORDER BY domain, path"
                );
                sqlx::query(&sql)
                    .bind(tenant_id)
                    .bind(domain.singular())
                    .bind(domain.plural())
                    .fetch_all(tc.conn())
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {ENTRY_COLUMNS} FROM catalog_taxonomy
                     WHERE tenant_id = $1
                     ORDER BY domain, path"
                );
                sqlx::query(&sql).bind(tenant_id).fetch_all(tc.conn()).await
            }
        }
        .map_err(classify)?;
        tc.commit().await?;
        rows.iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(row: &PgRow) -> StoreResult<TaxonomyEntry> {
    let domain: String = row.try_get("domain").map_err(classify)?;
    let path: String = row.try_get("path").map_err(classify)?;
    let Json(metadata): Json<HashMap<String, serde_json::Value>> =
        row.try_get("metadata").map_err(classify)?;
    Ok(TaxonomyEntry {
        tenant_id: row.try_get("tenant_id").map_err(classify)?,
        domain: domain
            .parse()
            .map_err(|e: StoreError| StoreError::Serialization(e.to_string()))?,
        name: row.try_get("name").map_err(classify)?,
        path: TaxonomyPath::new(path).map_err(|e| StoreError::Serialization(e.to_string()))?,
        keywords: row.try_get("keywords").map_err(classify)?,
        embedding: None,
        metadata,
        updated_at: row.try_get("updated_at").map_err(classify)?,
    })
}
