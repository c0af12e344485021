//! News pipeline archive over `news_raw`, `news_facts` and `news_posts`.

use crate::error::classify;
use crate::pool::Database;
use brainstore_types::error::{require_dimension, require_non_empty, require_tenant, StoreError, StoreResult};
use brainstore_types::news::{NewsFact, NewsPost, RawNewsItem, ScoredNewsFact, ScoredNewsPost};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;

const FACT_COLUMNS: &str = "id, tenant_id, url, headline, summary, category, suggested_agent, \
     significance, atomic_facts, irony_potential, metadata, raw_id, created_at";

const POST_VALUES: &str = "INSERT INTO news_posts (
        id, tenant_id, fact_id, agent, headline, content, emoji, fact_url, embedding, scheduled_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)";

#[derive(Clone)]
pub struct NewsArchive {
    db: Database,
}

impl NewsArchive {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn ensure_enabled(&self) -> StoreResult<()> {
        if !self.db.config().include_news {
            return Err(StoreError::NotSupported(
                "news archive requires include_news".into(),
            ));
        }
        Ok(())
    }

    fn check_vector(&self, field: &str, vector: &[f32]) -> StoreResult<()> {
        require_dimension(field, vector, self.db.config().vector_dim)
    }

    /// Upsert a harvested item keyed by (tenant, url). Returns the stored id,
    /// which is the existing row's when the url was already archived.
    pub async fn upsert_raw(&self, item: &RawNewsItem) -> StoreResult<String> {
        self.ensure_enabled()?;
        require_tenant(&item.tenant_id)?;
        require_non_empty("news id", &item.id)?;
        require_non_empty("news url", &item.url)?;

        let mut tc = self.db.tenant_connection(&item.tenant_id, None).await?;
        let id: String = sqlx::query_scalar(
            "INSERT INTO news_raw (id, tenant_id, url, headline, summary, category, source_api, metadata, harvested_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
             ON CONFLICT (tenant_id, url) DO UPDATE SET
                 headline = EXCLUDED.headline,
                 summary = EXCLUDED.summary,
                 category = EXCLUDED.category,
                 metadata = EXCLUDED.metadata,
                 harvested_at = now()
             RETURNING id",
        )
        .bind(&item.id)
        .bind(&item.tenant_id)
        .bind(&item.url)
        .bind(&item.headline)
        .bind(&item.summary)
        .bind(&item.category)
        .bind(&item.source_api)
        .bind(Json(&item.metadata))
        .fetch_one(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        if id != item.id {
            debug!(tenant_id = %item.tenant_id, url = %item.url, id = %id, "News item already archived");
        }
        Ok(id)
    }

    /// Upsert a validated fact keyed by (tenant, url). Returns the stored id.
    pub async fn upsert_news_fact(&self, fact: &NewsFact) -> StoreResult<String> {
        self.ensure_enabled()?;
        require_tenant(&fact.tenant_id)?;
        require_non_empty("fact id", &fact.id)?;
        require_non_empty("fact url", &fact.url)?;
        if let Some(embedding) = fact.embedding.as_deref() {
            self.check_vector("fact embedding", embedding)?;
        }

        let mut tc = self.db.tenant_connection(&fact.tenant_id, None).await?;
        let id: String = sqlx::query_scalar(
            "INSERT INTO news_facts (
                 id, tenant_id, url, headline, summary, category, suggested_agent,
                 significance, atomic_facts, irony_potential, embedding, metadata, raw_id
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (tenant_id, url) DO UPDATE SET
                 headline = EXCLUDED.headline,
                 summary = EXCLUDED.summary,
                 category = EXCLUDED.category,
                 suggested_agent = EXCLUDED.suggested_agent,
                 significance = EXCLUDED.significance,
                 atomic_facts = EXCLUDED.atomic_facts,
                 irony_potential = EXCLUDED.irony_potential,
                 embedding = EXCLUDED.embedding,
                 metadata = EXCLUDED.metadata
             RETURNING id",
        )
        .bind(&fact.id)
        .bind(&fact.tenant_id)
        .bind(&fact.url)
        .bind(&fact.headline)
        .bind(&fact.summary)
        .bind(&fact.category)
        .bind(&fact.suggested_agent)
        .bind(fact.significance)
        .bind(&fact.atomic_facts)
        .bind(&fact.irony_potential)
        .bind(fact.embedding.clone().map(pgvector::Vector::from))
        .bind(Json(&fact.metadata))
        .bind(&fact.raw_id)
        .fetch_one(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        Ok(id)
    }

    /// Recent facts, newest first. `since` is inclusive.
    pub async fn get_news_facts(
        &self,
        tenant_id: &str,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<NewsFact>> {
        self.ensure_enabled()?;
        require_tenant(tenant_id)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {FACT_COLUMNS} FROM news_facts
             WHERE tenant_id = $1 AND ($2::timestamptz IS NULL OR created_at >= $2)
             ORDER BY created_at DESC, id
             LIMIT $3"
        );
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(since)
            .bind(i64::from(limit))
            .fetch_all(tc.conn())
            .await
            .map_err(classify)?;
        tc.commit().await?;
        rows.iter().map(row_to_fact).collect()
    }

    /// Facts at least `min_score` cosine-similar to `vector`, most similar first.
    pub async fn search_news_facts(
        &self,
        tenant_id: &str,
        vector: &[f32],
        limit: u32,
        min_score: f64,
    ) -> StoreResult<Vec<ScoredNewsFact>> {
        self.ensure_enabled()?;
        require_tenant(tenant_id)?;
        self.check_vector("query vector", vector)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let rows = sqlx::query(
            "SELECT id, url, headline, summary, category, (1 - (embedding <=> $2))::float8 AS score
             FROM news_facts
             WHERE tenant_id = $1 AND embedding IS NOT NULL
               AND 1 - (embedding <=> $2) >= $3
             ORDER BY embedding <=> $2, id
             LIMIT $4",
        )
        .bind(tenant_id)
        .bind(pgvector::Vector::from(vector.to_vec()))
        .bind(min_score)
        .bind(i64::from(limit))
        .fetch_all(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        rows.iter()
            .map(|row| {
                Ok(ScoredNewsFact {
                    id: row.try_get("id").map_err(classify)?,
                    url: row.try_get("url").map_err(classify)?,
                    headline: row.try_get("headline").map_err(classify)?,
                    summary: row.try_get("summary").map_err(classify)?,
                    category: row.try_get("category").map_err(classify)?,
                    score: row.try_get("score").map_err(classify)?,
                })
            })
            .collect()
    }

    /// Upsert a generated post and return the id that survived.
    ///
    /// With a `fact_url` the post is deduplicated per (tenant, fact_url) and
    /// the existing row's id wins; otherwise it is keyed by id.
    pub async fn upsert_post(&self, post: &NewsPost) -> StoreResult<String> {
        self.ensure_enabled()?;
        require_tenant(&post.tenant_id)?;
        require_non_empty("post id", &post.id)?;
        require_non_empty("post agent", &post.agent)?;
        if let Some(embedding) = post.embedding.as_deref() {
            self.check_vector("post embedding", embedding)?;
        }
        let fact_url = post.fact_url.as_deref().filter(|u| !u.trim().is_empty());

        let sql = match fact_url {
            Some(_) => format!(
                "{POST_VALUES}
                 ON CONFLICT (tenant_id, fact_url) DO UPDATE SET
                     content = EXCLUDED.content,
                     scheduled_at = EXCLUDED.scheduled_at,
                     embedding = EXCLUDED.embedding
                 RETURNING id"
            ),
            None => format!(
                "{POST_VALUES}
                 ON CONFLICT (id) DO UPDATE SET content = EXCLUDED.content
                 WHERE news_posts.tenant_id = EXCLUDED.tenant_id
                 RETURNING id"
            ),
        };

        let mut tc = self.db.tenant_connection(&post.tenant_id, None).await?;
        let surviving: Option<String> = sqlx::query_scalar(&sql)
            .bind(&post.id)
            .bind(&post.tenant_id)
            .bind(&post.fact_id)
            .bind(&post.agent)
            .bind(&post.headline)
            .bind(&post.content)
            .bind(&post.emoji)
            .bind(fact_url)
            .bind(post.embedding.clone().map(pgvector::Vector::from))
            .bind(post.scheduled_at)
            .fetch_optional(tc.conn())
            .await
            .map_err(classify)?;
        let Some(id) = surviving else {
            return Err(StoreError::Validation(format!(
                "post id '{}' already belongs to another tenant",
                post.id
            )));
        };
        tc.commit().await?;
        debug!(tenant_id = %post.tenant_id, id = %id, deduplicated = id != post.id, "News post upserted");
        Ok(id)
    }

    /// Record publication. Returns whether a post of this tenant was updated.
    pub async fn mark_published(&self, tenant_id: &str, post_id: &str, message_id: i64) -> StoreResult<bool> {
        self.ensure_enabled()?;
        require_tenant(tenant_id)?;
        require_non_empty("post id", post_id)?;
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let result = sqlx::query(
            "UPDATE news_posts SET published_at = now(), message_id = $3
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(post_id)
        .bind(message_id)
        .execute(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Published posts most similar to `vector`.
    pub async fn search_posts(&self, tenant_id: &str, vector: &[f32], limit: u32) -> StoreResult<Vec<ScoredNewsPost>> {
        self.ensure_enabled()?;
        require_tenant(tenant_id)?;
        self.check_vector("query vector", vector)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let rows = sqlx::query(
            "SELECT id, agent, headline, content, emoji, (1 - (embedding <=> $2))::float8 AS score
             FROM news_posts
             WHERE tenant_id = $1 AND embedding IS NOT NULL AND published_at IS NOT NULL
             ORDER BY embedding <=> $2, id
             LIMIT $3",
        )
        .bind(tenant_id)
        .bind(pgvector::Vector::from(vector.to_vec()))
        .bind(i64::from(limit))
        .fetch_all(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        rows.iter()
            .map(|row| {
                Ok(ScoredNewsPost {
                    id: row.try_get("id").map_err(classify)?,
                    agent: row.try_get("agent").map_err(classify)?,
                    headline: row.try_get("headline").map_err(classify)?,
                    content: row.try_get("content").map_err(classify)?,
                    emoji: row.try_get("emoji").map_err(classify)?,
                    score: row.try_get("score").map_err(classify)?,
                })
            })
            .collect()
    }
}

fn row_to_fact(row: &PgRow) -> StoreResult<NewsFact> {
    let Json(metadata): Json<HashMap<String, serde_json::Value>> =
        row.try_get("metadata").map_err(classify)?;
    Ok(NewsFact {
        id: row.try_get("id").map_err(classify)?,
        tenant_id: row.try_get("tenant_id").map_err(classify)?,
        url: row.try_get("url").map_err(classify)?,
        headline: row.try_get("headline").map_err(classify)?,
        summary: row.try_get("summary").map_err(classify)?,
        category: row.try_get("category").map_err(classify)?,
        suggested_agent: row.try_get("suggested_agent").map_err(classify)?,
        significance: row.try_get("significance").map_err(classify)?,
        atomic_facts: row.try_get("atomic_facts").map_err(classify)?,
        irony_potential: row.try_get("irony_potential").map_err(classify)?,
        embedding: None,
        metadata,
        raw_id: row.try_get("raw_id").map_err(classify)?,
        created_at: row.try_get("created_at").map_err(classify)?,
    })
}
