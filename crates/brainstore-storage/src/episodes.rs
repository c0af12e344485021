//! Episodic events and per-user facts, with retention helpers.

use crate::error::classify;
use crate::pool::Database;
use brainstore_types::error::{
    require_dimension, require_non_empty, require_tenant, StoreError, StoreResult,
};
use brainstore_types::memory::{Episode, EpisodeStats, NewEpisode, UserFact};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

const EPISODE_COLUMNS: &str = "id, tenant_id, user_id, session_id, content, metadata, created_at";

const FACT_COLUMNS: &str =
    "tenant_id, user_id, fact_key, fact_value, confidence, source_id, updated_at";

/// Append-only episode log plus the `user_facts` key-value table.
#[derive(Clone)]
pub struct EpisodicMemory {
    db: Database,
}

impl EpisodicMemory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert one episode. A reused id surfaces as a constraint violation.
    pub async fn add_episode(&self, episode: &NewEpisode) -> StoreResult<Uuid> {
        require_tenant(&episode.tenant_id)?;
        require_non_empty("episode user_id", &episode.user_id)?;
        require_non_empty("episode content", &episode.content)?;
        if let Some(embedding) = episode.embedding.as_deref() {
            require_dimension("episode embedding", embedding, self.db.config().vector_dim)?;
        }

        let mut tc = self
            .db
            .tenant_connection(&episode.tenant_id, Some(&episode.user_id))
            .await?;
        sqlx::query(
            "INSERT INTO episodic_events (id, tenant_id, user_id, session_id, content, embedding, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(episode.id)
        .bind(&episode.tenant_id)
        .bind(&episode.user_id)
        .bind(&episode.session_id)
        .bind(&episode.content)
        .bind(episode.embedding.clone().map(pgvector::Vector::from))
        .bind(Json(&episode.metadata))
        .execute(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        debug!(tenant_id = %episode.tenant_id, id = %episode.id, "Episode added");
        Ok(episode.id)
    }

    /// Most recent first.
    pub async fn get_recent_episodes(
        &self,
        tenant_id: &str,
        user_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<Episode>> {
        require_tenant(tenant_id)?;
        require_non_empty("user_id", user_id)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {EPISODE_COLUMNS} FROM episodic_events
             WHERE tenant_id = $1 AND user_id = $2
             ORDER BY created_at DESC, id
             LIMIT $3"
        );
        let mut tc = self.db.tenant_connection(tenant_id, Some(user_id)).await?;
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(user_id)
            .bind(i64::from(limit))
            .fetch_all(tc.conn())
            .await
            .map_err(classify)?;
        tc.commit().await?;
        rows.iter().map(row_to_episode).collect()
    }

    /// Episodes past the retention cutoff, oldest first.
    pub async fn get_old_episodes(
        &self,
        tenant_id: &str,
        older_than_days: u32,
        limit: u32,
    ) -> StoreResult<Vec<Episode>> {
        require_tenant(tenant_id)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {EPISODE_COLUMNS} FROM episodic_events
             WHERE tenant_id = $1 AND created_at < now() - make_interval(days => $2)
             ORDER BY created_at ASC, id
             LIMIT $3"
        );
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(days_param(older_than_days))
            .bind(i64::from(limit))
            .fetch_all(tc.conn())
            .await
            .map_err(classify)?;
        tc.commit().await?;
        rows.iter().map(row_to_episode).collect()
    }

    /// Delete exactly `ids` when given, otherwise everything older than the
    /// cutoff. Only rows of `tenant_id` are ever touched.
    pub async fn delete_old_episodes(
        &self,
        tenant_id: &str,
        older_than_days: u32,
        ids: Option<&[Uuid]>,
    ) -> StoreResult<u64> {
        require_tenant(tenant_id)?;
        if ids.is_some_and(<[Uuid]>::is_empty) {
            return Ok(0);
        }

        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let result = match ids {
            Some(ids) => {
                sqlx::query("DELETE FROM episodic_events WHERE tenant_id = $1 AND id = ANY($2)")
                    .bind(tenant_id)
                    .bind(ids)
                    .execute(tc.conn())
                    .await
            }
            None => {
                sqlx::query(
                    "DELETE FROM episodic_events
                     WHERE tenant_id = $1 AND created_at < now() - make_interval(days => $2)",
                )
                .bind(tenant_id)
                .bind(days_param(older_than_days))
                .execute(tc.conn())
                .await
            }
        }
        .map_err(classify)?;
        tc.commit().await?;

        let deleted = result.rows_affected();
        info!(
            tenant_id,
            deleted,
            explicit = ids.is_some(),
            older_than_days,
            "Episode retention cleanup"
        );
        Ok(deleted)
    }

    pub async fn count_episodes(&self, tenant_id: &str) -> StoreResult<EpisodeStats> {
        require_tenant(tenant_id)?;
        let mut tc = self.db.tenant_connection(tenant_id, None).await?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, MIN(created_at) AS oldest, MAX(created_at) AS newest
             FROM episodic_events WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_one(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        Ok(EpisodeStats {
            total: row.try_get("total").map_err(classify)?,
            oldest: row.try_get("oldest").map_err(classify)?,
            newest: row.try_get("newest").map_err(classify)?,
        })
    }

    /// Insert or fully replace the fact keyed by (tenant, user, key).
    pub async fn upsert_fact(
        &self,
        tenant_id: &str,
        user_id: &str,
        fact_key: &str,
        fact_value: serde_json::Value,
        confidence: f64,
        source_id: Option<Uuid>,
    ) -> StoreResult<()> {
        require_tenant(tenant_id)?;
        require_non_empty("user_id", user_id)?;
        require_non_empty("fact_key", fact_key)?;
        validate_confidence(confidence)?;

        let mut tc = self.db.tenant_connection(tenant_id, Some(user_id)).await?;
        sqlx::query(
            "INSERT INTO user_facts (tenant_id, user_id, fact_key, fact_value, confidence, source_id, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (tenant_id, user_id, fact_key) DO UPDATE SET
                 fact_value = EXCLUDED.fact_value,
                 confidence = EXCLUDED.confidence,
                 source_id = EXCLUDED.source_id,
                 updated_at = now()",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(fact_key)
        .bind(Json(&fact_value))
        .bind(confidence)
        .bind(source_id)
        .execute(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        debug!(tenant_id, user_id, fact_key, "User fact upserted");
        Ok(())
    }

    /// Most recently updated first.
    pub async fn get_user_facts(&self, tenant_id: &str, user_id: &str) -> StoreResult<Vec<UserFact>> {
        require_tenant(tenant_id)?;
        require_non_empty("user_id", user_id)?;
        let sql = format!(
            "SELECT {FACT_COLUMNS} FROM user_facts
             WHERE tenant_id = $1 AND user_id = $2
             ORDER BY updated_at DESC, fact_key"
        );
        let mut tc = self.db.tenant_connection(tenant_id, Some(user_id)).await?;
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(user_id)
            .fetch_all(tc.conn())
            .await
            .map_err(classify)?;
        tc.commit().await?;
        rows.iter().map(row_to_fact).collect()
    }
}

/// `make_interval(days => ...)` takes an `int`.
fn days_param(days: u32) -> i32 {
    i32::try_from(days).unwrap_or(i32::MAX)
}

fn validate_confidence(confidence: f64) -> StoreResult<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(StoreError::Validation(format!(
            "confidence must be within [0, 1], got {confidence}"
        )));
    }
    Ok(())
}

fn row_to_episode(row: &PgRow) -> StoreResult<Episode> {
    let Json(metadata): Json<HashMap<String, serde_json::Value>> =
        row.try_get("metadata").map_err(classify)?;
    Ok(Episode {
        id: row.try_get("id").map_err(classify)?,
        tenant_id: row.try_get("tenant_id").map_err(classify)?,
        user_id: row.try_get("user_id").map_err(classify)?,
        session_id: row.try_get("session_id").map_err(classify)?,
        content: row.try_get("content").map_err(classify)?,
        metadata,
        created_at: row.try_get("created_at").map_err(classify)?,
    })
}

fn row_to_fact(row: &PgRow) -> StoreResult<UserFact> {
    let Json(fact_value): Json<serde_json::Value> = row.try_get("fact_value").map_err(classify)?;
    Ok(UserFact {
        tenant_id: row.try_get("tenant_id").map_err(classify)?,
        user_id: row.try_get("user_id").map_err(classify)?,
        fact_key: row.try_get("fact_key").map_err(classify)?,
        fact_value,
        confidence: row.try_get("confidence").map_err(classify)?,
        source_id: row.try_get("source_id").map_err(classify)?,
        updated_at: row.try_get("updated_at").map_err(classify)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::unreachable_db;
    use serde_json::json;

    fn memory() -> EpisodicMemory {
        EpisodicMemory::new(unreachable_db())
    }

    #[test]
    fn test_confidence_bounds() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(0.42).is_ok());
        assert!(validate_confidence(1.01).is_err());
        assert!(validate_confidence(-0.1).is_err());
        assert!(validate_confidence(f64::NAN).is_err());
    }

    #[test]
    fn test_days_param_saturates() {
        assert_eq!(days_param(30), 30);
        assert_eq!(days_param(u32::MAX), i32::MAX);
    }

    #[tokio::test]
    async fn test_empty_explicit_ids_delete_nothing_without_query() {
        let deleted = memory()
            .delete_old_episodes("acme", 30, Some(&[]))
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_delete_requires_tenant() {
        let err = memory().delete_old_episodes("", 30, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_episode_validates_before_query() {
        let mut episode = NewEpisode::new("acme", "u1", "hello");
        episode.embedding = Some(vec![0.1; 7]);
        assert!(matches!(
            memory().add_episode(&episode).await,
            Err(StoreError::Validation(_))
        ));

        let blank = NewEpisode::new("acme", "u1", "  ");
        assert!(matches!(
            memory().add_episode(&blank).await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_fact_validates_before_query() {
        let m = memory();
        let bad_conf = m
            .upsert_fact("acme", "u1", "diet", json!("vegan"), 1.5, None)
            .await;
        assert!(matches!(bad_conf, Err(StoreError::Validation(_))));
        let no_key = m.upsert_fact("acme", "u1", "", json!(1), 0.5, None).await;
        assert!(matches!(no_key, Err(StoreError::Validation(_))));
        let no_user = m.upsert_fact("acme", " ", "k", json!(1), 0.5, None).await;
        assert!(matches!(no_user, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_zero_limits_return_empty_without_query() {
        let m = memory();
        assert!(m.get_recent_episodes("acme", "u1", 0).await.unwrap().is_empty());
        assert!(m.get_old_episodes("acme", 30, 0).await.unwrap().is_empty());
    }
}
