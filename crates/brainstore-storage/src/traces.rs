//! Append-only agent execution traces.

use crate::error::classify;
use crate::pool::Database;
use brainstore_types::error::{require_non_empty, require_tenant, StoreResult};
use brainstore_types::trace::{AgentTrace, NewTrace, TraceQuery};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

const TRACE_COLUMNS: &str = "id, tenant_id, agent_id, session_id, user_id, graph_name, tool_calls, \
     token_usage, timing_ms, security_flags, metadata, provenance, created_at";

#[derive(Clone)]
pub struct TraceLog {
    db: Database,
}

impl TraceLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a trace under a freshly generated id.
    pub async fn log_trace(&self, trace: &NewTrace) -> StoreResult<Uuid> {
        require_tenant(&trace.tenant_id)?;
        require_non_empty("agent_id", &trace.agent_id)?;
        let id = Uuid::new_v4();

        let mut tc = self
            .db
            .tenant_connection(&trace.tenant_id, trace.user_id.as_deref())
            .await?;
        sqlx::query(
            "INSERT INTO agent_traces (
                 id, tenant_id, agent_id, session_id, user_id, graph_name, tool_calls,
                 token_usage, timing_ms, security_flags, metadata, provenance
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(id)
        .bind(&trace.tenant_id)
        .bind(&trace.agent_id)
        .bind(&trace.session_id)
        .bind(&trace.user_id)
        .bind(&trace.graph_name)
        .bind(Json(&trace.tool_calls))
        .bind(Json(&trace.token_usage))
        .bind(trace.timing_ms.map(timing_param))
        .bind(Json(&trace.security_flags))
        .bind(Json(&trace.metadata))
        .bind(&trace.provenance)
        .execute(tc.conn())
        .await
        .map_err(classify)?;
        tc.commit().await?;
        debug!(tenant_id = %trace.tenant_id, agent_id = %trace.agent_id, %id, "Trace logged");
        Ok(id)
    }

    /// Filtered listing, most recent first.
    pub async fn get_traces(&self, query: &TraceQuery) -> StoreResult<Vec<AgentTrace>> {
        require_tenant(&query.tenant_id)?;
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {TRACE_COLUMNS} FROM agent_traces
             WHERE tenant_id = $1
               AND ($2::text IS NULL OR agent_id = $2)
               AND ($3::text IS NULL OR session_id = $3)
               AND ($4::timestamptz IS NULL OR created_at > $4)
             ORDER BY created_at DESC, id
             LIMIT $5"
        );
        let mut tc = self.db.tenant_connection(&query.tenant_id, None).await?;
        let rows = sqlx::query(&sql)
            .bind(&query.tenant_id)
            .bind(&query.agent_id)
            .bind(&query.session_id)
            .bind(query.since)
            .bind(i64::from(query.limit))
            .fetch_all(tc.conn())
            .await
            .map_err(classify)?;
        tc.commit().await?;
        rows.iter().map(row_to_trace).collect()
    }
}

/// `timing_ms` is an `INTEGER` column; larger values saturate.
fn timing_param(ms: u64) -> i32 {
    i32::try_from(ms).unwrap_or(i32::MAX)
}

fn row_to_trace(row: &PgRow) -> StoreResult<AgentTrace> {
    type JsonMap = Json<HashMap<String, serde_json::Value>>;
    let Json(tool_calls): Json<Vec<serde_json::Value>> =
        row.try_get("tool_calls").map_err(classify)?;
    let Json(token_usage): JsonMap = row.try_get("token_usage").map_err(classify)?;
    let Json(security_flags): JsonMap = row.try_get("security_flags").map_err(classify)?;
    let Json(metadata): JsonMap = row.try_get("metadata").map_err(classify)?;
    let timing_ms: Option<i32> = row.try_get("timing_ms").map_err(classify)?;
    Ok(AgentTrace {
        id: row.try_get("id").map_err(classify)?,
        tenant_id: row.try_get("tenant_id").map_err(classify)?,
        agent_id: row.try_get("agent_id").map_err(classify)?,
        session_id: row.try_get("session_id").map_err(classify)?,
        user_id: row.try_get("user_id").map_err(classify)?,
        graph_name: row.try_get("graph_name").map_err(classify)?,
        tool_calls,
        token_usage,
        timing_ms: timing_ms.map(|ms| ms.max(0) as u64),
        security_flags,
        metadata,
        provenance: row.try_get("provenance").map_err(classify)?,
        created_at: row.try_get("created_at").map_err(classify)?,
    })
}
