//! Agent execution traces for observability and audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A trace to append. The id is always generated by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTrace {
    pub tenant_id: String,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Name of the agent graph that ran.
    pub graph_name: Option<String>,
    /// Ordered tool invocations.
    pub tool_calls: Vec<serde_json::Value>,
    pub token_usage: HashMap<String, serde_json::Value>,
    pub timing_ms: Option<u64>,
    pub security_flags: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Causal chain of producing components, oldest first.
    pub provenance: Vec<String>,
}

impl NewTrace {
    pub fn new(tenant_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }
}

/// A stored trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    pub id: Uuid,
    pub tenant_id: String,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub graph_name: Option<String>,
    pub tool_calls: Vec<serde_json::Value>,
    pub token_usage: HashMap<String, serde_json::Value>,
    pub timing_ms: Option<u64>,
    pub security_flags: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub provenance: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Filters for listing traces, most recent first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceQuery {
    pub tenant_id: String,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    /// Only traces created strictly after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
}

impl TraceQuery {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: None,
            session_id: None,
            since: None,
            limit: 20,
        }
    }
}
