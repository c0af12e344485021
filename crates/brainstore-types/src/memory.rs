//! Episodic events and durable per-user facts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One conversational turn to append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEpisode {
    /// Caller-chosen id. Reusing an id is a constraint violation.
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewEpisode {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            session_id: None,
            content: content.into(),
            embedding: None,
            metadata: HashMap::new(),
        }
    }
}

/// A stored, immutable conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A durable key-value belief about a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFact {
    pub tenant_id: String,
    pub user_id: String,
    pub fact_key: String,
    pub fact_value: serde_json::Value,
    /// Belief strength in [0, 1].
    pub confidence: f64,
    /// Episode this fact was extracted from.
    pub source_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// Retention bookkeeping for one tenant's episodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    pub total: i64,
    /// `None` when `total` is zero.
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}
