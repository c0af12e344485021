//! News pipeline archive: harvested items, validated facts, generated posts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A harvested news item, unique per (tenant, url).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNewsItem {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    pub headline: String,
    pub summary: String,
    pub category: Option<String>,
    /// Upstream API the item was harvested from.
    pub source_api: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A validated fact, unique per (tenant, url).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsFact {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    pub headline: String,
    pub summary: String,
    pub category: Option<String>,
    pub suggested_agent: Option<String>,
    pub significance: f64,
    pub atomic_facts: Vec<String>,
    pub irony_potential: Option<String>,
    /// Write-only; never populated on reads.
    pub embedding: Option<Vec<f32>>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub raw_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewsFact {
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        url: impl Into<String>,
        headline: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            url: url.into(),
            headline: headline.into(),
            summary: summary.into(),
            category: None,
            suggested_agent: None,
            significance: 0.5,
            atomic_facts: Vec::new(),
            irony_potential: None,
            embedding: None,
            metadata: HashMap::new(),
            raw_id: None,
            created_at: None,
        }
    }
}

/// A fact returned by similarity lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNewsFact {
    pub id: String,
    pub url: String,
    pub headline: String,
    pub summary: String,
    pub category: Option<String>,
    pub score: f64,
}

/// A generated post awaiting or after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsPost {
    pub id: String,
    pub tenant_id: String,
    pub fact_id: Option<String>,
    /// Persona that wrote the post.
    pub agent: String,
    pub headline: String,
    pub content: String,
    pub emoji: String,
    /// Posts sharing a fact url within a tenant are deduplicated.
    pub fact_url: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// A published post returned by similarity lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNewsPost {
    pub id: String,
    pub agent: String,
    pub headline: String,
    pub content: String,
    pub emoji: String,
    pub score: f64,
}
