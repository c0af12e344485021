//! Knowledge graph types: content nodes, typed edges, traversal results.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Kind of a knowledge node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A retrievable piece of ingested content.
    Chunk,
    /// An extracted concept or entity.
    Concept,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Chunk => "chunk",
            NodeKind::Concept => "concept",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chunk" => Ok(NodeKind::Chunk),
            "concept" => Ok(NodeKind::Concept),
            other => Err(StoreError::Serialization(format!(
                "unknown node kind '{other}'"
            ))),
        }
    }
}

/// Dot-separated hierarchical path (ltree syntax), e.g. `book.chapter_03`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaxonomyPath(String);

impl TaxonomyPath {
    /// Parse and validate a path. Labels are `[A-Za-z0-9_]+`, at most 256 chars each.
    /// `-` is refused since ltree only accepts it from PostgreSQL 16.
    pub fn new(path: impl Into<String>) -> StoreResult<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(StoreError::Validation("taxonomy path is empty".to_string()));
        }
        for label in path.split('.') {
            let ok = !label.is_empty()
                && label.len() <= 256
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !ok {
                return Err(StoreError::Validation(format!(
                    "invalid taxonomy path '{path}': bad label '{label}'"
                )));
            }
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaxonomyPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TaxonomyPath::new(value)
    }
}

impl From<TaxonomyPath> for String {
    fn from(path: TaxonomyPath) -> Self {
        path.0
    }
}

impl fmt::Display for TaxonomyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of knowledge content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable id; upserts are keyed on it.
    pub id: String,
    /// Owning tenant. Filled from the call on write; must match if set.
    pub tenant_id: Option<String>,
    /// Optional owner within the tenant.
    pub user_id: Option<String>,
    pub kind: NodeKind,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub content: String,
    /// Free-form structured metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Extra lexical terms indexed alongside the content.
    pub keywords_text: Option<String>,
    pub content_hash: Option<String>,
    pub taxonomy_path: Option<TaxonomyPath>,
    /// Written on upsert; reads leave it empty.
    pub embedding: Option<Vec<f32>>,
    /// Set by the database; ignored on write.
    pub created_at: Option<DateTime<Utc>>,
}

impl Node {
    /// A node with only the required fields populated.
    pub fn new(id: impl Into<String>, kind: NodeKind, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: None,
            user_id: None,
            kind,
            source_type: None,
            source_id: None,
            title: None,
            content: content.into(),
            metadata: HashMap::new(),
            keywords_text: None,
            content_hash: None,
            taxonomy_path: None,
            embedding: None,
            created_at: None,
        }
    }

    pub fn chunk(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Chunk, content)
    }

    pub fn concept(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Concept, content)
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Fill `content_hash` with the SHA-256 hex digest of the content.
    pub fn with_content_hash(mut self) -> Self {
        self.content_hash = Some(content_hash(&self.content));
        self
    }
}

/// SHA-256 hex digest used for chunk deduplication.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// A directed, typed relationship between two nodes of one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub tenant_id: Option<String>,
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    pub weight: f64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Edge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: None,
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation: relation.into(),
            weight: 1.0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// An edge reached during traversal, with the hop at which it was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversedEdge {
    pub edge: Edge,
    /// 1 for edges leaving an entrypoint.
    pub depth: u32,
}

/// Parameters for a multi-hop walk over outgoing edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSearchRequest {
    pub tenant_id: String,
    pub entrypoint_ids: Vec<String>,
    pub max_hops: u32,
    /// Restrict traversal to these relation labels. `None` or empty means all.
    pub allowed_relations: Option<Vec<String>>,
    /// Cap on returned edges, in breadth-first discovery order.
    pub max_results: u32,
}

/// Nodes touched and edges traversed by a graph search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSearchResult {
    /// Entrypoints plus every discovered endpoint, content cut to a preview.
    pub nodes: Vec<Node>,
    pub edges: Vec<TraversedEdge>,
}

impl GraphSearchResult {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// A (source, relation, target) triple from a graph walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KgFact {
    pub source_id: String,
    pub relation: String,
    pub target_id: String,
}

/// An alternative name resolving to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAlias {
    pub alias: String,
    pub node_id: String,
    /// Where the alias came from (e.g. "ner", "manual").
    pub source: String,
}

/// Accepted `source_type` values.
pub const SOURCE_TYPES: &[&str] = &["video", "book", "qa", "web", "knowledge"];

/// Cut `content` to at most `max_chars` characters on a char boundary.
pub fn truncate_preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => content[..idx].to_string(),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_roundtrip_strings() {
        assert_eq!("chunk".parse::<NodeKind>().unwrap(), NodeKind::Chunk);
        assert_eq!(NodeKind::Concept.to_string(), "concept");
        assert!("paragraph".parse::<NodeKind>().is_err());
    }

    #[test]
    fn test_taxonomy_path_validation() {
        assert!(TaxonomyPath::new("book.chapter_03").is_ok());
        assert!(TaxonomyPath::new("apparel.mens_shoes").is_ok());
        assert!(TaxonomyPath::new("apparel.mens-shoes").is_err());
        assert!(TaxonomyPath::new("").is_err());
        assert!(TaxonomyPath::new("book..chapter").is_err());
        assert!(TaxonomyPath::new("book.chapter 3").is_err());
        assert!(TaxonomyPath::new("book.*").is_err());
    }

    #[test]
    fn test_taxonomy_path_deserialize_validates() {
        let ok: Result<TaxonomyPath, _> = serde_json::from_str("\"a.b\"");
        assert!(ok.is_ok());
        let bad: Result<TaxonomyPath, _> = serde_json::from_str("\"a b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_truncate_preview_char_boundary() {
        assert_eq!(truncate_preview("hello", 10), "hello");
        assert_eq!(truncate_preview("hello", 3), "hel");
        // Multi-byte characters must not be split.
        assert_eq!(truncate_preview("привет", 2), "пр");
        assert_eq!(truncate_preview("", 5), "");
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = Node::chunk("n1", "same text").with_content_hash();
        let b = Node::chunk("n2", "same text").with_content_hash();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn test_edge_defaults() {
        let edge = Edge::new("a", "b", "mentions");
        assert_eq!(edge.weight, 1.0);
        assert!(edge.metadata.is_empty());
        assert!(edge.tenant_id.is_none());
    }
}
