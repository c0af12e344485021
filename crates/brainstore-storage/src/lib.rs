//! Postgres storage layer for the brainstore knowledge store.
//!
//! One shared connection pool backs every store:
//! - **Graph** (`knowledge_nodes`, `knowledge_edges`, `knowledge_aliases`): upserts and bounded recursive traversal
//! - **Hybrid search**: pgvector cosine similarity and full-text rank, fused by weight or RRF
//! - **Episodic memory** (`episodic_events`, `user_facts`): append-only turns, per-user facts, retention
//! - **Taxonomy** and **news** archives, enabled per deployment
//! - **Trace log** (`agent_traces`)
//!
//! Every query runs inside a [`TenantConnection`] that carries the tenant as
//! row-level-security context and filters on `tenant_id` explicitly.
//! [`SchemaManager::ensure_schema`] creates and migrates the schema.

pub mod episodes;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod migration;
pub mod news;
pub mod pool;
pub mod schema;
pub mod search;
pub mod taxonomy;
pub mod traces;

mod substrate;

pub use error::classify;
pub use migration::{SchemaManager, SchemaReport};
pub use pool::{Database, PoolStatus, TenantConnection};
pub use substrate::KnowledgeSubstrate;
