//! Core types and traits for the brainstore knowledge store.
//!
//! This crate defines the shared data model (graph nodes and edges, episodic
//! events, user facts, taxonomy entries, agent traces, news items), the error
//! taxonomy, store configuration and the capability traits implemented by the
//! storage backend. It contains no I/O.

pub mod config;
pub mod error;
pub mod graph;
pub mod memory;
pub mod news;
pub mod search;
pub mod store;
pub mod taxonomy;
pub mod trace;
