//! Memory substrate for the Hearth agent platform.
//!
//! Provides the durable stores and the knowledge pipeline every integration
//! depends on:
//! - **Memory store** (SQLite): documents, fragments, generic event
//!   memories, rooms, and entities, queryable by containment and by
//!   embedding similarity.
//! - **Key-value cache** (SQLite): dumb get/set; staleness is a caller-side
//!   contract via the [`cache::Snapshot`] envelope.
//! - **Knowledge pipeline**: normalize → chunk → embed → persist, and the
//!   two-hop retrieval path (fragment similarity → parent document).
//! - **Relationship ranker**: interaction-weighted textual summaries.

pub mod cache;
pub mod chunk;
pub mod ingest;
pub mod migration;
pub mod normalize;
pub mod relationships;
pub mod store;

pub use cache::{Snapshot, SqliteCache};
pub use ingest::KnowledgePipeline;
pub use relationships::{format_relationships, summarize_relationships};
pub use store::{MemoryStore, ScoredFragment};
