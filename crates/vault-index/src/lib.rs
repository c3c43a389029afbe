//! Embedded SQL+FTS secondary index over a tenant's vault: note metadata,
//! full-text search, tags, resolved wikilink edges, conversation threads,
//! and context-tree storage. One `rusqlite` connection per process, guarded
//! by a mutex rather than pooled — every write here is a short transaction,
//! never a long-held lock.

mod db;
mod error;
pub mod health;
pub mod indexer;
pub mod query;
pub mod threads;

pub use db::IndexDb;
pub use error::IndexError;
pub use health::IndexHealth;
pub use indexer::{current_version, IndexNoteInput, IndexResult};
pub use query::{Backlink, GraphEdge, GraphNode, SearchHit, TagCount, MAX_SEARCH_LIMIT};
pub use threads::{ThreadEntry, ThreadSummary};
