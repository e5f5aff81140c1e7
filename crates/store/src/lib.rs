//! Persistent knowledge store: nodes, edges, embeddings, and an FTS index.
//!
//! Findings are promoted into [`Node`]s keyed for semantic upsert; the
//! retrieval engine reads them back through lexical ([`KnowledgeStore::search_fts`])
//! and vector ([`KnowledgeStore::list_with_embeddings`]) paths.

pub mod error;
pub mod node;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use node::{EmbeddingStats, Node, NodeEdge};
pub use store::KnowledgeStore;

/// Default store location relative to the repository root.
pub const MEMORY_DB_PATH: &str = ".taskwing/memory/memory.db";
