//! Hybrid retrieval over the knowledge store.
//!
//! One query flows through up to seven sequential stages: optional rewrite,
//! lexical and vector recall, type filtering, score thresholding, optional
//! cross-encoder rerank, depth-1 graph expansion, and a final limit with
//! slots reserved for expanded neighbors. Optional stages degrade silently
//! to the previous stage's output.

pub mod assembler;
pub mod config;
pub mod engine;
pub mod error;
pub mod expand;
pub mod rerank;
pub mod rewrite;

pub use assembler::{ContextAssembler, Policy};
pub use config::RetrievalConfig;
pub use engine::{RetrievalEngine, ScoredNode, SearchOptions, SearchResults};
pub use error::{Result, RetrievalError};
pub use rerank::{LexicalReranker, Reranker};
