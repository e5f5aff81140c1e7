//! Repository context gathering under a hard token budget.
//!
//! Three collectors feed the LLM pipeline: the [`gatherer`] walks the repo and
//! assembles priority-ordered numbered excerpts, the [`chunker`] splits large
//! corpora into token-bounded groups for per-chunk analysis, and [`symbols`]
//! renders a compact architectural view from a persisted symbol index. All of
//! them draw tokens from one shared [`ContextBudget`].

pub mod budget;
pub mod chunker;
pub mod error;
pub mod gatherer;
pub mod scoring;
pub mod symbols;

pub use budget::{estimate_tokens, ContextBudget, MAX_SAFE_CONTEXT_TOKENS};
pub use chunker::{ChunkConfig, ChunkFile, ChunkPlan, CodeChunker, FileChunk};
pub use error::{GatherError, Result};
pub use gatherer::{numbered, truncate_utf8, ContextGatherer, GatherConfig, GatheredContext};
pub use symbols::{SymbolContext, SymbolContextConfig};
