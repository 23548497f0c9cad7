pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod llm;
pub mod rag;
pub mod rag_engine;
pub mod reranking;
pub mod retry;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export primary types for convenience
pub use config::RAGConfig;
pub use error::{ExpansionStep, PipelineError, PipelineResult};
pub use rag::{merge_sources, RerankOutcome};
pub use rag_engine::{AnswerPipeline, PipelineState, RagAnswer};
pub use types::{
    Chunk, ChunkGroup, ChunkId, ChunkMetadata, CitedChunk, ConversationTurn, RankedGroup,
    StageTimings, TimedStage,
};

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
