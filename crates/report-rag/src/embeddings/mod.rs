pub mod http;

pub use http::HttpEmbeddings;

use anyhow::Result;
use async_trait::async_trait;

/// Turns query text into a vector comparable with the indexed chunk vectors.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a search query. Must be deterministic for a given text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding vector dimension
    fn dimension(&self) -> usize;
}
