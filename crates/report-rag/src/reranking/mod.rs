pub mod cross_encoder;

pub use cross_encoder::OnnxCrossEncoder;

use anyhow::Result;
use async_trait::async_trait;

/// Cross-encoder relevance scoring of (query, passage) pairs.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One relevance logit per pair, in input order. Higher = more relevant.
    async fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;
}
