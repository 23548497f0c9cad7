pub mod flat;

pub use flat::FlatIndex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One nearest-neighbor hit. `position` indexes the chunk store's identifier
/// sequence; negative values are padding some index backends emit when fewer
/// than `k` vectors exist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: i64,
    pub score: f32,
}

/// Direction in which index scores improve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOrder {
    /// Distances: smaller is better (L2).
    #[default]
    LowerIsBetter,
    /// Similarities: larger is better (inner product / cosine).
    HigherIsBetter,
}

impl ScoreOrder {
    /// Whether `candidate` beats `current`.
    pub fn is_better(&self, candidate: f32, current: f32) -> bool {
        match self {
            Self::LowerIsBetter => candidate < current,
            Self::HigherIsBetter => candidate > current,
        }
    }

    /// Best-first comparator.
    pub fn compare(&self, a: f32, b: f32) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        match self {
            Self::LowerIsBetter => ord,
            Self::HigherIsBetter => ord.reverse(),
        }
    }
}

/// Nearest-neighbor search over the chunk vectors.
pub trait VectorIndex: Send + Sync {
    /// Up to `k` hits, best-first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    fn score_order(&self) -> ScoreOrder;

    fn dimension(&self) -> usize;
}
