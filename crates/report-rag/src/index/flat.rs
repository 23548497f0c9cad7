//! Exact nearest-neighbor search over an in-memory matrix.
//!
//! Scores every row against the query (in parallel with rayon) and keeps the
//! top `k`. Equivalent to a flat L2 / inner-product index: fine for report
//! corpora of a few hundred thousand chunks.

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{ScoreOrder, SearchHit, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    L2,
    InnerProduct,
}

impl Metric {
    fn score_order(&self) -> ScoreOrder {
        match self {
            Self::L2 => ScoreOrder::LowerIsBetter,
            Self::InnerProduct => ScoreOrder::HigherIsBetter,
        }
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::L2 => squared_l2(a, b),
            Self::InnerProduct => dot(a, b),
        }
    }
}

/// On-disk layout of the vector artifact; row `i` belongs to `chunk_ids[i]`.
#[derive(Debug, Serialize, Deserialize)]
struct VectorFile {
    metric: Metric,
    vectors: Vec<Vec<f32>>,
}

pub struct FlatIndex {
    metric: Metric,
    dimension: usize,
    /// Row-major, `len * dimension` values.
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(metric: Metric, vectors: Vec<Vec<f32>>) -> Result<Self> {
        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if vectors.is_empty() || dimension == 0 {
            return Err(anyhow!("vector index needs at least one non-empty vector"));
        }

        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for (row, vector) in vectors.into_iter().enumerate() {
            if vector.len() != dimension {
                return Err(anyhow!(
                    "vector {} has dimension {}, expected {}",
                    row,
                    vector.len(),
                    dimension
                ));
            }
            data.extend(vector);
        }

        Ok(Self {
            metric,
            dimension,
            data,
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: VectorFile =
            serde_json::from_str(content).context("Failed to parse vector artifact")?;
        Self::new(file.metric, file.vectors)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vector artifact {}", path.display()))?;
        let index = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            vectors = index.len(),
            dimension = index.dimension,
            metric = ?index.metric,
            "Loaded flat vector index"
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }
}

impl VectorIndex for FlatIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(anyhow!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let order = self.metric.score_order();
        let mut scored: Vec<(usize, f32)> = self
            .data
            .par_chunks(self.dimension)
            .enumerate()
            .map(|(row, vector)| (row, self.metric.score(query, vector)))
            .collect();

        // Stable on row index for equal scores.
        scored.sort_by(|a, b| order.compare(a.1, b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(row, score)| SearchHit {
                position: row as i64,
                score,
            })
            .collect())
    }

    fn score_order(&self) -> ScoreOrder {
        self.metric.score_order()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
