//! Cross-encoder selection of the final candidate groups.

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::reranking::CrossEncoder;
use crate::types::{ChunkGroup, RankedGroup};

/// How the rerank stage ended for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankOutcome {
    /// Candidates were scored and truncated to `top_n`.
    Ranked,
    /// No usable scores; candidates passed through unchanged and untruncated.
    Degraded,
    /// No candidates, the scorer was not invoked.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct RerankSelection {
    pub groups: Vec<RankedGroup>,
    pub outcome: RerankOutcome,
}

impl RerankSelection {
    fn passthrough(candidates: Vec<ChunkGroup>, outcome: RerankOutcome) -> Self {
        Self {
            groups: candidates.into_iter().map(RankedGroup::unranked).collect(),
            outcome,
        }
    }
}

pub struct RerankSelector {
    encoder: Option<Arc<dyn CrossEncoder>>,
    top_n: usize,
}

impl RerankSelector {
    pub fn new(encoder: Option<Arc<dyn CrossEncoder>>, top_n: usize) -> Self {
        Self { encoder, top_n }
    }

    pub fn is_available(&self) -> bool {
        self.encoder.is_some()
    }

    /// Score every candidate against the original query in one batched call and
    /// keep the `top_n` best. Equal scores keep candidate order.
    pub async fn select(&self, query: &str, candidates: Vec<ChunkGroup>) -> RerankSelection {
        if candidates.is_empty() {
            return RerankSelection::passthrough(candidates, RerankOutcome::Skipped);
        }

        let Some(encoder) = &self.encoder else {
            tracing::warn!(
                candidates = candidates.len(),
                "Reranker not available, passing candidates through unranked"
            );
            return RerankSelection::passthrough(candidates, RerankOutcome::Degraded);
        };

        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|group| (query.to_string(), group.passage()))
            .collect();

        let scores = match encoder.score_pairs(&pairs).await {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(scores) => {
                tracing::warn!(
                    expected = candidates.len(),
                    received = scores.len(),
                    "Reranker returned a mismatched score count, passing candidates through unranked"
                );
                return RerankSelection::passthrough(candidates, RerankOutcome::Degraded);
            }
            Err(e) => {
                tracing::warn!("Reranking failed, passing candidates through unranked: {}", e);
                return RerankSelection::passthrough(candidates, RerankOutcome::Degraded);
            }
        };

        let mut ranked: Vec<RankedGroup> = candidates
            .into_iter()
            .zip(scores)
            .map(|(group, score)| RankedGroup {
                group,
                rerank_score: Some(score),
            })
            .collect();

        // Stable sort; NaN sinks to the bottom.
        ranked.sort_by(|a, b| descending(a.rerank_score, b.rerank_score));
        ranked.truncate(self.top_n);

        tracing::debug!(selected = ranked.len(), top_n = self.top_n, "Reranked candidates");
        RerankSelection {
            groups: ranked,
            outcome: RerankOutcome::Ranked,
        }
    }
}

/// Best-first comparator over optional scores. Missing and NaN scores sort
/// last and compare equal to each other, so the order stays total.
pub(crate) fn descending(a: Option<f32>, b: Option<f32>) -> Ordering {
    let key = |s: Option<f32>| s.filter(|v| !v.is_nan());
    match (key(a), key(b)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
