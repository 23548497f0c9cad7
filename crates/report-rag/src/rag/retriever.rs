//! Windowed retrieval: anchor search per query variant, each anchor expanded
//! to the contiguous neighborhood `[anchor - w, anchor + w]` clamped to the corpus.

use anyhow::{anyhow, Result};
use futures::future::join_all;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::embeddings::EmbeddingModel;
use crate::error::{PipelineError, PipelineResult};
use crate::index::{SearchHit, VectorIndex};
use crate::retry::RetryPolicy;
use crate::store::ChunkStore;
use crate::types::ChunkGroup;

/// Member positions of the window around `anchor`, or `None` when the anchor
/// is outside the corpus. The window shrinks at the boundaries.
pub fn window_bounds(
    anchor: usize,
    radius: usize,
    corpus_len: usize,
) -> Option<RangeInclusive<usize>> {
    if anchor >= corpus_len {
        return None;
    }
    let start = anchor.saturating_sub(radius);
    let end = anchor.saturating_add(radius).min(corpus_len - 1);
    Some(start..=end)
}

/// Expand one index hit into a chunk group. Hits outside the corpus yield `None`.
pub fn expand_hit(
    store: &dyn ChunkStore,
    hit: SearchHit,
    radius: usize,
) -> Result<Option<ChunkGroup>> {
    let Ok(anchor) = usize::try_from(hit.position) else {
        return Ok(None);
    };
    let Some(bounds) = window_bounds(anchor, radius, store.len()) else {
        return Ok(None);
    };

    let chunks = bounds
        .map(|position| {
            store
                .chunk_at(position)
                .ok_or_else(|| anyhow!("chunk store has no entry for position {}", position))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(ChunkGroup {
        anchor,
        chunks,
        anchor_score: hit.score,
    }))
}

/// Groups retrieved for one query variant, or why that variant failed.
#[derive(Debug)]
pub struct VariantRetrieval {
    pub variant: usize,
    pub outcome: Result<Vec<ChunkGroup>>,
}

pub struct WindowedRetriever {
    embeddings: Arc<dyn EmbeddingModel>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn ChunkStore>,
    retry: RetryPolicy,
}

impl WindowedRetriever {
    pub fn new(
        embeddings: Arc<dyn EmbeddingModel>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn ChunkStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embeddings,
            index,
            store,
            retry,
        }
    }

    /// Embed one variant, search `k` anchors and expand each into a group,
    /// keeping the index's best-first order.
    pub async fn retrieve(
        &self,
        variant: &str,
        k: usize,
        radius: usize,
    ) -> Result<Vec<ChunkGroup>> {
        let query_vector = self
            .retry
            .run("query embedding", || self.embeddings.embed_query(variant))
            .await?;

        let hits = self
            .retry
            .run("vector search", || async {
                self.index.search(&query_vector, k)
            })
            .await?;

        let mut groups = Vec::with_capacity(hits.len());
        for hit in hits {
            match expand_hit(self.store.as_ref(), hit, radius)? {
                Some(group) => groups.push(group),
                None => tracing::debug!(position = hit.position, "Skipping anchor outside corpus"),
            }
        }
        Ok(groups)
    }

    /// Retrieve all variants concurrently. Results come back in variant order
    /// regardless of completion order.
    pub async fn retrieve_variants(
        &self,
        variants: &[String],
        k: usize,
        radius: usize,
    ) -> Vec<VariantRetrieval> {
        let tasks = variants.iter().enumerate().map(|(i, variant)| async move {
            let outcome = self.retrieve(variant, k, radius).await;
            match &outcome {
                Ok(groups) => tracing::debug!(
                    variant = i,
                    groups = groups.len(),
                    "Variant retrieval complete"
                ),
                Err(e) => tracing::warn!(variant = i, error = %e, "Variant retrieval failed"),
            }
            VariantRetrieval { variant: i, outcome }
        });
        join_all(tasks).await
    }
}

/// Apply the variant-failure policy: skip failed variants unless `abort_on_failure`
/// is set; fail when every variant failed.
pub fn collect_variant_groups(
    retrievals: Vec<VariantRetrieval>,
    abort_on_failure: bool,
) -> PipelineResult<Vec<Vec<ChunkGroup>>> {
    let total = retrievals.len();
    let mut succeeded = Vec::with_capacity(total);
    let mut last_failure = None;

    for retrieval in retrievals {
        match retrieval.outcome {
            Ok(groups) => succeeded.push(groups),
            Err(source) if abort_on_failure => {
                return Err(PipelineError::Retrieval {
                    variant: retrieval.variant,
                    source,
                })
            }
            Err(source) => last_failure = Some((retrieval.variant, source)),
        }
    }

    match last_failure {
        Some((variant, source)) if succeeded.is_empty() => {
            Err(PipelineError::Retrieval { variant, source })
        }
        Some((variant, _)) => {
            tracing::warn!(
                failed_variant = variant,
                succeeded = succeeded.len(),
                total,
                "Continuing with remaining query variants"
            );
            Ok(succeeded)
        }
        None => Ok(succeeded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{corpus, KeyedEmbedder, ScriptedIndex};

    fn hit(position: i64, score: f32) -> SearchHit {
        SearchHit { position, score }
    }

    #[test]
    fn test_window_bounds_clamp_at_corpus_edges() {
        assert_eq!(window_bounds(0, 1, 10), Some(0..=1));
        assert_eq!(window_bounds(9, 1, 10), Some(8..=9));
        assert_eq!(window_bounds(5, 1, 10), Some(4..=6));
        assert_eq!(window_bounds(5, 0, 10), Some(5..=5));
        assert_eq!(window_bounds(2, 50, 10), Some(0..=9));
        assert_eq!(window_bounds(10, 1, 10), None);
        assert_eq!(window_bounds(0, 1, 0), None);
    }

    #[test]
    fn test_window_bounds_exhaustive_small_corpora() {
        for n in 1..8usize {
            for p in 0..n {
                for w in 0..5usize {
                    let range = window_bounds(p, w, n).unwrap();
                    let positions: Vec<usize> = range.collect();
                    let expected: Vec<usize> =
                        (p.saturating_sub(w)..=(p + w).min(n - 1)).collect();
                    assert_eq!(positions, expected);
                    assert!(positions.contains(&p));
                    assert!(positions.iter().all(|&x| x < n));
                }
            }
        }
    }

    #[test]
    fn test_expand_hit_skips_out_of_range_anchors() {
        let store = corpus(10);
        let group = expand_hit(store.as_ref(), hit(0, 0.2), 1).unwrap().unwrap();
        assert_eq!(group.positions(), vec![0, 1]);
        assert_eq!(group.anchor_score, 0.2);

        let group = expand_hit(store.as_ref(), hit(9, 0.2), 1).unwrap().unwrap();
        assert_eq!(group.positions(), vec![8, 9]);

        assert!(expand_hit(store.as_ref(), hit(10, 0.2), 1).unwrap().is_none());
        assert!(expand_hit(store.as_ref(), hit(-1, 0.2), 1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retrieve_expands_anchors_in_index_order() {
        let store = corpus(10);
        let embedder = Arc::new(KeyedEmbedder::new().key("ocean", 1));
        let index = Arc::new(
            ScriptedIndex::new().hits(1, vec![hit(5, 0.1), hit(12, 0.2), hit(0, 0.3)]),
        );
        let retriever = WindowedRetriever::new(embedder, index.clone(), store, RetryPolicy::none());

        let groups = retriever.retrieve("ocean warming", 3, 1).await.unwrap();
        let positions: Vec<Vec<usize>> = groups.iter().map(|g| g.positions()).collect();
        assert_eq!(positions, vec![vec![4, 5, 6], vec![0, 1]]);
        assert_eq!(index.requested_k(), vec![3]);
    }

    #[tokio::test]
    async fn test_retrieve_variants_preserves_variant_order() {
        let store = corpus(10);
        let embedder = Arc::new(
            KeyedEmbedder::new()
                .key("first", 1)
                .key("second", 2)
                .failing_on("broken"),
        );
        let index = Arc::new(
            ScriptedIndex::new()
                .hits(1, vec![hit(2, 0.1)])
                .hits(2, vec![hit(7, 0.1)]),
        );
        let retriever = WindowedRetriever::new(embedder, index, store, RetryPolicy::none());

        let variants = vec!["first".to_string(), "broken".to_string(), "second".to_string()];
        let results = retriever.retrieve_variants(&variants, 1, 0).await;

        assert_eq!(results.iter().map(|r| r.variant).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(results[1].outcome.is_err());

        let groups = collect_variant_groups(results, false).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0][0].positions(), vec![2]);
        assert_eq!(groups[1][0].positions(), vec![7]);
    }

    #[test]
    fn test_variant_failure_policy() {
        let failed = |variant| VariantRetrieval {
            variant,
            outcome: Err(anyhow!("embedding endpoint down")),
        };
        let ok = |variant| VariantRetrieval {
            variant,
            outcome: Ok(Vec::new()),
        };

        let err = collect_variant_groups(vec![ok(0), failed(1)], true).unwrap_err();
        assert!(matches!(err, PipelineError::Retrieval { variant: 1, .. }));

        let err = collect_variant_groups(vec![failed(0), failed(1)], false).unwrap_err();
        assert!(matches!(err, PipelineError::Retrieval { .. }));

        assert_eq!(collect_variant_groups(vec![ok(0), failed(1)], false).unwrap().len(), 1);
    }
}
