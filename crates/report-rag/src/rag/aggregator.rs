//! Cross-variant aggregation of retrieved groups.
//!
//! Groups are flattened in variant order, then rank order within a variant.
//! Two groups are duplicates only when their ordered member identifiers are
//! identical; overlapping but shifted windows are kept apart.

use std::collections::HashMap;

use crate::index::ScoreOrder;
use crate::types::{ChunkGroup, ChunkId};

/// Flatten per-variant groups and drop exact duplicates, keeping the first
/// occurrence in place. A kept group takes the best anchor score seen across
/// its duplicates.
pub fn aggregate(groups_per_variant: Vec<Vec<ChunkGroup>>, order: ScoreOrder) -> Vec<ChunkGroup> {
    let mut seen: HashMap<Vec<ChunkId>, usize> = HashMap::new();
    let mut unique: Vec<ChunkGroup> = Vec::new();
    let mut dropped = 0usize;

    for group in groups_per_variant.into_iter().flatten() {
        let identity = group.identity();
        match seen.get(&identity) {
            Some(&idx) => {
                dropped += 1;
                let kept = &mut unique[idx];
                if order.is_better(group.anchor_score, kept.anchor_score) {
                    kept.anchor_score = group.anchor_score;
                }
            }
            None => {
                seen.insert(identity, unique.len());
                unique.push(group);
            }
        }
    }

    tracing::debug!(unique = unique.len(), dropped, "Aggregated candidate groups");
    unique
}
