//! Reference tagging: every chunk of the selected groups gets a sequential
//! `(i)` tag, and the same tags prefix the chunk texts in the prompt context.

use std::fmt::Write;

use crate::rag::rerank_selector::descending;
use crate::types::{CitedChunk, RankedGroup};

/// Tagged chunks and the context blob built from them. Tag `i` in `context`
/// always refers to `chunks[i - 1]`.
#[derive(Debug, Clone, Default)]
pub struct CitationContext {
    pub chunks: Vec<CitedChunk>,
    pub context: String,
}

impl CitationContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Number chunks 1..n in group order, then member order, and render the context.
/// A chunk that occurs in two selected groups is tagged once per occurrence.
pub fn assemble(groups: &[RankedGroup]) -> CitationContext {
    let mut chunks = Vec::new();
    let mut context = String::new();

    for ranked in groups {
        for chunk in &ranked.group.chunks {
            let reference = chunks.len() + 1;
            let _ = write!(context, "({}) {}\n\n", reference, chunk.text);
            chunks.push(CitedChunk {
                reference,
                chunk: chunk.clone(),
                anchor_score: ranked.group.anchor_score,
                rerank_score: ranked.rerank_score,
            });
        }
    }

    CitationContext { chunks, context }
}

/// Accumulate sources across answers in a session, one entry per chunk id.
/// Entries carrying a rerank score come first in descending score order; the
/// rest keep insertion order, as do entries whose score is NaN. A repeated
/// chunk keeps its better score.
pub fn merge_sources(existing: &mut Vec<CitedChunk>, new: &[CitedChunk]) {
    for cited in new {
        match existing.iter_mut().find(|e| e.chunk.id == cited.chunk.id) {
            Some(entry) => {
                if cited.rerank_score > entry.rerank_score {
                    entry.rerank_score = cited.rerank_score;
                }
            }
            None => existing.push(cited.clone()),
        }
    }

    existing.sort_by(|a, b| descending(a.rerank_score, b.rerank_score));
}
