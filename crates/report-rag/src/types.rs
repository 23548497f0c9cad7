use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;

/// Opaque, stable chunk identifier as it appears in the chunk store.
pub type ChunkId = String;

/// Metadata attached to a chunk at ingestion time.
///
/// `source` follows the `page_<n>` convention of the report corpus; anything
/// the ingestion side added beyond the two well-known keys lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, alias = "report_name", skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ChunkMetadata {
    /// Page number parsed from a `page_<n>` source value.
    pub fn page_number(&self) -> Option<u32> {
        self.source
            .as_deref()
            .and_then(|s| s.trim().strip_prefix("page_"))
            .and_then(|n| n.parse().ok())
    }
}

/// A single chunk of report text, read from the chunk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    /// Position of the chunk in the store's identifier sequence.
    pub position: usize,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// One anchor match expanded to its neighbor window.
///
/// Never empty: the anchor chunk is always a member. `anchor_score` is the best
/// index score among all anchors that produced this exact membership.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkGroup {
    pub anchor: usize,
    pub chunks: Vec<Chunk>,
    pub anchor_score: f32,
}

impl ChunkGroup {
    /// Ordered identifier tuple used for deduplication.
    pub fn identity(&self) -> Vec<ChunkId> {
        self.chunks.iter().map(|c| c.id.clone()).collect()
    }

    pub fn positions(&self) -> Vec<usize> {
        self.chunks.iter().map(|c| c.position).collect()
    }

    /// Member texts joined into the single passage handed to the cross-encoder.
    pub fn passage(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// A candidate group after the rerank stage. `rerank_score` is `None` when the
/// cross-encoder was unavailable and the candidate passed through unranked.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedGroup {
    pub group: ChunkGroup,
    pub rerank_score: Option<f32>,
}

impl RankedGroup {
    pub fn unranked(group: ChunkGroup) -> Self {
        Self {
            group,
            rerank_score: None,
        }
    }
}

/// A chunk as it appears in the final answer context, bound to its `(i)` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedChunk {
    /// 1-based reference number, unique within one answer.
    pub reference: usize,
    pub chunk: Chunk,
    pub anchor_score: f32,
    pub rerank_score: Option<f32>,
}

impl CitedChunk {
    pub fn tag(&self) -> String {
        format!("({})", self.reference)
    }

    /// Render a link to the original page from a template containing `{report}`
    /// and/or `{page}`. Returns `None` when the template needs a value the chunk
    /// metadata does not carry.
    pub fn source_link(&self, template: &str) -> Option<String> {
        let mut link = template.to_string();
        if link.contains("{page}") {
            let page = self.chunk.metadata.page_number()?;
            link = link.replace("{page}", &page.to_string());
        }
        if link.contains("{report}") {
            let report = self.chunk.metadata.report.as_deref()?;
            link = link.replace("{report}", report);
        }
        Some(link)
    }
}

/// A prior exchange supplied by the caller. The pipeline never stores these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

impl ConversationTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// Stages whose wall-clock time is reported with every answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimedStage {
    Contextualization,
    ParaphraseGeneration,
    RetrievalAndRerank,
    Generation,
}

impl TimedStage {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Contextualization => "contextualization",
            Self::ParaphraseGeneration => "paraphrase_generation",
            Self::RetrievalAndRerank => "retrieval_and_rerank",
            Self::Generation => "generation",
        }
    }
}

/// Per-request stage timings, in the order the stages completed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageTimings {
    entries: Vec<(TimedStage, Duration)>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage duration. A stage recorded twice keeps the latest value.
    pub fn record(&mut self, stage: TimedStage, elapsed: Duration) {
        match self.entries.iter_mut().find(|(s, _)| *s == stage) {
            Some(entry) => entry.1 = elapsed,
            None => self.entries.push((stage, elapsed)),
        }
    }

    pub fn get(&self, stage: TimedStage) -> Option<Duration> {
        self.entries
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, d)| *d)
    }

    pub fn total(&self) -> Duration {
        self.entries.iter().map(|(_, d)| *d).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimedStage, Duration)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for StageTimings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (stage, elapsed) in &self.entries {
            map.serialize_entry(stage.key(), &(elapsed.as_micros() as f64 / 1000.0))?;
        }
        map.end()
    }
}
