//! In-process doubles for the external collaborators, shared by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::embeddings::EmbeddingModel;
use crate::index::{ScoreOrder, SearchHit, VectorIndex};
use crate::llm::{ChatMessage, ChatModel, GenerationConfig};
use crate::rag::query_expander::{CONTEXTUALIZATION_SYSTEM_PROMPT, PARAPHRASE_SYSTEM_PROMPT};
use crate::reranking::CrossEncoder;
use crate::store::{ChunkInfo, InMemoryChunkStore};
use crate::types::ChunkMetadata;

/// `n` chunks with ids `c0..`, texts `chunk 0..` and sources `page_0..`.
pub fn corpus(n: usize) -> Arc<InMemoryChunkStore> {
    let chunks = (0..n).map(|i| {
        (
            format!("c{}", i),
            ChunkInfo {
                text: format!("chunk {}", i),
                metadata: ChunkMetadata {
                    source: Some(format!("page_{}", i)),
                    report: Some("AR6".to_string()),
                    extra: HashMap::new(),
                },
            },
        )
    });
    Arc::new(InMemoryChunkStore::from_chunks(chunks).unwrap())
}

/// Embeds text to a one-dimensional vector chosen by the first matching
/// substring rule; unmatched text embeds to `[0.0]`.
#[derive(Default)]
pub struct KeyedEmbedder {
    rules: Vec<(String, f32)>,
    failing: Vec<String>,
}

impl KeyedEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, needle: &str, value: u8) -> Self {
        self.rules.push((needle.to_string(), value as f32));
        self
    }

    pub fn failing_on(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }
}

#[async_trait]
impl EmbeddingModel for KeyedEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing.iter().any(|f| text.contains(f.as_str())) {
            return Err(anyhow!("embedding endpoint unavailable"));
        }
        let value = self
            .rules
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, v)| *v)
            .unwrap_or(0.0);
        Ok(vec![value])
    }

    fn dimension(&self) -> usize {
        1
    }
}

/// Returns scripted hits keyed by the first query component.
#[derive(Default)]
pub struct ScriptedIndex {
    hits: HashMap<u8, Vec<SearchHit>>,
    requested_k: Mutex<Vec<usize>>,
}

impl ScriptedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(mut self, key: u8, hits: Vec<SearchHit>) -> Self {
        self.hits.insert(key, hits);
        self
    }

    pub fn requested_k(&self) -> Vec<usize> {
        self.requested_k.lock().clone()
    }
}

impl VectorIndex for ScriptedIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.requested_k.lock().push(k);
        let key = query.first().copied().unwrap_or(0.0) as u8;
        Ok(self
            .hits
            .get(&key)
            .map(|hits| hits.iter().take(k).copied().collect())
            .unwrap_or_default())
    }

    fn score_order(&self) -> ScoreOrder {
        ScoreOrder::LowerIsBetter
    }

    fn dimension(&self) -> usize {
        1
    }
}

pub struct ScriptedCrossEncoder {
    scores: Option<Vec<f32>>,
    calls: AtomicUsize,
    last_pairs: Mutex<Vec<(String, String)>>,
}

impl ScriptedCrossEncoder {
    pub fn scores(scores: Vec<f32>) -> Self {
        Self {
            scores: Some(scores),
            calls: AtomicUsize::new(0),
            last_pairs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            scores: None,
            calls: AtomicUsize::new(0),
            last_pairs: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_pairs(&self) -> Vec<(String, String)> {
        self.last_pairs.lock().clone()
    }
}

#[async_trait]
impl CrossEncoder for ScriptedCrossEncoder {
    async fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_pairs.lock() = pairs.to_vec();
        self.scores
            .clone()
            .ok_or_else(|| anyhow!("cross-encoder inference failed"))
    }
}

/// Kind of chat call, told apart by the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatCall {
    Contextualize,
    Paraphrase,
    Answer,
}

impl ChatCall {
    fn of(messages: &[ChatMessage]) -> Self {
        match messages.first().map(|m| m.content.as_str()) {
            Some(CONTEXTUALIZATION_SYSTEM_PROMPT) => Self::Contextualize,
            Some(PARAPHRASE_SYSTEM_PROMPT) => Self::Paraphrase,
            _ => Self::Answer,
        }
    }
}

/// Chat double answering each call kind with a fixed script and recording
/// every message list it receives.
pub struct ScriptedChat {
    paraphrases: String,
    answer: String,
    failing: Vec<ChatCall>,
    calls: Mutex<Vec<(ChatCall, Vec<ChatMessage>)>>,
}

impl ScriptedChat {
    pub const GLOSS: &'static str = "Background on thermal expansion and ice melt.";
    pub const ANSWER: &'static str = "Oceans warm and expand (1).";

    pub fn new() -> Self {
        Self {
            paraphrases: "1. first paraphrase\n2. second paraphrase\n3. third paraphrase"
                .to_string(),
            answer: Self::ANSWER.to_string(),
            failing: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, call: ChatCall) -> Self {
        self.failing.push(call);
        self
    }

    pub fn with_paraphrases(mut self, raw: &str) -> Self {
        self.paraphrases = raw.to_string();
        self
    }

    pub fn with_answer(mut self, answer: &str) -> Self {
        self.answer = answer.to_string();
        self
    }

    pub fn calls(&self, kind: ChatCall) -> usize {
        self.calls.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    /// Message lists sent for answer generation, oldest first.
    pub fn answer_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .iter()
            .filter(|(k, _)| *k == ChatCall::Answer)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _config: &GenerationConfig,
    ) -> Result<String> {
        let kind = ChatCall::of(messages);
        self.calls.lock().push((kind, messages.to_vec()));
        if self.failing.contains(&kind) {
            return Err(anyhow!("chat endpoint returned 503"));
        }
        Ok(match kind {
            ChatCall::Contextualize => Self::GLOSS.to_string(),
            ChatCall::Paraphrase => self.paraphrases.clone(),
            ChatCall::Answer => self.answer.clone(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
