use anyhow::anyhow;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::RAGConfig;
use crate::embeddings::{EmbeddingModel, HttpEmbeddings};
use crate::error::{PipelineError, PipelineResult};
use crate::index::{FlatIndex, VectorIndex};
use crate::llm::{ChatModel, GenerationConfig, OpenAICompatibleChat};
use crate::rag::retriever::collect_variant_groups;
use crate::rag::{
    aggregate, assemble, MemorySplicer, QueryExpander, QueryExpansion, RerankOutcome,
    RerankSelector, WindowedRetriever,
};
use crate::reranking::{CrossEncoder, OnnxCrossEncoder};
use crate::retry::RetryPolicy;
use crate::store::{ChunkStore, InMemoryChunkStore};
use crate::types::{CitedChunk, ConversationTurn, StageTimings, TimedStage};

/// Lifecycle of one answer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Expanding,
    Retrieving,
    Reranking,
    Generating,
    Done,
    Failed,
}

/// Tracks and logs the state of a single request.
struct RequestState {
    request_id: Uuid,
    state: PipelineState,
}

impl RequestState {
    fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            state: PipelineState::Expanding,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        tracing::debug!(
            request_id = %self.request_id,
            from = ?self.state,
            to = ?next,
            "Pipeline state transition"
        );
        self.state = next;
    }

    fn fail(&mut self, error: PipelineError) -> PipelineError {
        tracing::warn!(
            request_id = %self.request_id,
            state = ?self.state,
            error = %error,
            "Answer request failed"
        );
        self.state = PipelineState::Failed;
        error
    }
}

/// Final output of one answer request.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub request_id: Uuid,
    pub answer: String,
    /// Chunks in reference-tag order; `chunks[i].reference == i + 1`.
    pub chunks: Vec<CitedChunk>,
    pub timings: StageTimings,
    pub rerank: RerankOutcome,
    /// Retrieval strings used, original question first.
    pub variants: Vec<String>,
}

/// Question answering over a pre-chunked report corpus: expansion, windowed
/// retrieval, aggregation, reranking, citation assembly, memory splicing and
/// generation.
///
/// Shared read-only across requests. Conversation history is supplied per call
/// and never retained.
pub struct AnswerPipeline {
    config: RAGConfig,
    store: Arc<dyn ChunkStore>,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatModel>,
    expander: QueryExpander,
    retriever: WindowedRetriever,
    selector: RerankSelector,
    splicer: MemorySplicer,
    generation: GenerationConfig,
    retry: RetryPolicy,
}

impl AnswerPipeline {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        index: Arc<dyn VectorIndex>,
        embeddings: Arc<dyn EmbeddingModel>,
        chat: Arc<dyn ChatModel>,
        reranker: Option<Arc<dyn CrossEncoder>>,
        config: RAGConfig,
    ) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::Config)?;
        if embeddings.dimension() != index.dimension() {
            return Err(PipelineError::Config(format!(
                "embedding dimension {} does not match index dimension {}",
                embeddings.dimension(),
                index.dimension()
            )));
        }

        let retry = RetryPolicy::from(&config.retry);
        let expander = QueryExpander::new(
            chat.clone(),
            config.expansion.paraphrase_count,
            config.expansion.max_tokens,
            retry,
        );
        let retriever = WindowedRetriever::new(embeddings, index.clone(), store.clone(), retry);
        let selector = RerankSelector::new(reranker, config.retrieval.top_n);
        let splicer = MemorySplicer::new(
            config.memory.max_turns,
            config.generation.system_prompt.clone(),
        );
        let generation = GenerationConfig::from(&config.generation);

        tracing::info!(
            chunks = store.len(),
            chat_model = chat.name(),
            reranker = selector.is_available(),
            "Answer pipeline ready"
        );

        Ok(Self {
            config,
            store,
            index,
            chat,
            expander,
            retriever,
            selector,
            splicer,
            generation,
            retry,
        })
    }

    /// Load the corpus artifacts and connect to the configured endpoints.
    /// A reranker that fails to load is logged and left out.
    pub async fn from_config(config: RAGConfig) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::Config)?;

        let store = InMemoryChunkStore::from_file(&config.artifacts.metadata_path)
            .map_err(PipelineError::Artifact)?;
        let index =
            FlatIndex::from_file(&config.artifacts.vectors_path).map_err(PipelineError::Artifact)?;
        if index.len() != store.len() {
            return Err(PipelineError::Artifact(anyhow!(
                "vector index has {} rows but the chunk store has {} chunks",
                index.len(),
                store.len()
            )));
        }

        let endpoints = &config.endpoints;
        let timeout = Duration::from_secs(endpoints.request_timeout_secs);
        let api_key = config.api_key();

        let embeddings = HttpEmbeddings::new(
            &endpoints.base_url,
            endpoints.embedding_model.clone(),
            api_key.clone(),
            endpoints.embedding_dimension,
            timeout,
        )
        .map_err(PipelineError::Artifact)?;
        let chat = OpenAICompatibleChat::new(
            &endpoints.base_url,
            endpoints.chat_model.clone(),
            api_key,
            timeout,
        )
        .map_err(PipelineError::Artifact)?;

        let reranker: Option<Arc<dyn CrossEncoder>> = match &endpoints.reranker_model_dir {
            Some(dir) => match OnnxCrossEncoder::new(dir) {
                Ok(encoder) => Some(Arc::new(encoder)),
                Err(e) => {
                    tracing::warn!("Reranker not available ({}), continuing without reranking", e);
                    None
                }
            },
            None => {
                tracing::info!("No reranker configured, candidates will pass through unranked");
                None
            }
        };

        Self::new(
            Arc::new(store),
            Arc::new(index),
            Arc::new(embeddings),
            Arc::new(chat),
            reranker,
            config,
        )
    }

    pub fn config(&self) -> &RAGConfig {
        &self.config
    }

    /// Answer `question`, using `history` as the conversation so far.
    pub async fn answer(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> PipelineResult<RagAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }

        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("answer", request_id = %request_id);
        self.run(request_id, question, history)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        request_id: Uuid,
        question: &str,
        history: &[ConversationTurn],
    ) -> PipelineResult<RagAnswer> {
        let mut state = RequestState::new(request_id);
        let mut timings = StageTimings::new();
        tracing::info!(history_turns = history.len(), "Answering question");

        let started = Instant::now();
        let gloss = self
            .expander
            .contextualize(question)
            .await
            .map_err(|e| state.fail(e))?;
        timings.record(TimedStage::Contextualization, started.elapsed());

        let started = Instant::now();
        let paraphrases = self
            .expander
            .paraphrase(question)
            .await
            .map_err(|e| state.fail(e))?;
        timings.record(TimedStage::ParaphraseGeneration, started.elapsed());

        let expansion = QueryExpansion {
            original: question.to_string(),
            gloss,
            paraphrases,
        };
        let variants = expansion.variants();

        state.advance(PipelineState::Retrieving);
        let started = Instant::now();
        let retrieval = &self.config.retrieval;
        let retrievals = self
            .retriever
            .retrieve_variants(&variants, retrieval.k, retrieval.window)
            .await;
        let per_variant = collect_variant_groups(retrievals, retrieval.abort_on_variant_failure)
            .map_err(|e| state.fail(e))?;
        let candidates = aggregate(per_variant, self.index.score_order());

        state.advance(PipelineState::Reranking);
        let selection = self.selector.select(question, candidates).await;
        timings.record(TimedStage::RetrievalAndRerank, started.elapsed());

        let citations = assemble(&selection.groups);
        if citations.is_empty() {
            tracing::info!("No passages retrieved, generating without context");
        }

        state.advance(PipelineState::Generating);
        let messages = self
            .splicer
            .build_messages(history, &citations.context, question);
        let started = Instant::now();
        let raw = self
            .retry
            .run("answer generation", || {
                self.chat.complete(&messages, &self.generation)
            })
            .await
            .map_err(|e| state.fail(PipelineError::Generation(e)))?;
        let answer = raw.trim().to_string();
        if answer.is_empty() {
            return Err(state.fail(PipelineError::Generation(anyhow!(
                "model returned an empty answer"
            ))));
        }
        timings.record(TimedStage::Generation, started.elapsed());

        state.advance(PipelineState::Done);
        tracing::info!(
            variants = variants.len(),
            groups = selection.groups.len(),
            chunks = citations.chunks.len(),
            rerank = ?selection.outcome,
            total_ms = timings.total().as_millis() as u64,
            "Answer generated"
        );

        Ok(RagAnswer {
            request_id,
            answer,
            chunks: citations.chunks,
            timings,
            rerank: selection.outcome,
            variants,
        })
    }
}
