use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RAGConfig {
    pub data_dir: PathBuf,
    pub artifacts: ArtifactConfig,
    pub retrieval: RetrievalConfig,
    pub expansion: ExpansionConfig,
    pub memory: MemoryConfig,
    pub generation: GenerationSettings,
    pub retry: RetryConfig,
    pub endpoints: EndpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Serialized `{chunk_ids, chunk_id_to_info}` mapping.
    pub metadata_path: PathBuf,
    /// Serialized row vectors, one per entry of `chunk_ids`.
    pub vectors_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Anchors requested from the vector index per query variant.
    pub k: usize,
    /// Neighbor window radius around each anchor.
    pub window: usize,
    /// Groups kept after cross-encoder reranking.
    pub top_n: usize,
    /// Abort the request when any single variant fails instead of skipping it.
    pub abort_on_variant_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    pub paraphrase_count: usize,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Most recent conversation turns spliced into the prompt.
    pub max_turns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub max_tokens: usize,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of an OpenAI-compatible serving endpoint (`.../v1`).
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    /// Directory with `model.onnx` + `tokenizer.json` of the cross-encoder.
    pub reranker_model_dir: Option<PathBuf>,
}

impl RAGConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.retrieval.k == 0 {
            return Err("retrieval.k must be > 0".into());
        }
        if self.retrieval.top_n == 0 {
            return Err("retrieval.top_n must be > 0".into());
        }
        if self.expansion.paraphrase_count == 0 {
            return Err("expansion.paraphrase_count must be > 0".into());
        }
        if self.expansion.max_tokens == 0 || self.generation.max_tokens == 0 {
            return Err("max_tokens must be > 0".into());
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err("generation.temperature must be in [0.0, 2.0]".into());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".into());
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err("retry.initial_backoff_ms must be <= retry.max_backoff_ms".into());
        }
        if self.endpoints.embedding_dimension == 0 {
            return Err("endpoints.embedding_dimension must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Read the API key named by `endpoints.api_key_env`.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.endpoints.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for RAGConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("report-rag");

        let reranker_dir = data_dir.join("models").join("ms-marco-MiniLM-L6-v2");
        let reranker_model_dir = reranker_dir.exists().then_some(reranker_dir);

        Self {
            artifacts: ArtifactConfig {
                metadata_path: data_dir.join("chunk_metadata.json"),
                vectors_path: data_dir.join("chunk_vectors.json"),
            },
            data_dir,
            retrieval: RetrievalConfig::default(),
            expansion: ExpansionConfig::default(),
            memory: MemoryConfig::default(),
            generation: GenerationSettings::default(),
            retry: RetryConfig::default(),
            endpoints: EndpointConfig {
                reranker_model_dir,
                ..EndpointConfig::default()
            },
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("chunk_metadata.json"),
            vectors_path: PathBuf::from("chunk_vectors.json"),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 5,
            window: 1,
            top_n: 5,
            abort_on_variant_failure: false,
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            paraphrase_count: 2,
            max_tokens: 256,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_turns: 2 }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.1,
            system_prompt: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2000,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            chat_model: "llama3.1".to_string(),
            embedding_model: "gte-large".to_string(),
            embedding_dimension: 1024,
            api_key_env: "RAG_API_KEY".to_string(),
            request_timeout_secs: 120,
            reranker_model_dir: None,
        }
    }
}
