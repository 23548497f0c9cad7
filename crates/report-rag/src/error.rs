use thiserror::Error;

/// Which of the two expansion calls failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionStep {
    Contextualization,
    Paraphrasing,
}

impl std::fmt::Display for ExpansionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contextualization => write!(f, "contextualization"),
            Self::Paraphrasing => write!(f, "paraphrase generation"),
        }
    }
}

/// Fatal failures of an answer request. Degraded reranking and empty
/// retrieval are not errors and never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("query expansion failed during {step}: {source}")]
    Expansion {
        step: ExpansionStep,
        #[source]
        source: anyhow::Error,
    },

    #[error("retrieval failed for query variant {variant}: {source}")]
    Retrieval {
        variant: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("answer generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to load artifacts: {0}")]
    Artifact(#[source] anyhow::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
