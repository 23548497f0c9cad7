//! Query expansion: a short background gloss plus paraphrases of the user's
//! question, each produced by exactly one chat-completion call.
//!
//! There is no local fallback. A failed or malformed model response surfaces
//! as `PipelineError::Expansion`.

use anyhow::anyhow;
use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::error::{ExpansionStep, PipelineError, PipelineResult};
use crate::llm::{ChatMessage, ChatModel, GenerationConfig};
use crate::retry::RetryPolicy;

pub const CONTEXTUALIZATION_SYSTEM_PROMPT: &str =
    "You write brief domain background that helps a search engine find relevant passages \
     in official assessment reports. You never answer the question itself.";

pub const PARAPHRASE_SYSTEM_PROMPT: &str =
    "You rephrase search questions. You keep the meaning and the technical terms, \
     and you output only the rephrased questions.";

// Leading list markers the model tends to add despite instructions: "1.", "2)", "-", "*", "•".
// A marker only counts when whitespace follows it, so "1.5°C" or "2050:" stay intact.
static LIST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•]+|\(?\d+[.)]|\d+\s+-)\s+").expect("list marker regex is valid")
});

/// Gloss and paraphrases for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExpansion {
    pub original: String,
    pub gloss: String,
    pub paraphrases: Vec<String>,
}

impl QueryExpansion {
    /// One retrieval string per form of the question, original first, each
    /// followed by the background gloss.
    pub fn variants(&self) -> Vec<String> {
        std::iter::once(&self.original)
            .chain(self.paraphrases.iter())
            .map(|q| format!("{} {}", q, self.gloss))
            .collect()
    }
}

pub struct QueryExpander {
    chat: Arc<dyn ChatModel>,
    paraphrase_count: usize,
    generation: GenerationConfig,
    retry: RetryPolicy,
}

impl QueryExpander {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        paraphrase_count: usize,
        max_tokens: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            chat,
            paraphrase_count,
            generation: GenerationConfig {
                max_tokens,
                temperature: 0.3,
            },
            retry,
        }
    }

    pub fn paraphrase_count(&self) -> usize {
        self.paraphrase_count
    }

    /// 2–3 sentences of background for the question.
    pub async fn contextualize(&self, question: &str) -> PipelineResult<String> {
        let messages = [
            ChatMessage::system(CONTEXTUALIZATION_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Write 2-3 sentences of background knowledge about the topic of the question \
                 below: key concepts, mechanisms and terminology a report would use. \
                 Do not answer the question.\n\nQuestion: {}\n\nBackground:",
                question
            )),
        ];

        let raw = self
            .retry
            .run("contextualization", || self.chat.complete(&messages, &self.generation))
            .await
            .map_err(|source| PipelineError::Expansion {
                step: ExpansionStep::Contextualization,
                source,
            })?;

        let gloss = raw.trim().to_string();
        if gloss.is_empty() {
            return Err(PipelineError::Expansion {
                step: ExpansionStep::Contextualization,
                source: anyhow!("model returned an empty background"),
            });
        }

        tracing::debug!(gloss_chars = gloss.len(), "Background gloss generated");
        Ok(gloss)
    }

    /// Exactly `paraphrase_count` paraphrases of the question.
    pub async fn paraphrase(&self, question: &str) -> PipelineResult<Vec<String>> {
        let n = self.paraphrase_count;
        let messages = [
            ChatMessage::system(PARAPHRASE_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Rewrite the question below in {n} different ways that keep its meaning. \
                 Return exactly {n} lines, one rephrased question per line, \
                 without numbering or commentary.\n\nQuestion: {question}"
            )),
        ];

        let raw = self
            .retry
            .run("paraphrase generation", || self.chat.complete(&messages, &self.generation))
            .await
            .map_err(|source| PipelineError::Expansion {
                step: ExpansionStep::Paraphrasing,
                source,
            })?;

        let paraphrases = parse_paraphrases(&raw, n).map_err(|source| PipelineError::Expansion {
            step: ExpansionStep::Paraphrasing,
            source,
        })?;

        tracing::debug!(paraphrases = ?paraphrases, "Paraphrases generated");
        Ok(paraphrases)
    }
}

/// Extract `expected` paraphrases from a line-oriented model response.
/// Extra lines are ignored; fewer than `expected` is a malformed response.
pub fn parse_paraphrases(raw: &str, expected: usize) -> anyhow::Result<Vec<String>> {
    let paraphrases: Vec<String> = raw
        .lines()
        .map(|line| LIST_MARKER_RE.replace(line, ""))
        .map(|line| {
            line.trim()
                .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(expected)
        .collect();

    if paraphrases.len() < expected {
        return Err(anyhow!(
            "expected {} paraphrases, model returned {}: {:?}",
            expected,
            paraphrases.len(),
            raw.chars().take(200).collect::<String>()
        ));
    }
    Ok(paraphrases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChatCall, ScriptedChat};

    #[test]
    fn test_parse_paraphrases_strips_markers_and_quotes() {
        let raw = "1. How do oceans rise?\n\n2) \"What causes sea levels to increase?\"\n- extra line";
        assert_eq!(
            parse_paraphrases(raw, 2).unwrap(),
            vec![
                "How do oceans rise?".to_string(),
                "What causes sea levels to increase?".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_paraphrases_keeps_leading_numbers() {
        let raw = "1.5°C warming impacts on crop yields?\n\
                   2050: what emission pathways apply?\n\
                   -2% GDP under which scenario?\n\
                   3. Which sectors lose most?";
        assert_eq!(
            parse_paraphrases(raw, 4).unwrap(),
            vec![
                "1.5°C warming impacts on crop yields?".to_string(),
                "2050: what emission pathways apply?".to_string(),
                "-2% GDP under which scenario?".to_string(),
                "Which sectors lose most?".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_paraphrases_rejects_short_response() {
        assert!(parse_paraphrases("only one line", 2).is_err());
        assert!(parse_paraphrases("  \n \n", 1).is_err());
    }

    #[test]
    fn test_variants_put_original_first_and_append_gloss() {
        let expansion = QueryExpansion {
            original: "Q".into(),
            gloss: "G.".into(),
            paraphrases: vec!["P1".into(), "P2".into()],
        };
        assert_eq!(expansion.variants(), vec!["Q G.", "P1 G.", "P2 G."]);
    }

    #[tokio::test]
    async fn test_each_expansion_step_is_one_model_call() {
        let chat = Arc::new(ScriptedChat::new());
        let expander = QueryExpander::new(chat.clone(), 2, 128, RetryPolicy::none());

        let gloss = expander.contextualize("Why do sea levels rise?").await.unwrap();
        assert_eq!(gloss, ScriptedChat::GLOSS);
        assert_eq!(chat.calls(ChatCall::Contextualize), 1);

        let paraphrases = expander.paraphrase("Why do sea levels rise?").await.unwrap();
        assert_eq!(paraphrases.len(), 2);
        assert_eq!(chat.calls(ChatCall::Paraphrase), 1);
    }

    #[tokio::test]
    async fn test_model_failure_is_an_expansion_error() {
        let chat = Arc::new(ScriptedChat::new().failing(ChatCall::Paraphrase));
        let expander = QueryExpander::new(chat.clone(), 2, 128, RetryPolicy::none());

        let err = expander.paraphrase("Why?").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Expansion {
                step: ExpansionStep::Paraphrasing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_paraphrase_response_is_an_expansion_error() {
        let chat = Arc::new(ScriptedChat::new().with_paraphrases("just one"));
        let expander = QueryExpander::new(chat, 2, 128, RetryPolicy::none());
        assert!(matches!(
            expander.paraphrase("Why?").await,
            Err(PipelineError::Expansion { .. })
        ));
    }
}
