use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::{Encoding, Tokenizer};

use super::CrossEncoder;

const MAX_BATCH: usize = 16;
const MAX_SEQUENCE_LENGTH: usize = 512;

/// Model file names tried in order; the O4-optimized export wins when present.
const MODEL_FILES: [&str; 2] = ["model_O4.onnx", "model.onnx"];

/// Cross-encoder reranker (ms-marco-MiniLM style) running on ONNX Runtime.
#[derive(Clone)]
pub struct OnnxCrossEncoder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
}

impl OnnxCrossEncoder {
    pub fn new(model_dir: &Path) -> Result<Self> {
        let model_path = locate_model(model_dir)?;
        let tokenizer_path = model_dir.join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(anyhow!("Tokenizer not found at: {}", tokenizer_path.display()));
        }

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {:?}", e))?;
        let model_bytes = std::fs::read(&model_path)
            .with_context(|| format!("Failed to read {}", model_path.display()))?;
        let session = Session::builder()
            .map_err(|e| anyhow!("Session builder: {:?}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Opt level: {:?}", e))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| anyhow!("Failed to load reranker model: {:?}", e))?;

        tracing::info!(model = %model_path.display(), "Cross-encoder loaded");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
        })
    }

    /// Score pairs synchronously, `MAX_BATCH` pairs per inference run.
    /// A failure anywhere fails the whole call, so scores stay aligned with pairs.
    pub fn score_blocking(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(pairs.len());
        for batch in pairs.chunks(MAX_BATCH) {
            let encodings = batch
                .iter()
                .map(|(query, passage)| {
                    self.tokenizer
                        .encode((query.as_str(), passage.as_str()), true)
                        .map_err(|e| anyhow!("Tokenization failed: {:?}", e))
                })
                .collect::<Result<Vec<_>>>()?;
            scores.extend(self.run_batch(&encodings)?);
        }
        Ok(scores)
    }

    fn run_batch(&self, encodings: &[Encoding]) -> Result<Vec<f32>> {
        let rows = encodings.len();
        let width = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(1)
            .clamp(1, MAX_SEQUENCE_LENGTH);
        let shape = vec![rows, width];

        let tensor = |name: &str, pick: fn(&Encoding) -> &[u32]| {
            let flat = pad_rows(encodings.iter().map(pick), width);
            Value::from_array((shape.clone(), flat)).map_err(|e| anyhow!("batch {}: {:?}", name, e))
        };
        let inputs = ort::inputs![
            "input_ids" => tensor("input_ids", Encoding::get_ids)?,
            "attention_mask" => tensor("attention_mask", Encoding::get_attention_mask)?,
            "token_type_ids" => tensor("token_type_ids", Encoding::get_type_ids)?,
        ];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| anyhow!("Batch reranker inference failed: {:?}", e))?;

        // Single output, logits shaped [rows, 1].
        let output_name = outputs
            .iter()
            .next()
            .map(|(name, _)| name.to_string())
            .unwrap_or_else(|| "logits".to_string());
        let (_shape, logits) = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract batch logits: {:?}", e))?;

        if logits.len() != rows {
            return Err(anyhow!(
                "Cross-encoder returned {} logits for {} pairs",
                logits.len(),
                rows
            ));
        }
        Ok(logits.to_vec())
    }
}

fn locate_model(model_dir: &Path) -> Result<PathBuf> {
    MODEL_FILES
        .iter()
        .map(|name| model_dir.join(name))
        .find(|path| path.exists())
        .ok_or_else(|| anyhow!("No reranker model found in: {}", model_dir.display()))
}

/// Truncate or zero-pad each row to `width` and flatten row-major.
fn pad_rows<'a>(rows: impl Iterator<Item = &'a [u32]>, width: usize) -> Vec<i64> {
    let mut flat = Vec::new();
    for row in rows {
        let kept = row.len().min(width);
        flat.extend(row[..kept].iter().map(|&v| v as i64));
        flat.extend(std::iter::repeat(0i64).take(width - kept));
    }
    flat
}

#[async_trait]
impl CrossEncoder for OnnxCrossEncoder {
    async fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let encoder = self.clone();
        let pairs = pairs.to_vec();
        tokio::task::spawn_blocking(move || encoder.score_blocking(&pairs))
            .await
            .map_err(|e| anyhow!("Cross-encoder task panicked: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_rows_pads_and_truncates() {
        let rows: [&[u32]; 3] = [&[101, 7, 102], &[101], &[101, 1, 2, 3, 102]];
        assert_eq!(
            pad_rows(rows.into_iter(), 4),
            vec![101, 7, 102, 0, 101, 0, 0, 0, 101, 1, 2, 3]
        );
    }

    #[test]
    fn test_missing_model_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxCrossEncoder::new(dir.path()).err().unwrap();
        assert!(err.to_string().contains("No reranker model found"));
    }

    #[test]
    fn test_missing_tokenizer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"not a model").unwrap();
        let err = OnnxCrossEncoder::new(dir.path()).err().unwrap();
        assert!(err.to_string().contains("Tokenizer not found"));
    }
}
