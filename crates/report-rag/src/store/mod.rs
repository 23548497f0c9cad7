//! Read-only chunk store: the ordered identifier sequence and the
//! identifier → {text, metadata} table produced at ingestion time.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::types::{Chunk, ChunkId, ChunkMetadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub text: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Shared, read-only access to the chunk corpus.
pub trait ChunkStore: Send + Sync {
    /// Ordered, stable identifier sequence. Vector index positions index into it.
    fn identifiers(&self) -> &[ChunkId];

    fn lookup(&self, id: &str) -> Option<&ChunkInfo>;

    fn len(&self) -> usize {
        self.identifiers().len()
    }

    fn is_empty(&self) -> bool {
        self.identifiers().is_empty()
    }

    /// Resolve a corpus position to a full chunk.
    fn chunk_at(&self, position: usize) -> Option<Chunk> {
        let id = self.identifiers().get(position)?;
        let info = self.lookup(id)?;
        Some(Chunk {
            id: id.clone(),
            position,
            text: info.text.clone(),
            metadata: info.metadata.clone(),
        })
    }
}

/// On-disk layout of the chunk mapping artifact.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkMappingFile {
    chunk_ids: Vec<ChunkId>,
    chunk_id_to_info: HashMap<ChunkId, ChunkInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryChunkStore {
    ids: Vec<ChunkId>,
    table: HashMap<ChunkId, ChunkInfo>,
}

impl InMemoryChunkStore {
    /// Build a store, checking that every identifier resolves and is unique.
    pub fn new(ids: Vec<ChunkId>, table: HashMap<ChunkId, ChunkInfo>) -> Result<Self> {
        let mut seen = std::collections::HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(anyhow!("duplicate chunk id in identifier sequence: {}", id));
            }
            if !table.contains_key(id) {
                return Err(anyhow!("chunk id {} has no entry in the chunk table", id));
            }
        }
        Ok(Self { ids, table })
    }

    /// Build from chunks already in corpus order.
    pub fn from_chunks(chunks: impl IntoIterator<Item = (ChunkId, ChunkInfo)>) -> Result<Self> {
        let mut ids = Vec::new();
        let mut table = HashMap::new();
        for (id, info) in chunks {
            ids.push(id.clone());
            table.insert(id, info);
        }
        Self::new(ids, table)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let mapping: ChunkMappingFile =
            serde_json::from_str(content).context("Failed to parse chunk mapping")?;
        Self::new(mapping.chunk_ids, mapping.chunk_id_to_info)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chunk mapping {}", path.display()))?;
        let store = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            chunks = store.len(),
            "Loaded chunk store"
        );
        Ok(store)
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn identifiers(&self) -> &[ChunkId] {
        &self.ids
    }

    fn lookup(&self, id: &str) -> Option<&ChunkInfo> {
        self.table.get(id)
    }
}
