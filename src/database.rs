//! Vector storage for embedded chunks.
//!
//! [`VectorIndex`] is the boundary the engine talks to. [`QdrantIndex`] keeps
//! entries in a shared Qdrant collection; [`MemoryIndex`] keeps them in
//! process and is used by tests and local runs.

mod memory;
mod qdrant;

pub use memory::MemoryIndex;
pub use qdrant::{QdrantConfig, QdrantIndex};

use crate::chunking::TextChunk;
use crate::embeddings::Embedding;
use crate::error::Result;
use async_trait::async_trait;

/// Stored text and metadata of one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub document_id: String,
    pub sequence: usize,
    pub text: String,
    pub start_position: usize,
}

/// A chunk together with its vector, as written to the index.
/// Identity is `(document_id, sequence)`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub record: ChunkRecord,
    pub embedding: Embedding,
}

impl IndexEntry {
    pub fn new(chunk: TextChunk, embedding: Embedding) -> Self {
        IndexEntry {
            record: ChunkRecord {
                document_id: chunk.document_id,
                sequence: chunk.sequence,
                text: chunk.text,
                start_position: chunk.start_position,
            },
            embedding,
        }
    }
}

/// A query hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub record: ChunkRecord,
    /// Cosine similarity to the query vector
    pub score: f32,
}

/// Optional restriction of a query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub document_id: Option<String>,
}

impl QueryFilter {
    pub fn document(document_id: impl Into<String>) -> Self {
        QueryFilter {
            document_id: Some(document_id.into()),
        }
    }

    pub fn matches(&self, record: &ChunkRecord) -> bool {
        self.document_id
            .as_ref()
            .map_or(true, |id| *id == record.document_id)
    }
}

/// Shared similarity index over chunk embeddings
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if absent; fail with `DimensionMismatch` if it exists
    /// with a different dimensionality
    async fn ensure_collection(&self, dimension: usize) -> Result<()>;

    /// Insert entries, replacing any stored under the same `(document_id, sequence)`
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Top `k` entries by descending similarity; ties go to the oldest entry.
    /// Returns everything when fewer than `k` entries match.
    async fn query(
        &self,
        vector: &Embedding,
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<ScoredChunk>>;
}

/// Cosine similarity, 0 when either vector has zero length
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
