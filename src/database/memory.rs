use super::{cosine_similarity, IndexEntry, QueryFilter, ScoredChunk, VectorIndex};
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::debug;
use std::sync::RwLock;

/// In-process index with brute-force cosine search.
///
/// Entries are kept in insertion order; a replaced entry moves to the end.
pub struct MemoryIndex {
    dimension: usize,
    entries: RwLock<Vec<IndexEntry>>,
}

impl MemoryIndex {
    pub fn new(dimension: usize) -> Self {
        MemoryIndex {
            dimension,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> RagError {
    RagError::IndexUnavailable("in-memory index lock poisoned".to_string())
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        if dimension != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: dimension,
            });
        }
        Ok(())
    }

    async fn upsert(&self, new_entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &new_entries {
            entry.embedding.check_dimension(self.dimension)?;
        }

        let mut entries = self.entries.write().map_err(poisoned)?;
        for entry in new_entries {
            entries.retain(|existing| {
                existing.record.document_id != entry.record.document_id
                    || existing.record.sequence != entry.record.sequence
            });
            entries.push(entry);
        }
        debug!("In-memory index holds {} entries", entries.len());
        Ok(())
    }

    async fn query(
        &self,
        vector: &Embedding,
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(RagError::InvalidConfig("k must be at least 1".to_string()));
        }
        vector.check_dimension(self.dimension)?;

        let entries = self.entries.read().map_err(poisoned)?;
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .filter(|entry| filter.map_or(true, |f| f.matches(&entry.record)))
            .map(|entry| ScoredChunk {
                record: entry.record.clone(),
                score: cosine_similarity(&vector.values, &entry.embedding.values),
            })
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}
