//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use rag_chat::config::RagConfig;
use rag_chat::database::{IndexEntry, MemoryIndex, QueryFilter, ScoredChunk, VectorIndex};
use rag_chat::embeddings::{Embedder, Embedding};
use rag_chat::llm::{LanguageModel, TextStream};
use rag_chat::rag::RagEngine;
use rag_chat::{RagError, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DIMENSION: usize = 16;

/// Messages containing this marker make [`FaultyIndex`] fail the query
pub const FAIL_MARKER: &str = "#fail";

/// Deterministic bag-of-words embedder
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|text| hash_embedding(text)).collect())
    }
}

pub fn hash_embedding(text: &str) -> Embedding {
    let mut values = vec![0.0f32; DIMENSION];
    // Component 0 is reserved for the failure marker
    if text.contains(FAIL_MARKER) {
        values[0] = 1000.0;
    }
    for word in text.split_whitespace() {
        let word = word.to_lowercase();
        let hash = word
            .bytes()
            .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
        values[1 + (hash as usize % (DIMENSION - 1))] += 1.0;
    }
    Embedding::new(values)
}

/// In-memory index whose queries fail for marked vectors
pub struct FaultyIndex {
    pub inner: MemoryIndex,
}

impl FaultyIndex {
    pub fn new() -> Self {
        FaultyIndex {
            inner: MemoryIndex::new(DIMENSION),
        }
    }
}

#[async_trait]
impl VectorIndex for FaultyIndex {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        self.inner.ensure_collection(dimension).await
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.inner.upsert(entries).await
    }

    async fn query(
        &self,
        vector: &Embedding,
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        if vector.values[0] > 999.0 {
            return Err(RagError::IndexUnavailable("connection refused".to_string()));
        }
        self.inner.query(vector, k, filter).await
    }
}

/// Streams a numbered reply in fragments and records every prompt it sees
pub struct ScriptedModel {
    pub prompts: Mutex<Vec<String>>,
    fragments: Vec<String>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::with_fragments(&[])
    }

    /// Reply with exactly these fragments (empty means "Answer <n>." in two parts)
    pub fn with_fragments(fragments: &[&str]) -> Self {
        ScriptedModel {
            prompts: Mutex::new(Vec::new()),
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        let turn = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            prompts.len()
        };

        let fragments: Vec<Result<String>> = if self.fragments.is_empty() {
            vec![Ok("Answer ".to_string()), Ok(format!("{}.", turn))]
        } else {
            self.fragments.iter().cloned().map(Ok).collect()
        };
        Ok(Box::pin(stream::iter(fragments)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn test_config() -> RagConfig {
    RagConfig {
        chunk_size: 1000,
        chunk_overlap: 100,
        top_k: 4,
        retry_max_attempts: 2,
        retry_backoff: Duration::from_millis(1),
        ..RagConfig::default()
    }
}

pub struct Harness {
    pub engine: Arc<RagEngine>,
    pub index: Arc<FaultyIndex>,
    pub model: Arc<ScriptedModel>,
}

pub fn harness_with(config: RagConfig, model: ScriptedModel) -> Harness {
    let index = Arc::new(FaultyIndex::new());
    let model = Arc::new(model);
    let engine = RagEngine::new(
        Arc::new(HashEmbedder),
        index.clone(),
        model.clone(),
        config,
    )
    .expect("valid test config");

    Harness {
        engine: Arc::new(engine),
        index,
        model,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config(), ScriptedModel::new())
}

/// `len` characters of readable text
pub fn sample_text(len: usize) -> String {
    "Retrieval augmented generation grounds answers in documents. "
        .chars()
        .cycle()
        .take(len)
        .collect()
}
