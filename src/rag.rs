use crate::chunking::{Chunker, TextChunk};
use crate::config::RagConfig;
use crate::context::PromptBuilder;
use crate::database::{IndexEntry, ScoredChunk, VectorIndex};
use crate::document::{extract_text, Document};
use crate::embeddings::{Embedder, Embedding};
use crate::error::{RagError, Result};
use crate::llm::{LanguageModel, TextStream};
use crate::session::{SessionContext, SessionMessage};
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::OnceCell;

/// Events streamed to the client during a chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Part of the assistant reply
    Fragment { text: String },
    /// The reply is complete
    End,
    /// The turn failed; the session stays open
    Error { kind: String, message: String },
}

impl From<&RagError> for TurnEvent {
    fn from(e: &RagError) -> Self {
        TurnEvent::Error {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Outcome of a successful ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks_indexed: usize,
}

/// Progress of a single chat turn
pub enum TurnState {
    Idle,
    Embedding {
        message: String,
    },
    Retrieving {
        message: String,
        query: Embedding,
    },
    Assembling {
        message: String,
        chunks: Vec<ScoredChunk>,
    },
    Generating {
        message: String,
        prompt: String,
    },
    Streaming {
        message: String,
        fragments: TextStream,
        reply: String,
    },
    Failed(RagError),
}

impl TurnState {
    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Embedding { .. } => "embedding",
            TurnState::Retrieving { .. } => "retrieving",
            TurnState::Assembling { .. } => "assembling",
            TurnState::Generating { .. } => "generating",
            TurnState::Streaming { .. } => "streaming",
            TurnState::Failed(_) => "failed",
        }
    }
}

impl fmt::Debug for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::Failed(e) => write!(f, "Failed({})", e),
            TurnState::Streaming { reply, .. } => {
                write!(f, "Streaming({} chars so far)", reply.chars().count())
            }
            other => f.write_str(other.name()),
        }
    }
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
    config: RagConfig,
    chunker: Chunker,
    prompts: PromptBuilder,
    bootstrapped: OnceCell<()>,
}

impl RagEngine {
    /// Create a new RAG engine
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
        config: RagConfig,
    ) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::from_config(&config)?;
        let prompts = PromptBuilder::new(config.prompt_budget_chars);

        Ok(RagEngine {
            embedder,
            index,
            model,
            config,
            chunker,
            prompts,
            bootstrapped: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Make sure the index collection exists with the embedder's dimensionality.
    /// Runs once; later calls return immediately.
    pub async fn bootstrap(&self) -> Result<()> {
        self.bootstrapped
            .get_or_try_init(|| async {
                let dimension = self.embedder.dimension();
                info!("Bootstrapping vector index ({} dimensions)", dimension);
                self.retry("index bootstrap", || self.index.ensure_collection(dimension))
                    .await
            })
            .await?;
        Ok(())
    }

    /// Process a document: extract, chunk, embed, and store it in the index
    pub async fn ingest(&self, document: &Document, document_id: &str) -> Result<IngestReport> {
        self.bootstrap().await?;

        let text = extract_text(document)?;
        info!(
            "Ingesting {} ({} characters)",
            document_id,
            text.chars().count()
        );

        let mut chunks = self.chunker.chunks(document_id, &text);
        let mut chunks_indexed = 0;

        loop {
            let batch: Vec<TextChunk> = chunks
                .by_ref()
                .take(self.config.embed_batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }

            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embeddings = self
                .retry("embedding", || self.embedder.embed(&texts))
                .await?;
            if embeddings.len() != batch.len() {
                return Err(RagError::EmbeddingUnavailable(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            let entries: Vec<IndexEntry> = batch
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| IndexEntry::new(chunk, embedding))
                .collect();
            let count = entries.len();

            self.retry("upsert", || self.index.upsert(entries.clone()))
                .await?;
            chunks_indexed += count;
            debug!("Indexed {} chunks of {}", chunks_indexed, document_id);
        }

        info!("Stored {} chunks for {}", chunks_indexed, document_id);
        Ok(IngestReport {
            document_id: document_id.to_string(),
            chunks_indexed,
        })
    }

    /// Answer one user message, streaming the reply into `events`.
    ///
    /// On success the message and the full reply are appended to the session and
    /// the reply is returned. On failure an error event is emitted and the session
    /// is left unchanged.
    pub async fn run_turn(
        &self,
        session: &mut SessionContext,
        message: &str,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<String> {
        debug!("Session {}: idle -> embedding", session.id());
        let mut state = TurnState::Embedding {
            message: message.to_string(),
        };

        loop {
            state = match state {
                TurnState::Idle => {
                    return Ok(session
                        .history()
                        .last()
                        .map(|m| m.text.clone())
                        .unwrap_or_default());
                }
                TurnState::Failed(e) => {
                    error!("Session {}: turn failed: {}", session.id(), e);
                    if events.try_send(TurnEvent::from(&e)).is_err() {
                        warn!(
                            "Session {}: could not deliver error event",
                            session.id()
                        );
                    }
                    return Err(e);
                }
                active => {
                    let from = active.name();
                    let next = self.step(active, session, &events).await;
                    if from != next.name() {
                        debug!("Session {}: {} -> {}", session.id(), from, next.name());
                    }
                    next
                }
            };
        }
    }

    /// Advance a turn by one transition
    pub async fn step(
        &self,
        state: TurnState,
        session: &mut SessionContext,
        events: &mpsc::Sender<TurnEvent>,
    ) -> TurnState {
        match state {
            TurnState::Embedding { message } => {
                if let Err(e) = self.bootstrap().await {
                    return TurnState::Failed(e);
                }
                let embedded = self
                    .retry("query embedding", || self.embedder.embed_one(&message))
                    .await
                    .and_then(|query| {
                        query.check_dimension(self.embedder.dimension())?;
                        Ok(query)
                    });
                match embedded {
                    Ok(query) => TurnState::Retrieving { message, query },
                    Err(e) => TurnState::Failed(e),
                }
            }

            TurnState::Retrieving { message, query } => {
                let filter = session.scope().cloned();
                let retrieved = self
                    .retry("retrieval", || {
                        self.index.query(&query, self.config.top_k, filter.as_ref())
                    })
                    .await;
                match retrieved {
                    Ok(chunks) => {
                        if chunks.is_empty() {
                            info!("No relevant chunks found; answering from history only");
                        }
                        TurnState::Assembling { message, chunks }
                    }
                    Err(e) => TurnState::Failed(e),
                }
            }

            TurnState::Assembling { message, chunks } => {
                let prompt = self.prompts.assemble(&message, &chunks, session.history());
                debug!(
                    "Prompt uses {} chunks and {} history messages ({} chars)",
                    prompt.chunks_used,
                    prompt.history_used,
                    prompt.text.chars().count()
                );
                TurnState::Generating {
                    message,
                    prompt: prompt.text,
                }
            }

            TurnState::Generating { message, prompt } => {
                match self.retry("generation", || self.model.stream(&prompt)).await {
                    Ok(fragments) => TurnState::Streaming {
                        message,
                        fragments,
                        reply: String::new(),
                    },
                    Err(e) => TurnState::Failed(e),
                }
            }

            TurnState::Streaming {
                message,
                mut fragments,
                mut reply,
            } => match fragments.next().await {
                Some(Ok(text)) => {
                    reply.push_str(&text);
                    match self.deliver(events, TurnEvent::Fragment { text }).await {
                        Ok(()) => TurnState::Streaming {
                            message,
                            fragments,
                            reply,
                        },
                        Err(e) => TurnState::Failed(e),
                    }
                }
                Some(Err(e)) => TurnState::Failed(e),
                None => {
                    if let Err(e) = self.deliver(events, TurnEvent::End).await {
                        return TurnState::Failed(e);
                    }
                    session.append(SessionMessage::user(message));
                    session.append(SessionMessage::assistant(reply));
                    TurnState::Idle
                }
            },

            terminal => terminal,
        }
    }

    /// Send an event, failing the turn if the consumer cannot keep up
    async fn deliver(&self, events: &mpsc::Sender<TurnEvent>, event: TurnEvent) -> Result<()> {
        events
            .send_timeout(event, self.config.stream_send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => RagError::SlowConsumer,
                SendTimeoutError::Closed(_) => RagError::ChannelClosed,
            })
    }

    /// Run `operation`, retrying transient failures with exponential backoff
    async fn retry<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.config.retry_backoff;
        let mut attempt = 1;

        loop {
            match operation().await {
                Err(e) if e.is_transient() && attempt < self.config.retry_max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, self.config.retry_max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
