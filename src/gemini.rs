use crate::config::env_or;
use crate::embeddings::{Embedder, Embedding};
use crate::error::{RagError, Result};
use crate::llm::{LanguageModel, TextStream};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Upstream limit on requests per `batchEmbedContents` call
const MAX_BATCH_EMBED: usize = 100;

/// Configuration for Gemini API
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub embedding_model: String,
    pub generation_model: String,
    /// Dimensionality requested from (and expected of) the embedding model
    pub embedding_dimension: usize,
    pub temperature: f32,
    pub max_output_tokens: i32,
}

impl GeminiConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")?;

        Ok(GeminiConfig {
            api_key,
            api_base: env_or("GEMINI_API_BASE", DEFAULT_API_BASE.to_string())?,
            embedding_model: env_or("GEMINI_EMBEDDING_MODEL", "text-embedding-004".to_string())?,
            generation_model: env_or("GEMINI_GENERATION_MODEL", "gemini-2.0-flash".to_string())?,
            embedding_dimension: env_or("EMBEDDING_DIMENSION", 768)?,
            temperature: env_or("GEMINI_TEMPERATURE", 0.5)?,
            max_output_tokens: env_or("GEMINI_MAX_OUTPUT_TOKENS", 1024)?,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/{}:{}",
            self.api_base.trim_end_matches('/'),
            model_path(model),
            method
        )
    }
}

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Self {
        let client = reqwest::Client::new();
        GeminiClient { config, client }
    }

    /// Get the client configuration
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let model = model_path(&self.config.embedding_model);
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: model.clone(),
                    content: Content::new(text),
                    output_dimensionality: Some(self.config.embedding_dimension),
                })
                .collect(),
        };

        let url = format!(
            "{}?key={}",
            self.config
                .endpoint(&self.config.embedding_model, "batchEmbedContents"),
            self.config.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::EmbeddingUnavailable(format!(
                "API request failed: {} {}",
                status, error_text
            )));
        }

        let response_data: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(format!("Invalid response: {}", e)))?;

        if response_data.embeddings.len() != texts.len() {
            return Err(RagError::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response_data.embeddings.len()
            )));
        }

        response_data
            .embeddings
            .into_iter()
            .map(|data| {
                let embedding = Embedding::new(data.values);
                embedding.check_dimension(self.config.embedding_dimension)?;
                Ok(embedding)
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    fn dimension(&self) -> usize {
        self.config.embedding_dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH_EMBED) {
            debug!("Embedding batch of {} texts", batch.len());
            embeddings.extend(self.embed_batch(batch).await?);
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn stream(&self, prompt: &str) -> Result<TextStream> {
        let request = GenerateRequest {
            contents: vec![Content::new_with_role(prompt, "user")],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: 0.8,
                top_k: 40,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let url = format!(
            "{}?alt=sse&key={}",
            self.config
                .endpoint(&self.config.generation_model, "streamGenerateContent"),
            self.config.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::GenerationUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::GenerationUnavailable(format!(
                "API request failed: {} {}",
                status, error_text
            )));
        }

        let mut body = response.bytes_stream();
        let fragments = async_stream::stream! {
            let mut buffer = Vec::new();
            'read: loop {
                let events = match body.next().await {
                    Some(Ok(bytes)) => {
                        buffer.extend(bytes.iter().filter(|b| **b != b'\r'));
                        drain_sse_events(&mut buffer)
                    }
                    Some(Err(e)) => {
                        yield Err(RagError::GenerationUnavailable(format!("Stream error: {}", e)));
                        break 'read;
                    }
                    None => {
                        // Flush a final event that lacks the trailing blank line
                        buffer.extend_from_slice(b"\n\n");
                        let events = drain_sse_events(&mut buffer);
                        for event in events {
                            match parse_fragment(&event) {
                                Ok(Some(text)) => yield Ok(text),
                                Ok(None) => {}
                                Err(e) => yield Err(e),
                            }
                        }
                        break 'read;
                    }
                };

                for event in events {
                    match parse_fragment(&event) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            break 'read;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(fragments))
    }

    fn model_name(&self) -> &str {
        &self.config.generation_model
    }
}

/// `text-embedding-004` -> `models/text-embedding-004`
fn model_path(model: &str) -> String {
    format!("models/{}", model.trim_start_matches("models/"))
}

/// Remove every complete server-sent event from `buffer`, returning their `data` payloads
fn drain_sse_events(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut events = Vec::new();

    while let Some(end) = buffer.windows(2).position(|w| w == b"\n\n") {
        let raw: Vec<u8> = buffer.drain(..end + 2).collect();
        let block = String::from_utf8_lossy(&raw[..end]);

        let data: Vec<&str> = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|value| value.strip_prefix(' ').unwrap_or(value))
            .collect();
        if !data.is_empty() {
            events.push(data.join("\n"));
        }
    }

    events
}

/// Text carried by one streamed `GenerateContentResponse`, if any
fn parse_fragment(event: &str) -> Result<Option<String>> {
    let response: GenerateResponse = serde_json::from_str(event).map_err(|e| {
        warn!("Unparseable generation event: {}", event);
        RagError::GenerationUnavailable(format!("Invalid stream event: {}", e))
    })?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    Ok(if text.is_empty() { None } else { Some(text) })
}

// Shared request/response structures for the Gemini API

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Deserialize, Debug)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
}

impl<'a> Content<'a> {
    fn new(text: &'a str) -> Self {
        Content {
            parts: vec![Part { text }],
            role: None,
        }
    }

    fn new_with_role(text: &'a str, role: &'static str) -> Self {
        Content {
            parts: vec![Part { text }],
            role: Some(role),
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}
