use super::{ChunkRecord, IndexEntry, QueryFilter, ScoredChunk, VectorIndex};
use crate::config::env_or;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::{debug, info};
use qdrant_client::qdrant::{
    vectors_config, with_payload_selector, Condition, CreateCollectionBuilder, Distance, Filter,
    GetCollectionInfoResponse, PointStruct, SearchPoints, UpsertPointsBuilder, Value,
    VectorParams, WithPayloadSelector,
};
use qdrant_client::{Qdrant, QdrantError};
use std::collections::HashMap;
use std::env;
use std::sync::OnceLock;
use uuid::Uuid;

/// Extra hits fetched beyond `k` so equal scores at the cut can be re-ordered by age
const TIE_WINDOW: u64 = 8;

/// Configuration for Qdrant
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    /// Collection shared by every session
    pub collection: String,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let url = env::var("QDRANT_URL")?;
        let api_key = env::var("QDRANT_API_KEY").ok();
        let collection = env_or("QDRANT_COLLECTION", "document-index".to_string())?;

        Ok(QdrantConfig {
            url,
            api_key,
            collection,
        })
    }
}

/// [`VectorIndex`] backed by a Qdrant collection
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: OnceLock<usize>,
}

impl QdrantIndex {
    /// Create a new Qdrant client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder.build().map_err(unavailable)?;

        Ok(QdrantIndex {
            client,
            collection: config.collection,
            dimension: OnceLock::new(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn dimension(&self) -> Result<usize> {
        self.dimension.get().copied().ok_or_else(|| {
            RagError::IndexUnavailable(format!(
                "collection {} has not been initialized",
                self.collection
            ))
        })
    }

    /// Dimensionality of the existing collection, or `None` if it does not exist
    async fn existing_dimension(&self) -> Result<Option<usize>> {
        match self.client.collection_info(&self.collection).await {
            Ok(info) => vector_size(&info).map(Some).ok_or_else(|| {
                RagError::IndexUnavailable(format!(
                    "collection {} has no single dense vector configuration",
                    self.collection
                ))
            }),
            Err(QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(unavailable(e)),
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        match self.existing_dimension().await? {
            Some(existing) if existing != dimension => {
                return Err(RagError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                });
            }
            Some(_) => info!("Collection {} already exists", self.collection),
            None => {
                info!(
                    "Creating collection {} ({} dimensions)",
                    self.collection, dimension
                );
                let create_collection = CreateCollectionBuilder::new(self.collection.clone())
                    .vectors_config(VectorParams {
                        size: dimension as u64,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    });

                self.client
                    .create_collection(create_collection)
                    .await
                    .map_err(unavailable)?;
            }
        }

        let stored = *self.dimension.get_or_init(|| dimension);
        if stored != dimension {
            return Err(RagError::DimensionMismatch {
                expected: stored,
                actual: dimension,
            });
        }
        Ok(())
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let dimension = self.dimension()?;
        let inserted_at = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();

        let points = entries
            .into_iter()
            .map(|entry| {
                entry.embedding.check_dimension(dimension)?;
                let record = entry.record;

                let mut payload: HashMap<String, Value> = HashMap::new();
                payload.insert("text".to_string(), Value::from(record.text));
                payload.insert(
                    "document_id".to_string(),
                    Value::from(record.document_id.clone()),
                );
                payload.insert(
                    "chunk_index".to_string(),
                    Value::from(record.sequence as i64),
                );
                payload.insert(
                    "start_position".to_string(),
                    Value::from(record.start_position as i64),
                );
                payload.insert("inserted_at".to_string(), Value::from(inserted_at));

                Ok(PointStruct::new(
                    point_id(&record.document_id, record.sequence),
                    entry.embedding.values,
                    payload,
                ))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        debug!(
            "Upserting {} points into {}",
            points.len(),
            self.collection
        );

        let upsert_request = UpsertPointsBuilder::new(self.collection.clone(), points)
            .wait(true)
            .build();

        self.client
            .upsert_points(upsert_request)
            .await
            .map_err(unavailable)?;

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
        vector.check_dimension(self.dimension()?)?;

        let filter = filter
            .and_then(|f| f.document_id.clone())
            .map(|document_id| Filter::must([Condition::matches("document_id", document_id)]));

        let search_request = SearchPoints {
            collection_name: self.collection.clone(),
            vector: vector.values.clone(),
            limit: k as u64 + TIE_WINDOW,
            filter,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(with_payload_selector::SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .map_err(unavailable)?;

        let mut hits: Vec<(ScoredChunk, (i64, usize))> = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let payload = scored_point.payload;
                let text = payload.get("text")?.as_str()?.to_string();
                let document_id = payload.get("document_id")?.as_str()?.to_string();
                let sequence = payload.get("chunk_index")?.as_integer()? as usize;
                let start_position = payload
                    .get("start_position")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(0) as usize;
                let inserted_at = payload
                    .get("inserted_at")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(0);

                Some((
                    ScoredChunk {
                        record: ChunkRecord {
                            document_id,
                            sequence,
                            text,
                            start_position,
                        },
                        score: scored_point.score,
                    },
                    (inserted_at, sequence),
                ))
            })
            .collect();

        hits.sort_by(|(a, a_age), (b, b_age)| {
            b.score.total_cmp(&a.score).then_with(|| a_age.cmp(b_age))
        });
        hits.truncate(k);

        Ok(hits.into_iter().map(|(hit, _)| hit).collect())
    }
}

/// Stable point id for a chunk, so re-uploading replaces instead of duplicating
fn point_id(document_id: &str, sequence: usize) -> String {
    let key = format!("{}:{}", document_id, sequence);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

fn vector_size(info: &GetCollectionInfoResponse) -> Option<usize> {
    let config = info
        .result
        .as_ref()?
        .config
        .as_ref()?
        .params
        .as_ref()?
        .vectors_config
        .as_ref()?
        .config
        .as_ref()?;
    match config {
        vectors_config::Config::Params(params) => Some(params.size as usize),
        _ => None,
    }
}

fn unavailable(e: QdrantError) -> RagError {
    RagError::IndexUnavailable(e.to_string())
}
