//! HTTP surface: document upload and WebSocket chat.

use crate::document::Document;
use crate::error::RagError;
use crate::rag::{RagEngine, TurnEvent};
use crate::session::SessionContext;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{future, Sink, SinkExt, StreamExt};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    engine: Arc<RagEngine>,
}

/// Errors returned by HTTP handlers as `{"kind", "message"}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Rag(RagError),
}

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        ApiError::Rag(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Rag(e) => {
                let status = match &e {
                    RagError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
                    RagError::ExtractionFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind(), e.to_string())
            }
        };

        let body = json!({
            "kind": kind,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub document_id: String,
    pub chunks_indexed: usize,
}

/// Build the service router
pub fn router(engine: Arc<RagEngine>) -> Router {
    let max_upload = engine.config().max_upload_bytes;

    Router::new()
        .route("/", get(root))
        .route("/upload", post(upload))
        .route("/chat", get(chat))
        .layer(DefaultBodyLimit::max(max_upload))
        .with_state(AppState { engine })
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({"message": "Welcome to the RAG chat service!"}))
}

/// Multipart upload: a `file` field and an optional `document_id` field
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut document: Option<Document> = None;
    let mut document_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;

                let mut parsed = Document::new(bytes.to_vec(), content_type);
                if let Some(name) = file_name {
                    parsed = parsed.with_file_name(name);
                }
                document = Some(parsed);
            }
            Some("document_id") => {
                let id = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                let id = id.trim();
                if !id.is_empty() {
                    document_id = Some(id.to_string());
                }
            }
            _ => {}
        }
    }

    let document =
        document.ok_or_else(|| ApiError::BadRequest("missing `file` field".to_string()))?;
    let document_id = document_id
        .or_else(|| document.file_name.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!("Upload received for {}", document_id);
    let report = state.engine.ingest(&document, &document_id).await?;

    Ok(Json(UploadResponse {
        message: "File uploaded, content extracted, and indexed successfully".to_string(),
        document_id: report.document_id,
        chunks_indexed: report.chunks_indexed,
    }))
}

async fn chat(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

async fn handle_socket(socket: WebSocket, engine: Arc<RagEngine>) {
    let (sender, mut receiver) = socket.split();
    let mut outbound = sender.with(|frame: String| {
        future::ready(Ok::<Message, axum::Error>(Message::Text(frame.into())))
    });

    let mut session = SessionContext::new();
    info!("Session {} connected", session.id());

    while let Some(incoming) = receiver.next().await {
        let message = match incoming {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Session {}: receive failed: {}", session.id(), e);
                break;
            }
        };

        if !serve_turn(&engine, &mut session, &message, &mut outbound).await {
            break;
        }
    }

    info!(
        "Session {} closed after {} messages",
        session.id(),
        session.history().len()
    );
}

/// Run one chat turn, writing its events to `outbound` as JSON frames.
///
/// The next message is not read until this returns, so turns within one session
/// never overlap. Returns `false` once `outbound` can no longer be written.
pub async fn serve_turn<S>(
    engine: &RagEngine,
    session: &mut SessionContext,
    message: &str,
    outbound: &mut S,
) -> bool
where
    S: Sink<String> + Unpin,
    S::Error: fmt::Display,
{
    let (tx, mut rx) = mpsc::channel(engine.config().stream_buffer);
    let turn = engine.run_turn(session, message, tx);

    // Owns the receiver so a failed write closes the channel and stops the turn
    let forward = {
        let outbound = &mut *outbound;
        async move {
            let mut finished = false;
            while let Some(event) = rx.recv().await {
                finished = !matches!(event, TurnEvent::Fragment { .. });
                if let Err(e) = send_event(outbound, &event).await {
                    warn!("Dropping connection: {}", e);
                    return (false, finished);
                }
            }
            (true, finished)
        }
    };

    let (result, (open, finished)) = tokio::join!(turn, forward);

    // A slow consumer leaves no room for the error event in the channel
    if let Err(e) = result {
        if open && !finished {
            return send_event(outbound, &TurnEvent::from(&e)).await.is_ok();
        }
    }
    open
}

async fn send_event<S>(outbound: &mut S, event: &TurnEvent) -> Result<(), String>
where
    S: Sink<String> + Unpin,
    S::Error: fmt::Display,
{
    let frame = serde_json::to_string(event).map_err(|e| {
        error!("Failed to encode event: {}", e);
        e.to_string()
    })?;
    outbound.send(frame).await.map_err(|e| e.to_string())
}
