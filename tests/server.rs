mod common;

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use common::{harness, sample_text};
use rag_chat::server::router;
use serde_json::Value;

fn server() -> (TestServer, common::Harness) {
    let h = harness();
    let server = TestServer::new(router(h.engine.clone())).expect("Failed to create test server");
    (server, h)
}

fn file_part(bytes: Vec<u8>, name: &str, mime: &str) -> Part {
    Part::bytes(bytes).file_name(name).mime_type(mime)
}

#[tokio::test]
async fn test_root() {
    let (server, _h) = server();
    let response = server.get("/").await;
    response.assert_status_ok();
    assert!(response.json::<Value>()["message"].is_string());
}

#[tokio::test]
async fn test_upload_txt() {
    let (server, h) = server();
    let form = MultipartForm::new().add_part(
        "file",
        file_part(sample_text(2500).into_bytes(), "notes.txt", "text/plain"),
    );

    let response = server.post("/upload").multipart(form).await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert_eq!(body["document_id"], "notes.txt");
    assert_eq!(body["chunks_indexed"], 3);
    assert_eq!(h.index.inner.len(), 3);
}

#[tokio::test]
async fn test_upload_with_explicit_document_id() {
    let (server, _h) = server();
    let form = MultipartForm::new()
        .add_text("document_id", "handbook")
        .add_part(
            "file",
            file_part(b"Employees get a free lunch.".to_vec(), "x.txt", "text/plain"),
        );

    let response = server.post("/upload").multipart(form).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["document_id"], "handbook");
}

#[tokio::test]
async fn test_upload_with_generic_mime_uses_file_extension() {
    let (server, _h) = server();
    let form = MultipartForm::new().add_part(
        "file",
        file_part(
            b"Plain text sent as a blob.".to_vec(),
            "blob.txt",
            "application/octet-stream",
        ),
    );

    server
        .post("/upload")
        .multipart(form)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_upload_unsupported_format() {
    let (server, h) = server();
    let form = MultipartForm::new().add_part(
        "file",
        file_part(vec![0x89, b'P', b'N', b'G'], "photo.png", "image/png"),
    );

    let response = server.post("/upload").multipart(form).await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["kind"], "unsupported_format");
    assert!(h.index.inner.is_empty());
}

#[tokio::test]
async fn test_upload_empty_document() {
    let (server, _h) = server();
    let form = MultipartForm::new().add_part(
        "file",
        file_part(b"  \n\n ".to_vec(), "blank.txt", "text/plain"),
    );

    let response = server.post("/upload").multipart(form).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["kind"], "extraction_failure");
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let (server, _h) = server();
    let form = MultipartForm::new().add_text("document_id", "nothing");

    let response = server.post("/upload").multipart(form).await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["kind"], "bad_request");
}
