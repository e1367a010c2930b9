mod common;

use common::{harness, harness_with, test_config, ScriptedModel, FAIL_MARKER};
use futures::StreamExt;
use rag_chat::document::{Document, MIME_TXT};
use rag_chat::rag::TurnEvent;
use rag_chat::server::serve_turn;
use rag_chat::session::{Role, SessionContext};
use rag_chat::RagError;
use std::time::Duration;
use tokio::sync::mpsc;

async fn collect(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_chat_with_empty_index_uses_history_only() {
    let h = harness();
    let mut session = SessionContext::new();
    let (tx, rx) = mpsc::channel(16);

    let reply = h
        .engine
        .run_turn(&mut session, "Is anyone there?", tx)
        .await
        .unwrap();
    assert_eq!(reply, "Answer 1.");
    assert_eq!(collect(rx).await.last(), Some(&TurnEvent::End));

    let prompts = h.model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Context:\n(none)\n"));
    assert!(prompts[0].ends_with("Question: Is anyone there?"));
}

#[tokio::test]
async fn test_second_turn_sees_first_turn_in_order() {
    let h = harness();
    let mut session = SessionContext::new();

    let (tx, _rx) = mpsc::channel(16);
    h.engine
        .run_turn(&mut session, "What is a chunk?", tx)
        .await
        .unwrap();
    let (tx, _rx) = mpsc::channel(16);
    h.engine
        .run_turn(&mut session, "And an embedding?", tx)
        .await
        .unwrap();

    let prompts = h.model.prompts();
    assert!(!prompts[0].contains("User: What is a chunk?"));
    assert!(prompts[1].contains("History:\nUser: What is a chunk?\nAssistant: Answer 1.\n"));
    assert!(prompts[1].ends_with("Question: And an embedding?"));

    let roles: Vec<Role> = session.history().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(session.history()[3].text, "Answer 2.");
}

#[tokio::test]
async fn test_retrieved_chunks_reach_the_prompt() {
    let h = harness();
    let facts = "The lighthouse keeper feeds the cats every morning at dawn.";
    h.engine
        .ingest(&Document::new(facts.as_bytes().to_vec(), MIME_TXT), "facts.txt")
        .await
        .unwrap();

    let mut session = SessionContext::new();
    let (tx, _rx) = mpsc::channel(16);
    h.engine
        .run_turn(&mut session, "Who feeds the cats?", tx)
        .await
        .unwrap();

    assert!(h.model.prompts()[0].contains(&format!("[1] {}", facts)));
}

#[tokio::test]
async fn test_scoped_session_only_retrieves_its_document() {
    let h = harness();
    for (id, text) in [("a.txt", "apples grow on trees"), ("b.txt", "bananas grow on plants")] {
        h.engine
            .ingest(&Document::new(text.as_bytes().to_vec(), MIME_TXT), id)
            .await
            .unwrap();
    }

    let mut session = SessionContext::new().with_scope("b.txt");
    let (tx, _rx) = mpsc::channel(16);
    h.engine
        .run_turn(&mut session, "what grows?", tx)
        .await
        .unwrap();

    let prompt = &h.model.prompts()[0];
    assert!(prompt.contains("bananas grow on plants"));
    assert!(!prompt.contains("apples"));
}

#[tokio::test]
async fn test_retrieval_failure_is_isolated_to_its_session() {
    let h = harness();
    let mut session_a = SessionContext::new();
    let mut session_b = SessionContext::new();

    let (tx_a, rx_a) = mpsc::channel(16);
    let (tx_b, rx_b) = mpsc::channel(16);
    let failing_message = format!("break retrieval {}", FAIL_MARKER);

    let (result_a, result_b) = tokio::join!(
        h.engine.run_turn(&mut session_a, &failing_message, tx_a),
        h.engine.run_turn(&mut session_b, "a normal question", tx_b),
    );

    assert!(matches!(result_a, Err(RagError::IndexUnavailable(_))));
    assert!(result_b.is_ok());

    let events_a = collect(rx_a).await;
    assert!(matches!(
        events_a.as_slice(),
        [TurnEvent::Error { kind, .. }] if kind == "index_unavailable"
    ));
    assert_eq!(collect(rx_b).await.last(), Some(&TurnEvent::End));

    assert!(session_a.history().is_empty());
    assert_eq!(session_b.history().len(), 2);

    // The failed session keeps working
    let (tx_a, _rx_a) = mpsc::channel(16);
    assert!(h
        .engine
        .run_turn(&mut session_a, "try again", tx_a)
        .await
        .is_ok());
    assert_eq!(session_a.history().len(), 2);
}

#[tokio::test]
async fn test_slow_consumer_fails_the_turn() {
    let config = rag_chat::config::RagConfig {
        stream_send_timeout: Duration::from_millis(20),
        ..test_config()
    };
    let h = harness_with(config, ScriptedModel::with_fragments(&["one ", "two ", "three"]));
    let mut session = SessionContext::new();

    // Nobody reads from a channel with room for one event
    let (tx, rx) = mpsc::channel(1);
    let result = h.engine.run_turn(&mut session, "hello", tx).await;
    assert!(matches!(result, Err(RagError::SlowConsumer)));
    assert!(session.history().is_empty());

    let events = collect(rx).await;
    assert_eq!(
        events,
        vec![TurnEvent::Fragment {
            text: "one ".to_string()
        }]
    );

    let (tx, rx) = mpsc::channel(16);
    assert_eq!(
        h.engine.run_turn(&mut session, "hello", tx).await.unwrap(),
        "one two three"
    );
    assert_eq!(collect(rx).await.len(), 4);
}

#[tokio::test]
async fn test_serve_turn_writes_json_frames() {
    let h = harness();
    let mut session = SessionContext::new();
    let (mut outbound, inbound) = futures::channel::mpsc::unbounded::<String>();

    assert!(serve_turn(&h.engine, &mut session, "hi", &mut outbound).await);
    drop(outbound);

    let frames: Vec<serde_json::Value> = inbound
        .map(|frame| serde_json::from_str(&frame).unwrap())
        .collect()
        .await;
    assert_eq!(
        frames,
        vec![
            serde_json::json!({"type": "fragment", "text": "Answer "}),
            serde_json::json!({"type": "fragment", "text": "1."}),
            serde_json::json!({"type": "end"}),
        ]
    );
}

#[tokio::test]
async fn test_serve_turn_reports_errors_and_keeps_connection() {
    let h = harness();
    let mut session = SessionContext::new();
    let (mut outbound, mut inbound) = futures::channel::mpsc::unbounded::<String>();

    let message = format!("{} please", FAIL_MARKER);
    assert!(serve_turn(&h.engine, &mut session, &message, &mut outbound).await);

    let frame: serde_json::Value =
        serde_json::from_str(&inbound.next().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["kind"], "index_unavailable");
}

#[tokio::test]
async fn test_serve_turn_stops_when_client_is_gone() {
    let h = harness();
    let mut session = SessionContext::new();
    let (mut outbound, inbound) = futures::channel::mpsc::unbounded::<String>();
    drop(inbound);

    assert!(!serve_turn(&h.engine, &mut session, "hi", &mut outbound).await);
}
