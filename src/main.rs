use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use rag_chat::config::RagConfig;
use rag_chat::database::{MemoryIndex, QdrantConfig, QdrantIndex, VectorIndex};
use rag_chat::document::Document;
use rag_chat::embeddings::Embedder;
use rag_chat::gemini::{GeminiClient, GeminiConfig};
use rag_chat::rag::{RagEngine, TurnEvent};
use rag_chat::server;
use rag_chat::session::SessionContext;

/// Retrieval-augmented chat over uploaded documents, using Gemini and Qdrant
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Keep the vector index in process memory instead of Qdrant
    #[arg(long, global = true)]
    memory_index: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP upload endpoint and WebSocket chat
    Serve {
        #[arg(long, default_value = "0.0.0.0:8000")]
        bind: String,
    },
    /// Index a document (supports PDF, DOCX and text)
    Ingest {
        #[arg(index = 1)]
        file_path: String,
        /// Identifier to store the chunks under (defaults to the file name)
        #[arg(long)]
        document_id: Option<String>,
    },
    /// Ask questions interactively
    Chat {
        /// Only retrieve from this document
        #[arg(long)]
        document: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    // Load configuration from environment
    let config = RagConfig::from_env().context("Invalid RAG configuration")?;
    let gemini_config = GeminiConfig::from_env().context("Missing GEMINI_API_KEY")?;
    let gemini = Arc::new(GeminiClient::new(gemini_config));

    let index: Arc<dyn VectorIndex> = if args.memory_index {
        info!("Using in-memory vector index");
        Arc::new(MemoryIndex::new(gemini.dimension()))
    } else {
        let qdrant_config = QdrantConfig::from_env().context("Missing QDRANT_URL")?;
        Arc::new(QdrantIndex::new(qdrant_config).context("Failed to initialize Qdrant client")?)
    };

    let engine = Arc::new(RagEngine::new(gemini.clone(), index, gemini, config)?);
    engine
        .bootstrap()
        .await
        .context("Failed to bootstrap vector index")?;

    match args.command {
        Command::Serve { bind } => {
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("Failed to bind {}", bind))?;
            info!("Listening on {}", bind);
            axum::serve(listener, server::router(engine)).await?;
        }
        Command::Ingest {
            file_path,
            document_id,
        } => {
            info!("Processing file: {}", file_path);

            // Validate input file exists
            if !Path::new(&file_path).exists() {
                error!("File not found: {}", file_path);
                return Err(anyhow::anyhow!("File not found"));
            }

            let document = Document::from_file(&file_path).context("Failed to read document")?;
            let document_id = document_id
                .or_else(|| document.file_name.clone())
                .unwrap_or(file_path);

            info!("Document type: {}", document.mime_type);
            let report = engine
                .ingest(&document, &document_id)
                .await
                .context("Failed to process file")?;
            info!(
                "Indexed {} chunks for {}",
                report.chunks_indexed, report.document_id
            );
        }
        Command::Chat { document } => {
            let session = match document {
                Some(document_id) => SessionContext::new().with_scope(document_id),
                None => SessionContext::new(),
            };
            run_query_loop(&engine, session)
                .await
                .context("Error in query loop")?;
        }
    }

    Ok(())
}

/// Read questions from stdin and print streamed answers until `exit`
async fn run_query_loop(engine: &RagEngine, mut session: SessionContext) -> Result<()> {
    info!("Ready to answer questions. Type 'exit' to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        print!("\nYour question: ");
        stdout.flush()?;

        buffer.clear();
        if stdin.lock().read_line(&mut buffer)? == 0 {
            break;
        }

        let question = buffer.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            info!("Goodbye!");
            break;
        }

        let (tx, mut rx) = mpsc::channel(engine.config().stream_buffer);
        let turn = engine.run_turn(&mut session, question, tx);
        let print = async {
            let mut out = io::stdout();
            while let Some(event) = rx.recv().await {
                match event {
                    TurnEvent::Fragment { text } => {
                        print!("{}", text);
                        let _ = out.flush();
                    }
                    TurnEvent::End => println!(),
                    TurnEvent::Error { kind, message } => {
                        eprintln!("\n[{}] {}", kind, message)
                    }
                }
            }
        };

        let (result, ()) = tokio::join!(turn, print);
        if let Err(e) = result {
            error!("Turn failed: {}", e);
        }
    }

    Ok(())
}
