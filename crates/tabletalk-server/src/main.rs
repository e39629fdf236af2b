use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tabletalk_core::{ChatEngine, EngineOptions, IngestPipeline, SessionStore};
use tabletalk_memory::{
    ContextStore, EmbeddingProvider, GeminiEmbeddingProvider, StoreHandle, StubEmbeddingProvider,
};
use tabletalk_provider::{GeminiProvider, LlmProvider, StubProvider};
use tabletalk_server::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "tabletalk-server", about = "Conversational interface over ingested tabular data")]
struct Args {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0:8000")]
    addr: String,

    /// Path to the sqlite document database.
    #[arg(long, default_value = "./data/tabletalk.db")]
    db_path: String,

    /// Google AI API key. Without it the server refuses to start unless
    /// --stub is passed.
    #[arg(long, env = "GOOGLE_API_KEY")]
    google_api_key: Option<String>,

    /// Chat model identifier.
    #[arg(long, default_value = "gemini-2.0-flash")]
    chat_model: String,

    /// Embedding model identifier.
    #[arg(long, default_value = "gemini-embedding-001")]
    embedding_model: String,

    /// Embedding vector width.
    #[arg(long, default_value_t = 768)]
    embedding_dimensions: usize,

    /// Run with offline stub providers instead of the Gemini API.
    #[arg(long)]
    stub: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let (provider, embedder): (Arc<dyn LlmProvider>, Arc<dyn EmbeddingProvider>) = if args.stub {
        tracing::warn!("running with stub providers, answers are canned");
        (
            Arc::new(StubProvider),
            Arc::new(StubEmbeddingProvider::new(args.embedding_dimensions)),
        )
    } else {
        let api_key = args.google_api_key.clone().ok_or_else(|| {
            anyhow::anyhow!("GOOGLE_API_KEY is required unless --stub is passed")
        })?;
        (
            Arc::new(GeminiProvider::new(api_key.clone())),
            Arc::new(
                GeminiEmbeddingProvider::new(api_key)
                    .with_model(args.embedding_model.clone(), args.embedding_dimensions),
            ),
        )
    };

    let handle = StoreHandle::new(args.db_path.clone(), embedder);
    let store: Arc<dyn ContextStore> = handle.get().await?;

    let sessions = Arc::new(SessionStore::new());
    let engine = Arc::new(ChatEngine::new(
        Arc::clone(&store),
        provider,
        sessions,
        EngineOptions {
            model: args.chat_model.clone(),
            max_tokens: 2048,
        },
    ));
    let pipeline = Arc::new(IngestPipeline::new(store));

    tabletalk_server::serve(AppState { engine, pipeline }, &args.addr).await
}
