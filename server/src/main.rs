use anyhow::Result;
use axum::Router;
use clap::Parser;
use search_core::{Config, DocumentStore, Searcher, Tokenizer};
use server::build_app;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// JSON config file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 5000)]
    port: u16,
}

/// Connect, hydrate and tokenize the corpus. Blocking: the store client is synchronous.
fn load_searcher(config_path: Option<PathBuf>) -> Result<Searcher> {
    let config = Config::load_or_default(config_path.as_deref())?;
    let tokenizer = Arc::new(Tokenizer::new(&config.tokenizer)?);
    let mut store = DocumentStore::connect(&config.store)?;
    tracing::info!(mode = ?store.mode(), "store ready");
    let searcher = Searcher::from_store(&mut store, tokenizer, config.search);
    store.close();
    searcher.warm();
    Ok(searcher)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config_path = args.config.clone();
    let searcher = tokio::task::spawn_blocking(move || load_searcher(config_path)).await??;
    tracing::info!(documents = searcher.len(), algorithm = %searcher.algorithm(), "searcher ready");
    let app: Router = build_app(Arc::new(searcher));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
