use adventure_art::pipeline::{self, Coordinator, EnvironmentTextFilter, Services};
use adventure_art::services::OpenAiClient;
use adventure_art::{
    Broadcaster, CharacterStore, Config, ContextStore, ImageCache, SessionHistory,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "adventure-art", about = "Live session scene illustration server")]
struct Args {
    /// Path to the configuration file (without extension)
    #[arg(short, long, default_value = "config/adventure-art")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Data dir: {}", cfg.storage.data_dir.display());
    info!("History dir: {}", cfg.storage.history_dir.display());

    let context = Arc::new(ContextStore::open(&cfg.storage.data_dir)?);
    let cache = Arc::new(ImageCache::open(
        cfg.storage.cache_dir(),
        cfg.pipeline.cache_capacity,
    )?);
    let history = Arc::new(SessionHistory::open(cfg.storage.history_dir.clone())?);
    let characters = Arc::new(CharacterStore::open(
        cfg.storage.data_dir.join("characters.json"),
    )?);
    let broadcaster = Broadcaster::default();

    // The session is started explicitly here rather than lazily on first use.
    let session_id = history.ensure_session().await?;
    info!("Current session: {}", session_id);

    let openai = Arc::new(
        OpenAiClient::from_env(cfg.openai.clone())
            .context("OPENAI_API_KEY must be set")?,
    );
    let services = Services {
        transcriber: openai.clone(),
        analyzer: openai.clone(),
        composer: openai.clone(),
        image_generator: openai,
    };

    let coordinator = Coordinator::new(
        context.clone(),
        cache.clone(),
        history.clone(),
        characters.clone(),
        broadcaster.clone(),
        services,
        Arc::new(EnvironmentTextFilter::default()),
        cfg.pipeline.clone(),
    );

    let pipeline = pipeline::spawn(
        coordinator,
        cfg.pipeline.queue_depth,
        cfg.pipeline.max_upload_bytes,
    );

    let state = adventure_art::AppState {
        context,
        cache,
        history,
        characters,
        broadcaster,
        pipeline,
        max_upload_bytes: cfg.pipeline.max_upload_bytes,
    };

    let router = adventure_art::create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, router).await?;

    Ok(())
}
