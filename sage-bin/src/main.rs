use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sage_affect::{EmotionClassifier, StubClassifier, TransformerClassifier};
use sage_config::ConfigLoader;
use sage_server::AppState;
use sage_store::DocumentStore;

#[derive(Parser)]
#[command(name = "sage", version, about = "Emotion-aware adaptive learning server")]
struct Cli {
    /// Path to sage.toml (defaults to $SAGE_CONFIG or ~/.sage/sage.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip loading the transformer emotion model (degraded neutral
    /// emotion results; useful for local development).
    #[arg(long)]
    no_emotion_model: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loader = ConfigLoader::load(cli.config.as_deref())?;
    let config = loader.get();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    match config.logging.format.as_str() {
        "json" => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        "compact" => tracing_subscriber::fmt().with_env_filter(filter).compact().init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    info!(config = %loader.path().display(), "sage starting");

    let store = Arc::new(
        DocumentStore::open(&config.store.db_path).context("failed to open document store")?,
    );

    // The transformer download/load is blocking I/O plus mmap; keep it off
    // the runtime threads.
    let classifier: Arc<dyn EmotionClassifier> = if cli.no_emotion_model {
        warn!("emotion model disabled, all results will be degraded-neutral");
        Arc::new(StubClassifier::failing())
    } else {
        let repo = config.emotion.model_repo.clone();
        match tokio::task::spawn_blocking(move || TransformerClassifier::from_hub(&repo)).await? {
            Ok(model) => {
                info!(repo = %config.emotion.model_repo, "emotion classifier loaded");
                Arc::new(model)
            }
            Err(e) => {
                warn!(error = %e, "emotion model unavailable, degrading to neutral results");
                Arc::new(StubClassifier::failing())
            }
        }
    };

    let context = sage_engine::build_engine(&config, Arc::clone(&store), classifier)?;

    let shutdown = CancellationToken::new();

    // Periodic benchmark refresh, when a feed is configured.
    let mut refresh_task = None;
    if let Some(feed_url) = config.benchmarks.feed_url.clone() {
        refresh_task = Some(context.benchmarks.spawn_refresh_loop(
            feed_url,
            Some(Arc::clone(&store)),
            Duration::from_secs(config.benchmarks.refresh_interval_secs),
            Duration::from_secs(config.benchmarks.backoff_max_secs),
            shutdown.clone(),
        ));
    }

    let state = Arc::new(AppState::new(
        Arc::clone(&context.engine),
        Arc::clone(&context.health),
    ));

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = sage_server::serve(&config.server.listen, state, server_shutdown).await {
            warn!(error = %e, "server exited with error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let grace = Duration::from_secs(loader.get().server.shutdown_grace_secs);
    context.engine.shutdown(grace).await;
    shutdown.cancel();

    // Persist final health snapshots for the next boot.
    for provider in context.health.providers() {
        let snap = context.health.snapshot(&provider);
        if let Err(e) = store.put_provider_health(&provider, &snap) {
            warn!(provider, error = %e, "failed to persist provider health");
        }
    }

    let _ = server.await;
    if let Some(task) = refresh_task {
        task.abort();
    }
    info!("sage stopped");
    Ok(())
}
