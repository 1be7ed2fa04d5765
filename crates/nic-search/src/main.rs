mod api;
mod cache;
mod catalog;
mod config;
mod error;
mod language;
mod model;
mod recording;
mod search;
mod server;
mod system_info;
mod update;
mod wav;

#[cfg(test)]
mod testing;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nic_common::embedding::{Embedder, TextEmbedder};
use nic_common::redis::RedisCache;
use nic_common::transcribe::TranscriptionClient;
use nic_common::vectordb::VectorDb;

use cache::{EmbeddingCache, SearchCache};
use config::Config;
use error::AppError;
use language::{Language, LanguageSelector};
use recording::RecordingService;
use search::SearchEngine;
use server::AppState;
use update::IndexService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting nic-search server");

    // 1. Load config from environment (and .env, when present)
    if let Ok(path) = dotenvy::dotenv() {
        info!(path = %path.display(), "loaded .env file");
    }
    let config = Config::from_env()?;
    info!(
        lancedb_path = %config.lancedb_path,
        languages = ?config.languages().collect::<Vec<_>>(),
        listen_addr = %config.listen_addr,
        redis = config.redis_url.is_some(),
        transcription = config.transcribe.is_some(),
        server_env = %config.server_env,
        "configuration loaded"
    );

    // 2. Connect to Redis (optional, graceful degradation if unavailable)
    let redis = RedisCache::new(config.redis_url.as_deref());
    if redis.is_available().await {
        info!("redis connected");
    } else {
        info!("redis unavailable, running without cache");
    }
    let cache = Arc::new(SearchCache::new(redis.clone()));
    let capacity = NonZeroUsize::new(config.embedding_cache_capacity)
        .ok_or_else(|| AppError::Config("embedding cache capacity must be positive".to_string()))?;
    let embedding_cache = Arc::new(EmbeddingCache::new(capacity, redis.clone()));

    // 3. Initialize one embedding model per configured language
    let mut embedders: HashMap<Language, Arc<dyn TextEmbedder>> = HashMap::new();
    for language in config.languages() {
        let kind = language.embedding_model();
        info!(
            language = %language,
            model = kind.name(),
            "initializing embedding model (may download on first run)"
        );
        embedders.insert(language, Arc::new(Embedder::new(kind).await?));
    }
    info!("embedding models ready");

    // 4. Connect to LanceDB
    let vectordb = Arc::new(VectorDb::connect(&config.lancedb_path).await?);
    info!("lancedb connected");

    // 5. Index each language if its table is missing or its catalog changed
    let engine = Arc::new(SearchEngine::new(
        vectordb,
        embedders,
        embedding_cache,
        Arc::clone(&cache),
    ));
    let indexer = Arc::new(IndexService::new(
        config.catalogs.clone(),
        Arc::clone(&engine),
        cache,
    ));
    for language in config.languages() {
        match indexer.prepare(language).await {
            Ok(records) => info!(language = %language, records, "index ready"),
            Err(e) => error!(language = %language, error = %e, "index unavailable"),
        }
    }
    if !engine.is_ready(Language::default()).await {
        warn!(
            language = %Language::default(),
            "default language has no index, searches will fail until rebuilt"
        );
    }

    // 6. Restore language preference and set up the recorder
    let languages = Arc::new(LanguageSelector::new(redis));
    languages.restore().await;

    let transcriber = match config.transcribe.clone() {
        Some(transcribe_config) => Some(TranscriptionClient::new(transcribe_config).map_err(
            |e| AppError::Config(format!("failed to build transcription client: {e}")),
        )?),
        None => {
            info!("TRANSCRIBE_BASE_URL not set, recordings will not be transcribed");
            None
        }
    };
    let recording = Arc::new(RecordingService::new(
        config.recorder_command.clone(),
        config.recording_path.clone(),
        config.force_simulation(),
        transcriber,
    ));

    // 7. Serve HTTP
    let state = Arc::new(AppState {
        engine,
        indexer,
        languages,
        recording,
        server_env: config.server_env.clone(),
    });
    let app = server::router(state, config.static_dir.clone());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "HTTP server ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| error!(error = %e, "HTTP server error"))?;

    info!("HTTP server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}
