//! Main Entrypoint for the Narra Interviewer Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Opening the progress store (a JSON file, or PostgreSQL with migrations).
//! 3. Building the interview orchestrator and the chat fallback.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use narra_core::{
    chat::OpenAIChatResponder,
    coordinator::CoordinatorConfig,
    orchestrator::InterviewOrchestrator,
    progress::{JsonFileProgressStore, ProgressStore},
    transcript::HttpTranscriptLog,
};
use narra_interviewer::{
    config::{Config, ProgressBackend},
    db::PgProgressStore,
    realtime::OpenAiRealtimeModel,
    router::create_router,
    state::AppState,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

async fn open_store(backend: &ProgressBackend) -> anyhow::Result<Arc<dyn ProgressStore>> {
    match backend {
        ProgressBackend::JsonFile(path) => {
            info!(path = %path, "Using JSON file progress store.");
            Ok(Arc::new(JsonFileProgressStore::new(path)))
        }
        ProgressBackend::Postgres(url) => {
            let pool = PgPool::connect(url)
                .await
                .context("Failed to connect to database")?;
            let store = PgProgressStore::new(pool);
            store.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Open the Progress Store ---
    let store = open_store(&config.progress_backend).await?;

    // --- 4. Initialize Shared Services ---
    let model = Arc::new(OpenAiRealtimeModel::new(
        config.openai_api_key.clone(),
        config.realtime_model.clone(),
        config.realtime_voice.clone(),
    ));
    let coordinator_config = CoordinatorConfig {
        audio_track_timeout: config.audio_track_timeout,
        mark_policy: config.mark_policy,
        ..CoordinatorConfig::default()
    };
    let mut orchestrator = InterviewOrchestrator::new(store, model).with_config(coordinator_config);
    if let Some(url) = &config.transcript_api_url {
        info!(url = %url, "Logging transcripts to the transcript service.");
        let transcripts =
            HttpTranscriptLog::new(url.clone()).context("Failed to build transcript client")?;
        orchestrator = orchestrator.with_transcripts(Arc::new(transcripts));
    }

    let openai_config = OpenAIConfig::new().with_api_key(&config.openai_api_key);
    let chat = Arc::new(OpenAIChatResponder::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let app_state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        chat,
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        realtime_model = %config.realtime_model,
        chat_model = %config.chat_model,
        mark_policy = ?config.mark_policy,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
