//! voxline server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use voxline_asr::DeepgramRecognizer;
use voxline_config::{load_settings, Settings};
use voxline_core::SystemServices;
use voxline_llm::GeminiChat;
use voxline_records::{BufferedCallLog, SupabaseRecords};
use voxline_server::{create_router, init_metrics, AppState, HealthProbes, SignalWireClient};
use voxline_store::{InMemorySessionStore, RedisSessionStore};
use voxline_tts::ElevenLabsSynthesizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
    let env = std::env::var("VOXLINE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized, use eprintln for early logging.
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), environment = ?settings.environment,
        "starting voxline");

    let settings = Arc::new(settings);

    // External collaborators. Each client is shared by all sessions.
    let recognizer = Arc::new(DeepgramRecognizer::new(settings.asr.clone()));
    let chat = Arc::new(GeminiChat::new(settings.llm.clone()));
    let synthesizer = Arc::new(ElevenLabsSynthesizer::new(settings.tts.clone()));

    let store: Arc<dyn voxline_core::SessionStore> = if settings.store.enabled {
        match RedisSessionStore::connect(&settings.store.redis_url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(error = %e,
                    "session store unreachable, degrading to in-memory state");
                Arc::new(InMemorySessionStore::new())
            }
        }
    } else {
        tracing::info!("session store disabled, using in-memory state");
        Arc::new(InMemorySessionStore::new())
    };

    let records = Arc::new(SupabaseRecords::new(settings.records.clone()));
    let call_log = BufferedCallLog::new(records.clone(), settings.records.retry_queue_max);

    let services = SystemServices {
        recognizer: recognizer.clone(),
        chat: chat.clone(),
        synthesizer: synthesizer.clone(),
        store,
        call_log,
    };

    let probes = HealthProbes {
        asr: recognizer,
        llm: chat,
        tts: synthesizer,
    };

    let metrics = init_metrics();
    let telephony = Arc::new(SignalWireClient::new(settings.telephony.clone()));
    let state = AppState::new(settings.clone(), services, records, telephony, probes, metrics);

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("voxline={},tower_http=info", settings.server.log_level).into());

    let fmt_layer = if settings.server.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
