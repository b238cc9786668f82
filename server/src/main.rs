use axum::{
    extract::FromRef,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicemesh_server::{
    auth::TokenService,
    bus::BusClient,
    codegen::CodeGenerator,
    config::{Settings, SUBSCRIBE_CHANNELS},
    health::{self, HealthState},
    insights::InsightMiner,
    intent::IntentExtractor,
    mapper::{self, MappingsLoader},
    metrics,
    orchestrator::{self, BusFanout, ConnectionManager, OrchestratorState, SessionStore},
    stt::{self, engine, SttState, TranscriptionPool},
    trigger::TriggerService,
};

// Composite state; each field is extractable via FromRef.
#[derive(Clone, FromRef)]
struct AppState {
    orchestrator: OrchestratorState,
    stt: SttState,
    health: HealthState,
    loader: Arc<MappingsLoader>,
    sessions: Arc<SessionStore>,
    tokens: TokenService,
    metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Default to warn in production, debug in development
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }

        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting VoiceMesh server");

    let settings = Arc::new(Settings::from_env());
    if settings.jwt_secret_is_placeholder() {
        tracing::error!(
            "CRITICAL: JWT_SECRET_KEY is not set or is using the placeholder value. \
             Set a strong, unique secret in your .env file. The service will run, \
             but every issued token is forgeable."
        );
    }

    let metrics_recorder = metrics::MetricsRecorder::new();
    let metrics_handle = metrics_recorder.handle().clone();
    tracing::info!("Metrics initialized");

    let tokens = TokenService::new(&settings)?;

    // Mappings dictionary + hot reload
    let loader = MappingsLoader::new(&settings.mappings_file_path);
    if settings.enable_hot_reload {
        let _watcher = loader.spawn_watcher(settings.watch_interval());
        tracing::info!(
            path = %settings.mappings_file_path.display(),
            "Mappings watcher started"
        );
    } else {
        tracing::info!("Hot reload disabled, mappings load once at startup");
    }

    // Transcription pool
    let provider = engine::provider_from_settings(&settings)?;
    let pool = TranscriptionPool::new(provider, settings.whisper_max_buffered_chunks);
    tracing::info!(
        max_in_flight = pool.max_in_flight(),
        "Transcription pool initialized"
    );

    // Connection registry + session table
    let manager = Arc::new(ConnectionManager::new());
    let sessions = Arc::new(SessionStore::new());

    // Bus clients: one per logical service, like the mesh's split deployment.
    let fanout_bus = Arc::new(BusClient::new(&settings.redis_url)?);
    let stt_bus = Arc::new(BusClient::new(&settings.redis_url)?);
    let intent_bus = Arc::new(BusClient::new(&settings.redis_url)?);
    let trigger_bus = Arc::new(BusClient::new(&settings.redis_url)?);
    let codegen_bus = Arc::new(BusClient::new(&settings.redis_url)?);
    let insights_bus = Arc::new(BusClient::new(&settings.redis_url)?);

    // Orchestrator fan-out: every subscribed channel broadcast to clients.
    let channels: Vec<String> = SUBSCRIBE_CHANNELS.iter().map(|c| c.to_string()).collect();
    let _fanout_task = fanout_bus.subscribe(channels, Arc::new(BusFanout::new(manager.clone())));
    tracing::info!(channels = ?SUBSCRIBE_CHANNELS, "Bus fan-out subscriber started");

    // Pipeline workers
    let _intent_task = IntentExtractor::spawn(intent_bus);
    let _trigger_task =
        TriggerService::spawn(trigger_bus, loader.clone(), settings.confidence_threshold);
    let _codegen_task = CodeGenerator::spawn(codegen_bus);
    let _insights_task = InsightMiner::spawn(insights_bus);
    tracing::info!("Pipeline workers started");

    let app_state = AppState {
        orchestrator: OrchestratorState {
            manager: manager.clone(),
            tokens: tokens.clone(),
            sessions: sessions.clone(),
            settings: settings.clone(),
        },
        stt: SttState {
            pool,
            bus: stt_bus,
            settings: settings.clone(),
        },
        health: HealthState {
            sessions: sessions.clone(),
            manager,
            loader: loader.clone(),
        },
        loader,
        sessions,
        tokens,
        metrics_handle,
    };

    let mut app = Router::new()
        // Orchestrator REST
        .route("/v1/healthz", get(health::healthz))
        .route("/v1/sessions", post(orchestrator::sessions::create_session))
        .route(
            "/v1/sessions/{session_id}/summary",
            get(orchestrator::sessions::get_session_summary),
        )
        .route(
            "/v1/sessions/{session_id}",
            delete(orchestrator::sessions::delete_session),
        )
        // Client and STT WebSockets
        .route("/v1/ws/{session_id}", get(orchestrator::ws::client_socket))
        .route("/v1/stream/{session_id}", get(stt::ws::stream_audio))
        // Design mapper
        .route("/v1/map", post(mapper::routes::map_design_tokens))
        .route("/v1/reload", post(mapper::routes::reload_mappings));

    // Only expose metrics when explicitly enabled
    if settings.enable_metrics {
        app = app.route("/metrics", get(metrics::metrics_handler));
        tracing::info!("Metrics endpoint enabled at /metrics");
    }

    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server_port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
