//! HTTP + WebSocket server: wires the pipeline together and exposes the
//! control API alongside the client audio channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::routing::{delete, get, put};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::attention::{AttentionConfig, AttentionEngine};
use crate::config::Config;
use crate::connection::ws::audio_ws_handler;
use crate::connection::ConnectionHub;
use crate::dispatcher::Dispatcher;
use crate::http;
use crate::llm::LlmClient;
use crate::pipeline::{FrameRouter, TranscriptRouter};
use crate::resilience::{CircuitBreakerConfig, Resilience};
use crate::transcription::stt_client::WebSocketSttTransport;
use crate::transcription::TranscriptionBridge;
use crate::voice_filter::VoiceFilter;

/// Shared application state, cheap to clone (every field is an `Arc` or
/// `Instant`).
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<RwLock<Config>>,
    pub config_path: PathBuf,
    pub hub: Arc<ConnectionHub>,
    pub voice_filter: Arc<VoiceFilter>,
    pub attention: Arc<AttentionEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub transcription: Arc<TranscriptionBridge>,
    pub resilience: Arc<Resilience>,
    pub started_at: Instant,
}

impl ServerState {
    /// Re-applies a full configuration replacement to every component.
    pub async fn apply_config(&self, config: &Config) {
        self.voice_filter.set_sensitivity(config.sensitivity).await;
        self.attention.set_sensitivity(config.sensitivity).await;
        self.dispatcher.set_sensitivity(config.sensitivity).await;
        self.dispatcher.set_silence_timeout_ms(config.silence_timeout_ms).await;
        self.attention.set_user_name(config.user_name.clone()).await;
        if config.llm_enabled {
            self.attention.enable_llm().await;
        } else {
            self.attention.disable_llm().await;
        }
        self.transcription.set_api_key(config.stt_api_key.clone()).await;
    }
}

/// Builds the full pipeline from `config` and returns the shared state plus
/// the assembled router. Wiring order matters: the hub and bridge are built
/// first (referencing only each other's already-constructed `Arc`s), and
/// the hub's frame sink is attached last to avoid a construction cycle.
pub async fn build(config: Config, config_path: PathBuf) -> Result<ServerState> {
    let resilience = Resilience::new(CircuitBreakerConfig::default());
    let voice_filter = Arc::new(VoiceFilter::new(config.sensitivity));
    let hub = ConnectionHub::new();

    let llm_client = if config.llm_enabled {
        Some(LlmClient::new(config.llm_endpoint.clone(), config.llm_model.clone()))
    } else {
        None
    };
    let attention = Arc::new(AttentionEngine::new(
        config.attention_keywords.iter().cloned().collect(),
        AttentionConfig {
            sensitivity: config.sensitivity,
            uncertainty_threshold: 0.5,
            llm_enabled: config.llm_enabled,
        },
        llm_client,
        resilience.clone(),
    ));
    attention.set_user_name(config.user_name.clone()).await;

    let dispatcher = Dispatcher::new(config.sensitivity, config.silence_timeout_ms, hub.clone());

    let transport = Arc::new(WebSocketSttTransport::new(
        "wss://api.deepgram.com/v1/listen".to_string(),
    ));
    let transcript_sink = Arc::new(TranscriptRouter {
        hub: hub.clone(),
        attention: attention.clone(),
        dispatcher: dispatcher.clone(),
    });
    let transcription = TranscriptionBridge::new(transport, transcript_sink, resilience.clone());
    transcription.set_api_key(config.stt_api_key.clone()).await;

    let frame_router = Arc::new(FrameRouter {
        voice_filter: voice_filter.clone(),
        transcription: transcription.clone(),
    });
    hub.set_frame_sink(frame_router).await;

    Ok(ServerState {
        config: Arc::new(RwLock::new(config)),
        config_path,
        hub,
        voice_filter,
        attention,
        dispatcher,
        transcription,
        resilience,
        started_at: Instant::now(),
    })
}

/// The JSON control API: `/health`, `/config`, `/profiles`, `/errors`.
pub fn control_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/config", get(http::get_config).put(http::put_config))
        .route("/config/sensitivity", put(http::put_sensitivity))
        .route("/config/keywords", axum::routing::post(http::post_keyword))
        .route("/profiles", get(http::list_profiles))
        .route("/profiles/{id}", delete(http::delete_profile))
        .route("/errors", get(http::errors))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The client audio/control WebSocket, kept on its own port per the
/// documented `WS_PORT` override so it can be placed behind a different
/// network policy than the control API.
pub fn audio_router(state: ServerState) -> Router {
    Router::new()
        .route("/audio", get(audio_ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds both listeners and runs until either exits. Failing to bind either
/// port is the one fatal startup condition; all steady-state errors are
/// recoverable and handled within their owning component.
pub async fn run(config: Config, config_path: PathBuf) -> Result<()> {
    let (control_port, ws_port) = (config.port, config.ws_port);
    let state = build(config, config_path).await?;

    let control_addr = format!("0.0.0.0:{control_port}");
    let control_listener = tokio::net::TcpListener::bind(&control_addr)
        .await
        .with_context(|| format!("failed to bind control API on {control_addr}"))?;

    let ws_addr = format!("0.0.0.0:{ws_port}");
    let ws_listener = tokio::net::TcpListener::bind(&ws_addr)
        .await
        .with_context(|| format!("failed to bind audio websocket on {ws_addr}"))?;

    info!(%control_addr, %ws_addr, "earshot server listening");

    let control_app = control_router(state.clone());
    let ws_app = audio_router(state);

    tokio::select! {
        result = axum::serve(control_listener, control_app) => {
            result.context("control API server loop exited with an error")?;
        }
        result = axum::serve(ws_listener, ws_app) => {
            result.context("audio websocket server loop exited with an error")?;
        }
    }
    Ok(())
}
