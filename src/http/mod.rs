//! HTTP control API: health, configuration, voice profiles and error
//! introspection. Mirrors the client-facing JSON shape used elsewhere:
//! errors return `4xx` with `{error: string}`, success responses carry
//! `{success: true, ...}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::server::ServerState;

pub async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();
    let active_connections = state.hub.active_count().await;
    Json(json!({
        "status": "ok",
        "uptimeSeconds": uptime_secs,
        "activeConnections": active_connections,
    }))
}

pub async fn get_config(State(state): State<ServerState>) -> impl IntoResponse {
    let config = state.config.read().await.clone();
    Json(config)
}

pub async fn put_config(
    State(state): State<ServerState>,
    Json(new_config): Json<crate::config::Config>,
) -> impl IntoResponse {
    {
        let mut config = state.config.write().await;
        *config = new_config.clone();
    }
    state.apply_config(&new_config).await;
    if let Err(err) = new_config.save(&state.config_path) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
    }
    (StatusCode::OK, Json(json!({"success": true}))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SensitivityBody {
    pub level: f32,
}

pub async fn put_sensitivity(
    State(state): State<ServerState>,
    Json(body): Json<SensitivityBody>,
) -> impl IntoResponse {
    if !(0.0..=1.0).contains(&body.level) {
        return error_response(StatusCode::BAD_REQUEST, "level must be within [0,1]");
    }
    {
        let mut config = state.config.write().await;
        config.sensitivity = body.level;
    }
    state.voice_filter.set_sensitivity(body.level).await;
    state.attention.set_sensitivity(body.level).await;
    state.dispatcher.set_sensitivity(body.level).await;
    (StatusCode::OK, Json(json!({"success": true}))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct KeywordBody {
    pub keyword: String,
}

pub async fn post_keyword(
    State(state): State<ServerState>,
    Json(body): Json<KeywordBody>,
) -> impl IntoResponse {
    if body.keyword.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "keyword must not be empty");
    }
    state.attention.add_keyword(body.keyword.clone()).await;
    {
        let mut config = state.config.write().await;
        config.attention_keywords.insert(body.keyword.trim().to_lowercase());
    }
    (StatusCode::OK, Json(json!({"success": true}))).into_response()
}

pub async fn list_profiles(State(state): State<ServerState>) -> impl IntoResponse {
    let profiles = state.voice_filter.list().await;
    Json(json!({ "profiles": profiles }))
}

pub async fn delete_profile(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.voice_filter.remove(&id).await {
        (StatusCode::OK, Json(json!({"success": true}))).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "profile not found")
    }
}

pub async fn errors(State(state): State<ServerState>) -> impl IntoResponse {
    let failures = state.resilience.failure_snapshots().await;
    let circuits = state.resilience.circuit_states().await;
    Json(json!({
        "failureCounters": failures,
        "circuitBreakers": circuits.into_iter().map(|(name, cb_state)| json!({
            "operation": name,
            "state": cb_state,
        })).collect::<Vec<_>>(),
    }))
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(json!({ "error": message }))).into_response()
}
