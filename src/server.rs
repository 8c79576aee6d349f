use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::agents::ResearchCrew;
use crate::config::RuntimeConfig;
use crate::error::redact_credentials;

pub const SERVER_AUTH_TOKEN_ENV: &str = "DEEP_RESEARCHER_SERVER_AUTH_TOKEN";

#[derive(Clone)]
pub struct ServerState {
    pub crew: ResearchCrew,
    pub cfg: RuntimeConfig,
    pub auth_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServerHealthResponse {
    pub status: &'static str,
    pub profile: String,
}

#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StageSummary {
    pub role: String,
    pub elapsed_ms: u128,
    pub output_chars: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub answer: String,
    pub stages: Vec<StageSummary>,
    pub elapsed_ms: u128,
}

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn check_server_auth(
    state: &ServerState,
    headers: &axum::http::HeaderMap,
) -> Result<(), ApiError> {
    let Some(expected_token) = state.auth_token.as_deref() else {
        return Ok(()); // no token configured, auth disabled
    };

    let header_value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let provided_token = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();

    if provided_token.is_empty() || provided_token != expected_token {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "missing or invalid Authorization bearer token",
        ));
    }

    Ok(())
}

pub async fn handle_server_health(
    State(state): State<Arc<ServerState>>,
) -> Json<ServerHealthResponse> {
    Json(ServerHealthResponse {
        status: "ok",
        profile: state.cfg.profile.clone(),
    })
}

pub async fn handle_server_research(
    State(state): State<Arc<ServerState>>,
    headers: axum::http::HeaderMap,
    Json(request): Json<ResearchRequest>,
) -> ApiResult<ResearchResponse> {
    check_server_auth(&state, &headers)?;
    let started_at = Instant::now();

    let query = state
        .crew
        .validate_query(&request.query)
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, err.to_string()))?;

    let outcome = state.crew.kickoff(query).await.map_err(|err| {
        tracing::error!(error = %format!("{err:#}"), "research request failed");
        api_error(
            StatusCode::BAD_GATEWAY,
            redact_credentials(&format!("{err:#}"), &state.cfg.credentials),
        )
    })?;

    let elapsed_ms = started_at.elapsed().as_millis();
    tracing::info!(elapsed_ms, stages = outcome.records.len(), "research request completed");

    Ok(Json(ResearchResponse {
        stages: outcome
            .records
            .iter()
            .map(|record| StageSummary {
                role: record.role.clone(),
                elapsed_ms: record.elapsed_ms,
                output_chars: record.output.chars().count(),
            })
            .collect(),
        answer: outcome.output,
        elapsed_ms,
    }))
}

pub fn build_server_router(state: Arc<ServerState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(handle_server_health))
        .route("/v1/research", post(handle_server_research))
        .with_state(state)
}

pub fn server_auth_token_from_env() -> Option<String> {
    std::env::var(SERVER_AUTH_TOKEN_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn run_server(cfg: RuntimeConfig, host: String, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server bind address '{}:{}'", host, port))?;
    // Fail at startup, not on the first request, when the model is misconfigured.
    let crew = ResearchCrew::from_config(&cfg)?;
    let auth_token = server_auth_token_from_env();
    if auth_token.is_none() {
        tracing::warn!("{SERVER_AUTH_TOKEN_ENV} is not set; research endpoint is unauthenticated");
    }
    let state = Arc::new(ServerState {
        crew,
        cfg: cfg.clone(),
        auth_token,
    });

    tracing::info!(%addr, profile = %cfg.profile, "server starting");
    println!(
        "Server mode listening on http://{} (health: /healthz, research: /v1/research)",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server listener")?;
    axum::serve(listener, build_server_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failed")
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { println!("\nReceived Ctrl+C, shutting down gracefully..."); }
        _ = terminate => { println!("\nReceived SIGTERM, shutting down gracefully..."); }
    }
}
