//! HTTP server

use crate::error::ApiError;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    routing::{get, post},
};
use sandpit_core::Sandbox;
use sandpit_core::protocol::{ExecuteRequest, ExecuteResponse, LanguageInfo};
use serde_json::{Value, json};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    sandbox: Sandbox,
}

/// Build the application router
pub fn router(sandbox: Sandbox, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/languages", get(languages))
        .route("/api/execute", post(execute))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { sandbox })
}

/// Serve until `shutdown` resolves, then let in-flight requests finish
pub async fn run(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = state.sandbox.status();
    Json(json!({
        "status": "ok",
        "inFlight": status.in_flight,
        "maxConcurrent": status.max_concurrent,
    }))
}

async fn languages(State(state): State<AppState>) -> Json<Value> {
    let languages: Vec<LanguageInfo> = state
        .sandbox
        .registry()
        .recipes()
        .map(LanguageInfo::from)
        .collect();
    Json(json!({ "languages": languages }))
}

async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(request) = payload?;
    let outcome = state.sandbox.execute(request).await?;
    Ok(Json(ExecuteResponse {
        run: outcome.report(),
    }))
}
