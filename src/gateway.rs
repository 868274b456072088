use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::sync::{Schedule, Session};

#[derive(Clone)]
pub struct AppState {
    pub session: Session,
    pub schedule: Arc<Schedule>,
}

pub async fn health() -> &'static str {
    "ok"
}

/// Pop the newest refresher status, or 204 when there is none.
pub async fn refresher_status(State(state): State<AppState>) -> Response {
    match state.session.refresher.get(false) {
        Some(msg) => Json(msg).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Pop the newest validator note, or 204 when there is none.
pub async fn validator_status(State(state): State<AppState>) -> Response {
    match state.session.validator.get(false) {
        Some(msg) => Json(msg).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn refresh_now(State(state): State<AppState>) -> StatusCode {
    state.schedule.wake();
    StatusCode::ACCEPTED
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status/refresher", get(refresher_status))
        .route("/v1/status/validator", get(validator_status))
        .route("/v1/refresh", post(refresh_now))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(64))
}

/// Serve the status gateway on `addr` until `shutdown` resolves.
///
/// # Errors
/// Returns an error when the listener fails to bind or the server terminates unexpectedly.
pub async fn run<F>(addr: &str, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("status gateway listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
