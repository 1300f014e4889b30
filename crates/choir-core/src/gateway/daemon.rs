//! Gateway server: router assembly and serving.

use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, patch, post},
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use super::SharedState;
use super::routes;
use super::ws::ws_handler;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("gateway server error: {0}")]
    Serve(std::io::Error),
}

/// Assemble the control-surface router.
pub fn router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.gateway.cors_origins);
    Router::new()
        .route("/health", get(routes::health))
        .route("/work_item", post(routes::upsert_work_item))
        .route("/work_item/{id}", get(routes::get_work_item))
        .route("/work_items", get(routes::list_work_items))
        .route("/run", post(routes::create_run))
        .route("/run/{id}", patch(routes::update_run).get(routes::get_run))
        .route("/runs", get(routes::list_runs))
        .route("/run/{id}/note", post(routes::add_run_note))
        .route("/run/{id}/verify", post(routes::add_run_verification))
        .route("/run/{id}/commit_request", post(routes::add_commit_request))
        .route("/state/ahdb", get(routes::ahdb_state))
        .route("/git/status", get(routes::git_status))
        .route("/git/log", get(routes::git_log))
        .route("/git/checkpoint", post(routes::git_checkpoint))
        .route("/git/revert", post(routes::git_revert))
        .route("/git/last_good", get(routes::git_last_good))
        .route("/git/rollback", post(routes::git_rollback))
        .route("/sandbox/create", post(routes::sandbox_create))
        .route("/sandbox/destroy", post(routes::sandbox_destroy))
        .route("/sandbox/exec", post(routes::sandbox_exec))
        .route("/sandbox/checkpoint", post(routes::sandbox_checkpoint))
        .route("/sandbox/restore", post(routes::sandbox_restore))
        .route("/sandbox/proxy", post(routes::sandbox_proxy))
        .route("/sandbox/process/stop", post(routes::sandbox_process_stop))
        .route("/projections/rebuild", post(routes::rebuild_projections))
        .route("/undo", post(routes::undo))
        .route("/agent", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS from configured origins; `*` means any origin without credentials.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

/// Bind and serve the gateway. Blocks until the server shuts down.
pub async fn serve(state: SharedState) -> Result<(), GatewayError> {
    let addr = state.config.gateway.bind.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Bind {
            addr: addr.clone(),
            source: e,
        })?;
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or(addr);
    tracing::info!(addr = %local, "gateway listening");

    axum::serve(listener, router(state))
        .await
        .map_err(GatewayError::Serve)
}
