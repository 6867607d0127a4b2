//! HTTP surface (component K): the four routes from spec.md §6, wired on
//! top of the store/intake/pipeline types built elsewhere in this crate.

mod documents;
mod findings;
mod runs;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::ResultCache;
use crate::config::Config;
use crate::intake::ReviewIntake;
use crate::store::ReviewStore;

/// Shared application state handed to every handler via `axum::State`.
pub struct AppState {
    pub store: ReviewStore,
    pub intake: ReviewIntake,
    pub cache: ResultCache,
    pub config: Arc<Config>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let v1 = Router::new()
        .route("/documents/upload", post(documents::upload_document))
        .route("/review/run", post(runs::create_review_run))
        .route("/review-runs/{run_id}", get(runs::get_review_run))
        .route("/documents/{document_id}/findings", get(findings::list_document_findings));

    Router::new()
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on `bind`, serving until the process is killed.
pub async fn serve(bind: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
