//! API route definitions

use crate::session::Session;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
    /// Body cap for the multipart upload routes
    pub max_upload_bytes: usize,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Wallet
        .route("/wallet", get(handlers::get_wallet))
        .route("/wallet/connect", post(handlers::connect_wallet))
        .route("/wallet/disconnect", post(handlers::disconnect_wallet))
        // Vault and verification
        .route("/assets", get(handlers::list_assets))
        .route("/vault", post(handlers::vault_asset).layer(upload_limit.clone()))
        .route("/vault/state", get(handlers::vault_state))
        .route("/vault/events", get(handlers::vault_events))
        .route("/verify", post(handlers::verify_hash))
        // Marketplace
        .route(
            "/models",
            get(handlers::list_models).post(handlers::create_listing).layer(upload_limit),
        )
        .route("/models/{hash}/access", get(handlers::model_access))
        .route("/models/{hash}/rent", post(handlers::rent_model))
        .route("/models/{hash}/chat", post(handlers::chat))
        .route("/models/{hash}/transcript", get(handlers::transcript))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
