// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request gateway (spec §2 component G): maps request verbs to core
//! operations and rate-limits per client fingerprint.

pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod state;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use rate_limit::FingerprintLimiter;
pub use state::GatewayState;

/// Build the axum `Router` with every route in spec §6's HTTP surface.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/queues/{q}/enqueue", post(handlers::enqueue))
        .route("/queues/{q}/status", get(handlers::status))
        .route("/queues/{q}/heartbeat", post(handlers::heartbeat))
        .route("/queues/{q}/position", delete(handlers::cancel_position))
        .route("/sessions/{s}", get(handlers::session_info))
        .route("/sessions/{s}/activity", post(handlers::session_activity))
        .route("/admin/queues", post(handlers::create_queue))
        .route("/admin/queues/{q}", patch(handlers::update_queue))
        .route("/admin/queues/{q}/stats", get(handlers::queue_stats))
        .route("/admin/sessions/{s}", delete(handlers::terminate_session))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
