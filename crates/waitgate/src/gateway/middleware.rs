// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-fingerprint rate limiting applied uniformly to every client-facing
//! route, grounded on the teacher's `transport::auth::auth_layer` shape
//! (an `axum::middleware::from_fn_with_state` wrapping `next.run`).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::WaitError;

use super::auth::fingerprint_of;
use super::state::GatewayState;

/// Checks and consumes one unit of the caller's per-fingerprint budget,
/// attaching `x-ratelimit-{limit,remaining,reset}` headers to every response
/// (spec §6 "Rate-limit headers on every response") whether or not the
/// request was allowed through.
pub async fn rate_limit_layer(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let fingerprint = fingerprint_of(&state.fingerprint_salt, req.headers(), peer);
    let decision = state.limiter.check(&fingerprint);

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        let (status, body) =
            WaitError::RateLimited.to_http_response("rate limit exceeded", uuid::Uuid::new_v4().to_string());
        (status, body).into_response()
    };

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", header_value(decision.limit));
    headers.insert("x-ratelimit-remaining", header_value(decision.remaining));
    headers.insert("x-ratelimit-reset", header_value(decision.reset_unix_secs));
    response
}

fn header_value(n: impl std::fmt::Display) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}
