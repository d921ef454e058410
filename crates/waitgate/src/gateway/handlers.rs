// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the waiting-room gateway (spec §6, component G).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::credential::CredentialKind;
use crate::error::WaitError;
use crate::events::EventEnvelope;
use crate::model::{Priority, QueueDescriptor, QueueStatus};

use super::auth::{extract_bearer, fingerprint_of, validate_admin_key};
use super::state::GatewayState;

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn err_response(state: &GatewayState, err: WaitError, message: impl Into<String>) -> axum::response::Response {
    let _ = state;
    let (status, body) = err.to_http_response(message, request_id());
    (status, body).into_response()
}

// -- Request/response bodies --------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EnqueueRequestBody {
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponseBody {
    pub credential: String,
    pub position_id: String,
    /// 0-indexed count of strictly preceding positions.
    pub rank: u64,
    /// 1-indexed display value (`rank + 1`), the wire-facing presentation
    /// choice spec.md leaves open.
    pub position: u64,
    pub queue_length: u64,
    pub estimated_wait_secs: f64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub expires_at: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusResponseBody {
    Waiting {
        rank: u64,
        position: u64,
        queue_length: u64,
        estimated_wait_secs: f64,
    },
    Admitted {
        credential: String,
        redirect_url: String,
        expires_at: u64,
    },
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponseBody {
    #[serde(flatten)]
    pub status: StatusResponseBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshed_credential: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionInfoBody {
    pub session_id: String,
    pub queue_id: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub last_activity_at: u64,
    pub view_count: u64,
}

#[derive(Debug, Serialize)]
pub struct ActivityResponseBody {
    pub view_count: u64,
    pub last_activity_at: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateQueueBody {
    pub name: String,
    pub target_url: String,
    pub max_active: u64,
    #[serde(default)]
    pub max_size: u64,
    pub admission_rate: f64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

fn default_heartbeat_interval() -> u64 {
    5
}
fn default_heartbeat_timeout() -> u64 {
    60
}
fn default_grace_period() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct UpdateQueueBody {
    #[serde(default)]
    pub max_active: Option<u64>,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub admission_rate: Option<f64>,
    #[serde(default)]
    pub status: Option<QueueStatus>,
}

#[derive(Debug, Serialize)]
pub struct QueueStatsBody {
    pub queue_id: String,
    pub status: QueueStatus,
    pub queue_length: u64,
    pub max_active: u64,
    pub admission_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponseBody {
    pub status: &'static str,
    pub store_reachable: bool,
    pub event_bus_reachable: bool,
}

// -- Client-facing handlers ----------------------------------------------------

/// `POST /queues/{q}/enqueue`
pub async fn enqueue(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(queue_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<EnqueueRequestBody>,
) -> axum::response::Response {
    let fingerprint = fingerprint_of(&state.fingerprint_salt, &headers, peer);

    let user_agent_hash = headers.get("user-agent").and_then(|v| v.to_str().ok()).map(|ua| {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(ua.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    });

    let priority = body.priority.unwrap_or(Priority::Normal);
    let cancel = tokio_util::sync::CancellationToken::new();

    let result = match state
        .queue_engine
        .enqueue(&queue_id, priority, &fingerprint, user_agent_hash, body.metadata, &cancel)
        .await
    {
        Ok(r) => r,
        Err(err) => return err_response(&state, err, "enqueue failed"),
    };

    let Some(descriptor) = state.registry.get(&queue_id, &cancel).await.ok().flatten() else {
        return err_response(&state, WaitError::NotFound, "queue not found");
    };

    let fingerprint_hash = fingerprint.clone();
    let ttl = crate::queue::QueueRegistry::position_ttl(&descriptor);
    let credential = state.credentials.issue(CredentialKind::Waiting, &result.position_id, &queue_id, &fingerprint_hash, ttl);

    if !result.was_existing {
        state
            .publisher
            .publish(EventEnvelope::new(
                "queue.position.enqueued",
                &queue_id,
                serde_json::json!({ "position_id": result.position_id, "rank": result.rank }),
            ))
            .await;
    }

    Json(EnqueueResponseBody {
        credential,
        position_id: result.position_id,
        rank: result.rank,
        position: result.rank + 1,
        queue_length: result.queue_length,
        estimated_wait_secs: result.estimated_wait_secs,
        heartbeat_interval_secs: descriptor.heartbeat_interval_secs,
        heartbeat_timeout_secs: descriptor.heartbeat_timeout_secs,
        expires_at: now_secs() + ttl.as_secs(),
    })
    .into_response()
}

/// Resolve a position's status, minting the admitted credential lazily if
/// the position has a linked active session (spec §3 "the gateway mints the
/// admitted credential on demand").
async fn resolve_status(
    state: &GatewayState,
    queue_id: &str,
    position_id: &str,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<StatusResponseBody, WaitError> {
    if let Some(waiting) = state.queue_engine.waiting_status(queue_id, position_id, cancel).await? {
        return Ok(StatusResponseBody::Waiting {
            rank: waiting.rank,
            position: waiting.rank + 1,
            queue_length: waiting.queue_length,
            estimated_wait_secs: waiting.estimated_wait_secs,
        });
    }

    let position = state.queue_engine.get_position(position_id, cancel).await?.ok_or(WaitError::NotFound)?;
    let Some(session_id) = position.session_id else {
        return Err(WaitError::PositionExpired);
    };
    let session = state.sessions.get(&session_id, cancel).await?;
    let descriptor = state.registry.get(queue_id, cancel).await?.ok_or(WaitError::NotFound)?;
    let remaining = std::time::Duration::from_secs(session.expires_at_secs.saturating_sub(now_secs()));
    let credential =
        state.credentials.issue(CredentialKind::Admitted, &session.id, queue_id, &position.fingerprint, remaining);
    Ok(StatusResponseBody::Admitted { credential, redirect_url: descriptor.target_url, expires_at: session.expires_at_secs })
}

/// `GET /queues/{q}/status`
pub async fn status(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(queue_id): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    let cancel = tokio_util::sync::CancellationToken::new();
    let token = match extract_bearer(&headers) {
        Ok(t) => t,
        Err(err) => return err_response(&state, err, "missing waiting credential"),
    };
    let fingerprint = fingerprint_of(&state.fingerprint_salt, &headers, peer);
    let claims = match state
        .credentials
        .validate(token, CredentialKind::Waiting, &fingerprint, state.bind_fingerprint_strict, &cancel)
        .await
    {
        Ok(c) => c,
        Err(err) => return err_response(&state, err, "invalid credential"),
    };

    match resolve_status(&state, &queue_id, &claims.sub, &cancel).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => err_response(&state, err, "status lookup failed"),
    }
}

/// `POST /queues/{q}/heartbeat`
pub async fn heartbeat(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(queue_id): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    let cancel = tokio_util::sync::CancellationToken::new();
    let token = match extract_bearer(&headers) {
        Ok(t) => t,
        Err(err) => return err_response(&state, err, "missing waiting credential"),
    };
    let fingerprint = fingerprint_of(&state.fingerprint_salt, &headers, peer);
    let claims = match state
        .credentials
        .validate(token, CredentialKind::Waiting, &fingerprint, state.bind_fingerprint_strict, &cancel)
        .await
    {
        Ok(c) => c,
        Err(err) => return err_response(&state, err, "invalid credential"),
    };

    if let Err(err) = state.queue_engine.touch(&queue_id, &claims.sub, &cancel).await {
        return err_response(&state, err, "heartbeat failed");
    }

    let status_body = match resolve_status(&state, &queue_id, &claims.sub, &cancel).await {
        Ok(body) => body,
        Err(err) => return err_response(&state, err, "status lookup failed"),
    };

    // Refresh the waiting credential so its expiry tracks the renewed TTL,
    // only while still waiting (an admitted client gets a fresh credential
    // from `resolve_status` itself).
    let refreshed_credential = match &status_body {
        StatusResponseBody::Waiting { .. } => {
            let Some(descriptor) = state.registry.get(&queue_id, &cancel).await.ok().flatten() else {
                return err_response(&state, WaitError::NotFound, "queue not found");
            };
            Some(state.credentials.issue(
                CredentialKind::Waiting,
                &claims.sub,
                &queue_id,
                &claims.fingerprint_hash,
                crate::queue::QueueRegistry::position_ttl(&descriptor),
            ))
        }
        StatusResponseBody::Admitted { .. } => None,
    };

    Json(HeartbeatResponseBody { status: status_body, refreshed_credential }).into_response()
}

/// `DELETE /queues/{q}/position`
pub async fn cancel_position(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(queue_id): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    let cancel = tokio_util::sync::CancellationToken::new();
    let token = match extract_bearer(&headers) {
        Ok(t) => t,
        Err(err) => return err_response(&state, err, "missing waiting credential"),
    };
    let fingerprint = fingerprint_of(&state.fingerprint_salt, &headers, peer);
    let claims = match state
        .credentials
        .validate(token, CredentialKind::Waiting, &fingerprint, state.bind_fingerprint_strict, &cancel)
        .await
    {
        Ok(c) => c,
        Err(err) => return err_response(&state, err, "invalid credential"),
    };

    if let Err(err) = state.queue_engine.cancel(&queue_id, &claims.sub, &cancel).await {
        return err_response(&state, err, "cancel failed");
    }
    if let Err(err) = state.credentials.revoke(&claims, &cancel).await {
        tracing::warn!(?err, "failed to revoke credential after cancel");
    }

    state
        .publisher
        .publish(EventEnvelope::new(
            "queue.position.cancelled",
            &queue_id,
            serde_json::json!({ "position_id": claims.sub }),
        ))
        .await;

    axum::http::StatusCode::NO_CONTENT.into_response()
}

/// `GET /sessions/{s}`
pub async fn session_info(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    let cancel = tokio_util::sync::CancellationToken::new();
    let token = match extract_bearer(&headers) {
        Ok(t) => t,
        Err(err) => return err_response(&state, err, "missing admitted credential"),
    };
    let fingerprint = fingerprint_of(&state.fingerprint_salt, &headers, peer);
    let claims = match state
        .credentials
        .validate(token, CredentialKind::Admitted, &fingerprint, state.bind_fingerprint_strict, &cancel)
        .await
    {
        Ok(c) => c,
        Err(err) => return err_response(&state, err, "invalid credential"),
    };
    if claims.sub != session_id {
        return err_response(&state, WaitError::Forbidden, "credential does not match session");
    }

    match state.sessions.get(&session_id, &cancel).await {
        Ok(session) => Json(SessionInfoBody {
            session_id: session.id,
            queue_id: session.queue_id,
            issued_at: session.issued_at_secs,
            expires_at: session.expires_at_secs,
            last_activity_at: session.last_activity_at_secs,
            view_count: session.view_count,
        })
        .into_response(),
        Err(err) => err_response(&state, err, "session lookup failed"),
    }
}

/// `POST /sessions/{s}/activity`
pub async fn session_activity(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    let cancel = tokio_util::sync::CancellationToken::new();
    let token = match extract_bearer(&headers) {
        Ok(t) => t,
        Err(err) => return err_response(&state, err, "missing admitted credential"),
    };
    let fingerprint = fingerprint_of(&state.fingerprint_salt, &headers, peer);
    let claims = match state
        .credentials
        .validate(token, CredentialKind::Admitted, &fingerprint, state.bind_fingerprint_strict, &cancel)
        .await
    {
        Ok(c) => c,
        Err(err) => return err_response(&state, err, "invalid credential"),
    };
    if claims.sub != session_id {
        return err_response(&state, WaitError::Forbidden, "credential does not match session");
    }

    match state.sessions.record_activity(&session_id, &cancel).await {
        Ok(session) => Json(ActivityResponseBody { view_count: session.view_count, last_activity_at: session.last_activity_at_secs })
            .into_response(),
        Err(err) => err_response(&state, err, "activity recording failed"),
    }
}

/// `GET /health`
pub async fn health(State(state): State<Arc<GatewayState>>) -> axum::response::Response {
    let cancel = tokio_util::sync::CancellationToken::new();
    let store_reachable = state.store.now_secs(&cancel).await.is_ok();
    let event_bus_reachable = true; // the publisher buffers internally and never surfaces reachability here
    let healthy = store_reachable;
    let status_code = if healthy { axum::http::StatusCode::OK } else { axum::http::StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(HealthResponseBody { status: if healthy { "ok" } else { "degraded" }, store_reachable, event_bus_reachable }))
        .into_response()
}

// -- Admin handlers -------------------------------------------------------------

/// `POST /admin/queues`
pub async fn create_queue(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<CreateQueueBody>,
) -> axum::response::Response {
    if let Err(err) = validate_admin_key(&headers, state.admin_key.as_deref()) {
        return err_response(&state, err, "admin auth failed");
    }
    let cancel = tokio_util::sync::CancellationToken::new();
    let descriptor = QueueDescriptor {
        name: body.name.clone(),
        target_url: body.target_url,
        max_active: body.max_active,
        max_size: body.max_size,
        admission_rate: body.admission_rate,
        heartbeat_interval_secs: body.heartbeat_interval_secs,
        heartbeat_timeout_secs: body.heartbeat_timeout_secs,
        grace_period_secs: body.grace_period_secs,
        status: QueueStatus::Active,
    };
    match state.registry.create(&body.name, descriptor, &cancel).await {
        Ok(()) => {
            state
                .publisher
                .publish(EventEnvelope::new("queue.queue.created", &body.name, serde_json::json!({})))
                .await;

            // Queues present at process start get their admission loop
            // spawned by `run()`; one created afterward via this endpoint
            // needs its own loop spawned here or it would sit forever
            // without ever admitting anyone.
            tokio::spawn(crate::admission::run_admission_loop(
                body.name.clone(),
                state.registry.clone(),
                state.queue_engine.clone(),
                state.store.clone(),
                state.admission.clone(),
                state.publisher.clone(),
                state.session_ttl,
                state.shutdown.clone(),
            ));

            axum::http::StatusCode::CREATED.into_response()
        }
        Err(err) => err_response(&state, err, "queue creation failed"),
    }
}

/// `PATCH /admin/queues/{q}`
pub async fn update_queue(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(queue_id): Path<String>,
    Json(body): Json<UpdateQueueBody>,
) -> axum::response::Response {
    if let Err(err) = validate_admin_key(&headers, state.admin_key.as_deref()) {
        return err_response(&state, err, "admin auth failed");
    }
    let cancel = tokio_util::sync::CancellationToken::new();
    let result = state
        .registry
        .update(&queue_id, &cancel, |d| {
            if let Some(v) = body.max_active {
                d.max_active = v;
            }
            if let Some(v) = body.max_size {
                d.max_size = v;
            }
            if let Some(v) = body.admission_rate {
                d.admission_rate = v;
            }
            if let Some(v) = body.status {
                d.status = v;
            }
        })
        .await;

    match result {
        Ok(_) => {
            state
                .publisher
                .publish(EventEnvelope::new("queue.queue.updated", &queue_id, serde_json::json!({})))
                .await;
            axum::http::StatusCode::OK.into_response()
        }
        Err(err) => err_response(&state, err, "queue update failed"),
    }
}

/// `GET /admin/queues/{q}/stats`
pub async fn queue_stats(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(queue_id): Path<String>,
) -> axum::response::Response {
    if let Err(err) = validate_admin_key(&headers, state.admin_key.as_deref()) {
        return err_response(&state, err, "admin auth failed");
    }
    let cancel = tokio_util::sync::CancellationToken::new();
    let Some(descriptor) = state.registry.get(&queue_id, &cancel).await.ok().flatten() else {
        return err_response(&state, WaitError::NotFound, "queue not found");
    };
    let rank_key = crate::store::keys::rank_set(&queue_id);
    let queue_length = state.store.length(&rank_key, &cancel).await.unwrap_or(0);

    Json(QueueStatsBody {
        queue_id,
        status: descriptor.status,
        queue_length,
        max_active: descriptor.max_active,
        admission_rate: descriptor.admission_rate,
    })
    .into_response()
}

/// `DELETE /admin/sessions/{s}`
pub async fn terminate_session(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> axum::response::Response {
    if let Err(err) = validate_admin_key(&headers, state.admin_key.as_deref()) {
        return err_response(&state, err, "admin auth failed");
    }
    let cancel = tokio_util::sync::CancellationToken::new();
    match state.sessions.terminate(&session_id, &cancel).await {
        Ok(()) => {
            state
                .publisher
                .publish(EventEnvelope::new(
                    "queue.session.terminated",
                    "",
                    serde_json::json!({ "session_id": session_id }),
                ))
                .await;
            axum::http::StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => err_response(&state, err, "session termination failed"),
    }
}
