// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state handed to every gateway handler.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::credential::CredentialService;
use crate::events::EventPublisher;
use crate::queue::{QueueEngine, QueueRegistry};
use crate::session::SessionService;
use crate::store::StoreAdapter;

use super::rate_limit::FingerprintLimiter;

pub struct GatewayState {
    pub store: Arc<dyn StoreAdapter>,
    pub registry: Arc<QueueRegistry>,
    pub queue_engine: Arc<QueueEngine>,
    pub admission: Arc<AdmissionController>,
    pub credentials: Arc<CredentialService>,
    pub sessions: Arc<SessionService>,
    pub publisher: Arc<dyn EventPublisher>,
    pub limiter: Arc<FingerprintLimiter>,
    pub admin_key: Option<String>,
    pub fingerprint_salt: String,
    pub bind_fingerprint_strict: bool,
    pub clock_skew: Duration,
    /// Default active-session lifetime handed to admission loops spawned
    /// for queues created after the server has already started (spec §6
    /// `POST /admin/queues`), mirroring the one computed at startup for
    /// queues that already existed.
    pub session_ttl: Duration,
    /// Cancelled on graceful shutdown; threaded into admission loops
    /// spawned dynamically from `create_queue` so they stop with the rest.
    pub shutdown: CancellationToken,
}
