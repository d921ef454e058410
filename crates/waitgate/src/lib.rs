// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Waitgate: a virtual waiting room that fronts a protected origin, holding
//! clients in a fair, priority-aware queue and admitting them at a rate the
//! origin can sustain.

pub mod admission;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod gateway;
pub mod model;
pub mod queue;
pub mod reaper;
pub mod session;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::config::{ServerConfig, StoreKind};
use crate::credential::key::{KeyRing, SigningKey};
use crate::credential::CredentialService;
use crate::events::{EventPublisher, LoggingPublisher, NatsPublisher};
use crate::gateway::{build_router, GatewayState};
use crate::queue::{QueueEngine, QueueRegistry};
use crate::session::SessionService;
use crate::store::memory::MemoryStore;
use crate::store::redis_store::RedisStore;
use crate::store::StoreAdapter;

/// Run the waitgate server until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    config.validate()?;
    let shutdown = CancellationToken::new();
    let startup_cancel = CancellationToken::new();

    let store: Arc<dyn StoreAdapter> = match config.store_kind {
        StoreKind::Memory => {
            tracing::info!("using embedded in-memory store");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Redis => {
            tracing::info!(addr = %config.store_addr, "connecting to redis store");
            Arc::new(RedisStore::connect(&config.store_addr).await?)
        }
    };

    let registry = Arc::new(QueueRegistry::new(store.clone()));
    let queue_engine = Arc::new(QueueEngine::new(store.clone(), registry.clone()));
    let admission = Arc::new(AdmissionController::new(store.clone()));

    let signing_key = SigningKey::generate("k1")?;
    let key_ring = KeyRing::new(signing_key);
    let credentials = Arc::new(CredentialService::new(key_ring, store.clone(), config.clock_skew()));
    let sessions = Arc::new(SessionService::new(store.clone()));

    let publisher: Arc<dyn EventPublisher> = match &config.event_bus_addr {
        Some(url) => {
            Arc::new(NatsPublisher::connect(url, config.event_prefix.clone(), shutdown.clone()).await?)
        }
        None => {
            tracing::info!("no event-bus address configured, events will only be logged");
            Arc::new(LoggingPublisher)
        }
    };

    let limiter = Arc::new(gateway::FingerprintLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst));
    let session_ttl = config.heartbeat_timeout() + config.grace_period();

    let state = Arc::new(GatewayState {
        store: store.clone(),
        registry: registry.clone(),
        queue_engine: queue_engine.clone(),
        admission: admission.clone(),
        credentials,
        sessions,
        publisher: publisher.clone(),
        limiter,
        admin_key: config.admin_key.clone(),
        fingerprint_salt: config.fingerprint_salt().to_owned(),
        bind_fingerprint_strict: config.bind_fingerprint_strict,
        clock_skew: config.clock_skew(),
        session_ttl,
        shutdown: shutdown.clone(),
    });

    for queue_id in registry.list_ids(&startup_cancel).await? {
        tracing::info!(queue_id, "starting admission loop");
        tokio::spawn(admission::run_admission_loop(
            queue_id,
            registry.clone(),
            queue_engine.clone(),
            store.clone(),
            admission.clone(),
            publisher.clone(),
            session_ttl,
            shutdown.clone(),
        ));
    }

    tokio::spawn(reaper::run_reaper_loop(
        registry.clone(),
        store.clone(),
        publisher.clone(),
        config.reaper_interval(),
        config.reaper_batch_size,
        shutdown.clone(),
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let router = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr, "waitgate listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
