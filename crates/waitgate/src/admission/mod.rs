// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission controller (spec §4.D): a per-queue token bucket that decides
//! how many parked clients cross into the active pool per unit time, and
//! the driving loop that ticks it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::events::{EventEnvelope, EventPublisher};
use crate::model::QueueStatus;
use crate::queue::{QueueEngine, QueueRegistry};
use crate::store::StoreAdapter;

/// Consumes a queue's token bucket (spec §4.D).
pub struct AdmissionController {
    store: Arc<dyn StoreAdapter>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self { store }
    }

    pub async fn try_admit(&self, queue_id: &str, capacity: u64, rate_per_sec: f64, cancel: &CancellationToken) -> bool {
        self.store.try_admit_atomic(queue_id, capacity, rate_per_sec, cancel).await.unwrap_or(false)
    }

    pub async fn return_token(&self, queue_id: &str, capacity: u64, cancel: &CancellationToken) {
        if let Err(err) = self.store.return_token_atomic(queue_id, capacity, cancel).await {
            tracing::warn!(queue_id, %err, "failed to return admission token after failed dequeue");
        }
    }
}

/// Drives one queue's admission loop: tick, try-admit, dequeue, persist the
/// resulting active session, publish an event (spec §4.D "The controller
/// drives admission"). The admitted credential itself is minted lazily by
/// the gateway from the session record, not here.
pub async fn run_admission_loop(
    queue_id: String,
    registry: Arc<QueueRegistry>,
    queue_engine: Arc<QueueEngine>,
    store: Arc<dyn StoreAdapter>,
    controller: Arc<AdmissionController>,
    publisher: Arc<dyn EventPublisher>,
    session_ttl: Duration,
    cancel: CancellationToken,
) {
    loop {
        let descriptor = match registry.get(&queue_id, &cancel).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                tracing::warn!(queue_id, "admission loop stopping: queue descriptor disappeared");
                return;
            }
            Err(err) => {
                tracing::warn!(queue_id, ?err, "admission loop: failed to read descriptor, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        let tick = Duration::from_millis(
            (1000.0 / descriptor.admission_rate.max(0.001)).clamp(100.0, 60_000.0) as u64,
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(tick) => {}
        }

        if descriptor.status != QueueStatus::Active {
            continue;
        }

        if !controller.try_admit(&queue_id, descriptor.max_active, descriptor.admission_rate, &cancel).await {
            continue;
        }

        match queue_engine.dequeue(&queue_id, &cancel).await {
            Ok(Some(outcome)) => {
                let session_id = uuid::Uuid::new_v4().to_string();
                let session = crate::model::ActiveSession {
                    id: session_id.clone(),
                    queue_id: queue_id.clone(),
                    position_id: outcome.position_id.clone(),
                    issued_at_secs: outcome.admitted_at_secs,
                    expires_at_secs: outcome.admitted_at_secs + session_ttl.as_secs(),
                    last_activity_at_secs: outcome.admitted_at_secs,
                    view_count: 0,
                    status: crate::model::SessionStatus::Active,
                };
                if let Err(err) = store.create_session_atomic(session, &cancel).await {
                    tracing::warn!(queue_id, ?err, "failed to persist active session after dequeue");
                }
                if let Err(err) = store.link_position_session(&outcome.position_id, &session_id, &cancel).await {
                    tracing::warn!(queue_id, ?err, "failed to link position to its session");
                }

                publisher
                    .publish(EventEnvelope::new(
                        "queue.position.admitted",
                        &queue_id,
                        serde_json::json!({
                            "position_id": outcome.position_id,
                            "session_id": session_id,
                            "priority": outcome.priority,
                        }),
                    ))
                    .await;
            }
            Ok(None) => {
                controller.return_token(&queue_id, descriptor.max_active, &cancel).await;
            }
            Err(err) => {
                tracing::warn!(queue_id, ?err, "admission loop: dequeue failed, returning token");
                controller.return_token(&queue_id, descriptor.max_active, &cancel).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn try_admit_gates_on_capacity() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let controller = AdmissionController::new(store);
        let cancel = CancellationToken::new();

        let mut admitted = 0;
        for _ in 0..5 {
            if controller.try_admit("q1", 2, 0.0, &cancel).await {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 2);

        controller.return_token("q1", 2, &cancel).await;
        assert!(controller.try_admit("q1", 2, 0.0, &cancel).await);
    }
}
