// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness reaper (spec §4.E): scans the heartbeat index, expires stale
//! positions, emits one expiry event per id actually removed.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::events::{EventEnvelope, EventPublisher};
use crate::queue::QueueRegistry;
use crate::store::StoreAdapter;

/// Drives the reaper across every known queue on a fixed cadence. Multiple
/// instances may run concurrently (spec §4.E): the store's ordered-set
/// remove is the single point of truth for "who won the race", so each
/// instance only emits an event for ids its own batch call actually removed.
pub async fn run_reaper_loop(
    registry: Arc<QueueRegistry>,
    store: Arc<dyn StoreAdapter>,
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
    batch_size: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let queue_ids = match registry.list_ids(&cancel).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(?err, "reaper: failed to list queues, retrying next tick");
                continue;
            }
        };

        for queue_id in queue_ids {
            if cancel.is_cancelled() {
                return;
            }
            reap_one_queue(&registry, &store, &publisher, &queue_id, batch_size, &cancel).await;
        }
    }
}

async fn reap_one_queue(
    registry: &QueueRegistry,
    store: &Arc<dyn StoreAdapter>,
    publisher: &Arc<dyn EventPublisher>,
    queue_id: &str,
    batch_size: u64,
    cancel: &CancellationToken,
) {
    let descriptor = match registry.get(queue_id, cancel).await {
        Ok(Some(d)) => d,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(queue_id, ?err, "reaper: failed to read descriptor, skipping this tick");
            return;
        }
    };

    let now_secs = match store.now_secs(cancel).await {
        Ok(n) => n,
        Err(err) => {
            tracing::warn!(queue_id, ?err, "reaper: failed to read server clock, skipping this tick");
            return;
        }
    };
    let cutoff_secs = now_secs.saturating_sub(descriptor.heartbeat_timeout_secs);
    let grace = Duration::from_secs(descriptor.grace_period_secs);

    let outcome = match store.expire_batch_atomic(queue_id, cutoff_secs, batch_size, grace, cancel).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(queue_id, ?err, "reaper: expire batch failed, will retry next tick");
            return;
        }
    };

    if !outcome.expired_position_ids.is_empty() {
        tracing::info!(
            queue_id,
            count = outcome.expired_position_ids.len(),
            "reaper: expired stale positions"
        );
    }

    for position_id in outcome.expired_position_ids {
        publisher
            .publish(EventEnvelope::new(
                "queue.position.expired",
                queue_id,
                serde_json::json!({
                    "position_id": position_id,
                    "reason": "heartbeat-timeout",
                }),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, QueueDescriptor, QueueStatus};
    use crate::store::memory::MemoryStore;

    fn descriptor() -> QueueDescriptor {
        QueueDescriptor {
            name: "q1".into(),
            target_url: "https://example.com".into(),
            max_active: 10,
            max_size: 0,
            admission_rate: 1.0,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 0,
            grace_period_secs: 0,
            status: QueueStatus::Active,
        }
    }

    #[tokio::test]
    async fn reap_emits_one_event_per_actually_expired_position() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let registry = Arc::new(QueueRegistry::new(store.clone()));
        let cancel = CancellationToken::new();
        registry.create("q1", descriptor(), &cancel).await.unwrap();

        let req = crate::store::EnqueueRequest {
            queue_id: "q1".into(),
            priority: Priority::Normal,
            fingerprint: "fp-a".into(),
            user_agent_hash: None,
            metadata: serde_json::json!({}),
            now_micros: 0,
            ttl: Duration::from_secs(0),
        };
        store.enqueue_atomic(req, &cancel).await.unwrap();

        struct CountingPublisher(std::sync::atomic::AtomicUsize);
        #[async_trait::async_trait]
        impl EventPublisher for CountingPublisher {
            async fn publish(&self, _event: EventEnvelope) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
        let publisher = Arc::new(CountingPublisher(std::sync::atomic::AtomicUsize::new(0)));
        let publisher_dyn: Arc<dyn EventPublisher> = publisher.clone();

        reap_one_queue(&registry, &store, &publisher_dyn, "q1", 100, &cancel).await;
        assert_eq!(publisher.0.load(std::sync::atomic::Ordering::Relaxed), 1);

        // A second pass finds nothing left to expire.
        reap_one_queue(&registry, &store, &publisher_dyn, "q1", 100, &cancel).await;
        assert_eq!(publisher.0.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
