// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fair, priority-aware queue engine (spec §4.C).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::error::WaitError;
use crate::model::{Position, QueueStatus};
use crate::store::{EnqueueKind, EnqueueRequest, StoreAdapter, StoreError};

use super::registry::QueueRegistry;

pub struct QueueEngine {
    store: Arc<dyn StoreAdapter>,
    registry: Arc<QueueRegistry>,
}

/// Result of a successful enqueue (spec §4.C).
#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub position_id: String,
    pub rank: u64,
    pub queue_length: u64,
    pub estimated_wait_secs: f64,
    pub was_existing: bool,
}

/// Result of a successful status/rank lookup on a still-waiting position.
#[derive(Debug, Clone)]
pub struct WaitingStatus {
    pub rank: u64,
    pub queue_length: u64,
    pub estimated_wait_secs: f64,
}

impl QueueEngine {
    pub fn new(store: Arc<dyn StoreAdapter>, registry: Arc<QueueRegistry>) -> Self {
        Self { store, registry }
    }

    fn now_micros() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
    }

    pub async fn enqueue(
        &self,
        queue_id: &str,
        priority: crate::model::Priority,
        fingerprint: &str,
        user_agent_hash: Option<String>,
        metadata: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<EnqueueResult, WaitError> {
        let descriptor = self.registry.get(queue_id, cancel).await?.ok_or(WaitError::NotFound)?;
        if descriptor.status != QueueStatus::Active {
            return Err(WaitError::QueueUnavailable);
        }

        let req = EnqueueRequest {
            queue_id: queue_id.to_owned(),
            priority,
            fingerprint: fingerprint.to_owned(),
            user_agent_hash,
            metadata,
            now_micros: Self::now_micros(),
            ttl: QueueRegistry::position_ttl(&descriptor),
        };

        let outcome = self.store.enqueue_atomic(req, cancel).await.map_err(|e| match e {
            StoreError::Conflict => WaitError::QueueFull,
            StoreError::NotFound => WaitError::NotFound,
            _ => WaitError::InternalError,
        })?;

        Ok(EnqueueResult {
            position_id: outcome.position_id,
            rank: outcome.rank,
            queue_length: outcome.queue_length,
            estimated_wait_secs: descriptor.estimated_wait_secs(outcome.rank),
            was_existing: outcome.kind == EnqueueKind::Existing,
        })
    }

    pub async fn dequeue(
        &self,
        queue_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<crate::store::DequeueOutcome>, WaitError> {
        self.store.dequeue_atomic(queue_id, cancel).await.map_err(|_| WaitError::InternalError)
    }

    pub async fn touch(
        &self,
        queue_id: &str,
        position_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WaitError> {
        let descriptor = self.registry.get(queue_id, cancel).await?.ok_or(WaitError::NotFound)?;
        let now_secs = self.store.now_secs(cancel).await.map_err(|_| WaitError::InternalError)?;
        self.store
            .touch_atomic(queue_id, position_id, now_secs, QueueRegistry::position_ttl(&descriptor), cancel)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => WaitError::PositionExpired,
                _ => WaitError::InternalError,
            })
    }

    pub async fn cancel(
        &self,
        queue_id: &str,
        position_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<(), WaitError> {
        let descriptor = self.registry.get(queue_id, cancel_token).await?.ok_or(WaitError::NotFound)?;
        self.store
            .cancel_atomic(
                queue_id,
                position_id,
                Duration::from_secs(descriptor.grace_period_secs),
                cancel_token,
            )
            .await
            .map_err(|e| match e {
                StoreError::NotFound => WaitError::NotFound,
                _ => WaitError::InternalError,
            })
    }

    pub async fn get_position(
        &self,
        position_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Position>, WaitError> {
        self.store.get_position(position_id, cancel).await.map_err(|_| WaitError::InternalError)
    }

    /// Current rank/length/estimated-wait for a position still `waiting`.
    /// Returns `None` if the position is not (or no longer) waiting.
    pub async fn waiting_status(
        &self,
        queue_id: &str,
        position_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<WaitingStatus>, WaitError> {
        let descriptor = self.registry.get(queue_id, cancel).await?.ok_or(WaitError::NotFound)?;
        let rank_key = crate::store::keys::rank_set(queue_id);
        let Some(rank) = self.store.rank(&rank_key, position_id, cancel).await.map_err(|_| WaitError::InternalError)?
        else {
            return Ok(None);
        };
        let length = self.store.length(&rank_key, cancel).await.map_err(|_| WaitError::InternalError)?;
        Ok(Some(WaitingStatus {
            rank,
            queue_length: length,
            estimated_wait_secs: descriptor.estimated_wait_secs(rank),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, QueueDescriptor};
    use crate::store::memory::MemoryStore;

    fn descriptor() -> QueueDescriptor {
        QueueDescriptor {
            name: "q1".into(),
            target_url: "https://example.com".into(),
            max_active: 10,
            max_size: 2,
            admission_rate: 1.0,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 60,
            grace_period_secs: 30,
            status: QueueStatus::Active,
        }
    }

    async fn engine() -> (QueueEngine, CancellationToken) {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let registry = Arc::new(QueueRegistry::new(store.clone()));
        let cancel = CancellationToken::new();
        registry.create("q1", descriptor(), &cancel).await.unwrap();
        (QueueEngine::new(store, registry), cancel)
    }

    #[tokio::test]
    async fn enqueue_then_cancel_frees_the_slot() {
        let (engine, cancel) = engine().await;
        let result =
            engine.enqueue("q1", Priority::Normal, "fp-a", None, serde_json::json!({}), &cancel).await.unwrap();
        assert_eq!(result.rank, 0);
        assert_eq!(result.queue_length, 1);

        engine.cancel("q1", &result.position_id, &cancel).await.unwrap();
        let status = engine.waiting_status("q1", &result.position_id, &cancel).await.unwrap();
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn queue_full_returns_queue_full_error() {
        let (engine, cancel) = engine().await;
        engine.enqueue("q1", Priority::Normal, "a", None, serde_json::json!({}), &cancel).await.unwrap();
        engine.enqueue("q1", Priority::Normal, "b", None, serde_json::json!({}), &cancel).await.unwrap();
        let err = engine.enqueue("q1", Priority::Normal, "c", None, serde_json::json!({}), &cancel).await;
        assert!(matches!(err, Err(WaitError::QueueFull)));
    }

    #[tokio::test]
    async fn touch_on_unknown_position_returns_position_expired() {
        let (engine, cancel) = engine().await;
        let err = engine.touch("q1", "no-such-position", &cancel).await;
        assert!(matches!(err, Err(WaitError::PositionExpired)));
    }
}
