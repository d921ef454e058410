// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-through cache of queue descriptors (spec §5 "Shared-resource
//! policy": "in-process caches of queue descriptors are read-through;
//! invalidation is event-driven"). The store remains the source of truth;
//! this only spares every request a round trip for configuration that
//! changes rarely.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::WaitError;
use crate::model::QueueDescriptor;
use crate::store::StoreAdapter;

pub struct QueueRegistry {
    store: Arc<dyn StoreAdapter>,
    cache: RwLock<std::collections::HashMap<String, QueueDescriptor>>,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self { store, cache: RwLock::new(std::collections::HashMap::new()) }
    }

    pub async fn create(
        &self,
        queue_id: &str,
        mut descriptor: QueueDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(), WaitError> {
        if self.store.get_descriptor(queue_id, cancel).await.map_err(|_| WaitError::InternalError)?.is_some() {
            return Err(WaitError::InvalidRequest);
        }
        descriptor.name = queue_id.to_owned();
        self.store.put_descriptor(queue_id, &descriptor, cancel).await.map_err(|_| WaitError::InternalError)?;
        self.cache.write().insert(queue_id.to_owned(), descriptor);
        Ok(())
    }

    /// Apply `mutate` to the current descriptor and persist the result.
    /// Returns `not-found` if the queue doesn't exist.
    pub async fn update(
        &self,
        queue_id: &str,
        cancel: &CancellationToken,
        mutate: impl FnOnce(&mut QueueDescriptor),
    ) -> Result<QueueDescriptor, WaitError> {
        let mut descriptor = self
            .store
            .get_descriptor(queue_id, cancel)
            .await
            .map_err(|_| WaitError::InternalError)?
            .ok_or(WaitError::NotFound)?;
        mutate(&mut descriptor);
        self.store.put_descriptor(queue_id, &descriptor, cancel).await.map_err(|_| WaitError::InternalError)?;
        self.invalidate(queue_id);
        Ok(descriptor)
    }

    /// Read the descriptor, consulting the cache first.
    pub async fn get(
        &self,
        queue_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<QueueDescriptor>, WaitError> {
        if let Some(d) = self.cache.read().get(queue_id).cloned() {
            return Ok(Some(d));
        }
        let fetched =
            self.store.get_descriptor(queue_id, cancel).await.map_err(|_| WaitError::InternalError)?;
        if let Some(ref d) = fetched {
            self.cache.write().insert(queue_id.to_owned(), d.clone());
        }
        Ok(fetched)
    }

    /// Invalidate a cached entry, called on `queue.queue.updated` events
    /// (including updates originating from another process).
    pub fn invalidate(&self, queue_id: &str) {
        self.cache.write().remove(queue_id);
    }

    pub async fn list_ids(&self, cancel: &CancellationToken) -> Result<Vec<String>, WaitError> {
        self.store.list_queue_ids(cancel).await.map_err(|_| WaitError::InternalError)
    }

    /// Default TTL for a position's store-side metadata: heartbeat timeout
    /// plus grace, per descriptor (spec §4.C step 8).
    pub fn position_ttl(descriptor: &QueueDescriptor) -> Duration {
        Duration::from_secs(descriptor.heartbeat_timeout_secs + descriptor.grace_period_secs)
    }
}
