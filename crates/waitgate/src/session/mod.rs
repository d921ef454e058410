// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Active-session lifecycle (spec §3 "Active-session record"): the thin
//! layer the gateway's `/sessions/{s}` handlers call through to the store,
//! mirroring how `QueueEngine` wraps the position-side store calls.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::WaitError;
use crate::model::{ActiveSession, SessionStatus};
use crate::store::{StoreAdapter, StoreError};

pub struct SessionService {
    store: Arc<dyn StoreAdapter>,
}

impl SessionService {
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self { store }
    }

    /// Look up a session, transparently treating one whose `expires_at_secs`
    /// has passed as `session-expired` even if no sweep has marked it yet.
    pub async fn get(&self, session_id: &str, cancel: &CancellationToken) -> Result<ActiveSession, WaitError> {
        let session = self.store.get_session(session_id, cancel).await.map_err(|_| WaitError::InternalError)?
            .ok_or(WaitError::NotFound)?;

        if session.status == SessionStatus::Terminated {
            return Err(WaitError::SessionExpired);
        }
        let now_secs = self.store.now_secs(cancel).await.map_err(|_| WaitError::InternalError)?;
        if now_secs >= session.expires_at_secs {
            return Err(WaitError::SessionExpired);
        }
        Ok(session)
    }

    /// Record a unit of activity against a session (spec §3 `view_count`,
    /// `last_activity_at_secs`), rejecting if it's already expired.
    pub async fn record_activity(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ActiveSession, WaitError> {
        // `get` enforces the expiry check before we bother writing.
        self.get(session_id, cancel).await?;
        let now_secs = self.store.now_secs(cancel).await.map_err(|_| WaitError::InternalError)?;
        self.store.record_activity_atomic(session_id, now_secs, cancel).await.map_err(|e| match e {
            StoreError::NotFound => WaitError::NotFound,
            _ => WaitError::InternalError,
        })
    }

    /// Terminate a session early (spec §6 `DELETE /admin/sessions/{s}`).
    pub async fn terminate(&self, session_id: &str, cancel: &CancellationToken) -> Result<(), WaitError> {
        self.store.terminate_session_atomic(session_id, cancel).await.map_err(|e| match e {
            StoreError::NotFound => WaitError::NotFound,
            _ => WaitError::InternalError,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn session(expires_at_secs: u64) -> ActiveSession {
        ActiveSession {
            id: "s1".into(),
            queue_id: "q1".into(),
            position_id: "p1".into(),
            issued_at_secs: 0,
            expires_at_secs,
            last_activity_at_secs: 0,
            view_count: 0,
            status: SessionStatus::Active,
        }
    }

    #[tokio::test]
    async fn expired_by_clock_reads_as_session_expired() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        store.create_session_atomic(session(0), &cancel).await.unwrap();

        let service = SessionService::new(store);
        let err = service.get("s1", &cancel).await;
        assert!(matches!(err, Err(WaitError::SessionExpired)));
    }

    #[tokio::test]
    async fn record_activity_increments_view_count() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        store.create_session_atomic(session(u64::MAX), &cancel).await.unwrap();

        let service = SessionService::new(store);
        let updated = service.record_activity("s1", &cancel).await.unwrap();
        assert_eq!(updated.view_count, 1);
    }

    #[tokio::test]
    async fn terminate_then_get_reads_as_session_expired() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        store.create_session_atomic(session(u64::MAX), &cancel).await.unwrap();

        let service = SessionService::new(store);
        service.terminate("s1", &cancel).await.unwrap();
        let err = service.get("s1", &cancel).await;
        assert!(matches!(err, Err(WaitError::SessionExpired)));
    }
}
