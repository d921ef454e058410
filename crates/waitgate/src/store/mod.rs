// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store adapter (spec §4.A): the substitution seam between the core
//! subsystems and whatever key-value server backs them.
//!
//! `StoreAdapter` exposes the generic primitives spec §4.A lists directly
//! (ordered sets, hashes, lists, counters, TTLs) plus a handful of dedicated
//! *atomic* operations for the cross-key invariants spec §9 says must run as
//! a single server-side script: enqueue, dequeue, touch, cancel, the reaper's
//! expiry batch, and the admission bucket's try-admit. Each backing
//! (`memory`, `redis`) implements those atomically in whatever way fits its
//! protocol — a single mutex-held block for the embedded store, a
//! `redis::Script` (Lua) for Redis — rather than exposing a free-form
//! `eval(script, ...)` escape hatch to callers.

pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::model::{ActiveSession, Priority, QueueDescriptor};

/// Error kinds surfaced by the store adapter (spec §4.A).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Request to enqueue a client (spec §4.C).
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub queue_id: String,
    pub priority: Priority,
    pub fingerprint: String,
    pub user_agent_hash: Option<String>,
    pub metadata: serde_json::Value,
    pub now_micros: u64,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnqueueKind {
    Created,
    Existing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub kind: EnqueueKind,
    pub position_id: String,
    /// 0-indexed count of strictly preceding positions (spec §4.C "Rank semantics").
    pub rank: u64,
    pub queue_length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DequeueOutcome {
    pub position_id: String,
    pub fingerprint: String,
    pub priority: Priority,
    pub admitted_at_secs: u64,
}

/// Outcome of a single reaper batch pass over one queue.
#[derive(Debug, Clone, Default)]
pub struct ExpireBatchOutcome {
    pub expired_position_ids: Vec<String>,
}

/// Store-backed primitives plus the cross-key atomic operations.
///
/// All operations accept a `CancellationToken` and honour it cooperatively
/// (spec §5 "Suspension points"): backends should check it before starting
/// network I/O and are not required to interrupt work already in flight.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    // -- generic primitives (spec §4.A) --------------------------------

    async fn add_ordered(
        &self,
        key: &str,
        member: &str,
        score: f64,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn remove_ordered(
        &self,
        key: &str,
        member: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError>;

    async fn rank(
        &self,
        key: &str,
        member: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, StoreError>;

    async fn length(&self, key: &str, cancel: &CancellationToken) -> Result<u64, StoreError>;

    async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StoreError>;

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn hash_get(
        &self,
        key: &str,
        field: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, StoreError>;

    async fn hash_get_all(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<HashMap<String, String>>, StoreError>;

    async fn expire(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<(), StoreError>;

    async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<String>, StoreError>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        cancel: &CancellationToken,
    ) -> Result<i64, StoreError>;

    /// Server-side clock, used so distributed callers never race on `now`
    /// (spec §9 "Distributed admission subtlety").
    async fn now_secs(&self, cancel: &CancellationToken) -> Result<u64, StoreError>;

    // -- queue descriptors (admin-path, infrequent, no atomicity needed) --

    async fn put_descriptor(
        &self,
        queue_id: &str,
        descriptor: &QueueDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn get_descriptor(
        &self,
        queue_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<QueueDescriptor>, StoreError>;

    async fn list_queue_ids(&self, cancel: &CancellationToken) -> Result<Vec<String>, StoreError>;

    async fn get_position(
        &self,
        position_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<crate::model::Position>, StoreError>;

    async fn lookup_fingerprint(
        &self,
        queue_id: &str,
        fingerprint: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, StoreError>;

    // -- cross-key atomic operations (spec §4.C, §4.D, §4.E, §9) ---------

    async fn enqueue_atomic(
        &self,
        req: EnqueueRequest,
        cancel: &CancellationToken,
    ) -> Result<EnqueueOutcome, StoreError>;

    async fn dequeue_atomic(
        &self,
        queue_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DequeueOutcome>, StoreError>;

    async fn touch_atomic(
        &self,
        queue_id: &str,
        position_id: &str,
        now_secs: u64,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn cancel_atomic(
        &self,
        queue_id: &str,
        position_id: &str,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn expire_batch_atomic(
        &self,
        queue_id: &str,
        cutoff_secs: u64,
        limit: u64,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExpireBatchOutcome, StoreError>;

    /// Lazy-refill token bucket consume (spec §4.D). Returns `true` if a
    /// token was available and has been decremented.
    async fn try_admit_atomic(
        &self,
        queue_id: &str,
        capacity: u64,
        rate_per_sec: f64,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError>;

    async fn return_token_atomic(
        &self,
        queue_id: &str,
        capacity: u64,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    /// Stamp the active-session id onto a just-dequeued position, so a
    /// later status/heartbeat lookup can find its session (spec §3
    /// "Cyclic references avoided" — id-only link, no back-pointer hash).
    async fn link_position_session(
        &self,
        position_id: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    // -- active sessions (spec §3 "Active-session record") ---------------

    async fn create_session_atomic(
        &self,
        session: ActiveSession,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn get_session(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ActiveSession>, StoreError>;

    async fn record_activity_atomic(
        &self,
        session_id: &str,
        now_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<ActiveSession, StoreError>;

    async fn terminate_session_atomic(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;
}

/// Key-naming conventions shared by every backend. Keeping these in one
/// place means the two backends agree on layout without coupling to each
/// other's internals.
pub(crate) mod keys {
    pub fn priority_list(queue_id: &str, priority: u8) -> String {
        format!("queue:{queue_id}:priority:{priority}")
    }

    pub fn rank_set(queue_id: &str) -> String {
        format!("queue:{queue_id}:rank")
    }

    pub fn liveness_set(queue_id: &str) -> String {
        format!("queue:{queue_id}:liveness")
    }

    pub fn position_hash(position_id: &str) -> String {
        format!("position:{position_id}")
    }

    pub fn fingerprint_key(queue_id: &str, fingerprint: &str) -> String {
        format!("queue:{queue_id}:fp:{fingerprint}")
    }

    pub fn bucket(queue_id: &str) -> String {
        format!("queue:{queue_id}:bucket")
    }

    pub fn descriptor_hash() -> &'static str {
        "queues:descriptors"
    }

    pub fn revocation(credential_id: &str) -> String {
        format!("revocation:{credential_id}")
    }

    pub fn enqueue_counter(queue_id: &str) -> String {
        format!("queue:{queue_id}:enqueue_counter")
    }
}

/// Width of one priority's score band. Large enough that any realistic
/// queue lifetime's enqueue counter (monotonic, per queue) never spills into
/// the next band, small enough that four bands plus headroom stay inside an
/// `f64`'s 53-bit exact-integer range (store backends keep ordered-set
/// scores as doubles, Redis included).
pub(crate) const PRIORITY_BAND: f64 = 1_000_000_000_000.0;

/// Combine a priority and a per-queue monotonic counter into the single
/// rank-set score that gives premium-first, FIFO-within-priority ordering
/// from one `O(log N)` rank lookup (spec §4.C "Rank semantics"), rather than
/// computing it at read time from separate per-priority lengths.
pub(crate) fn priority_rank_score(priority: Priority, counter: u64) -> f64 {
    let weight = (Priority::ALL_DESCENDING.len() as u8 - 1 - priority.as_u8()) as f64;
    weight * PRIORITY_BAND + counter as f64
}
