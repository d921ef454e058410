// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Embedded `StoreAdapter`: an ordered map plus a mutex, for single-node
//! deployments and tests (spec §9 "Pluggable store").
//!
//! Every operation holds the single process-wide lock for the duration of
//! its critical section. That is exactly what spec §9 means by "a
//! single server-side atomic script" in a single-process world: there is no
//! second round trip for a concurrent writer to interleave into.
//!
//! Rank lookups here are `O(k)` in the rank returned (an ascending scan
//! that stops at the target), not the `O(log N)` spec §4.A names — that
//! bound is met by the Redis-backed adapter's `ZRANK`/`ZCARD`, which is the
//! production path. This backend is the single-node/test fallback spec §9
//! explicitly allows ("the same contract can be satisfied by an embedded
//! ordered map plus a mutex").

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{ActiveSession, Position, PositionStatus, Priority, QueueDescriptor};

use super::{
    keys, DequeueOutcome, EnqueueKind, EnqueueOutcome, EnqueueRequest, ExpireBatchOutcome,
    StoreAdapter, StoreError,
};

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f64);

impl Eq for OrderedFloat {}
impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Default)]
struct OrderedSet {
    by_member: HashMap<String, f64>,
    by_score: BTreeMap<(OrderedFloat, String), ()>,
}

impl OrderedSet {
    fn add(&mut self, member: &str, score: f64) {
        if let Some(old) = self.by_member.get(member).copied() {
            self.by_score.remove(&(OrderedFloat(old), member.to_owned()));
        }
        self.by_member.insert(member.to_owned(), score);
        self.by_score.insert((OrderedFloat(score), member.to_owned()), ());
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.by_member.remove(member) {
            Some(score) => {
                self.by_score.remove(&(OrderedFloat(score), member.to_owned()));
                true
            }
            None => false,
        }
    }

    fn rank(&self, member: &str) -> Option<u64> {
        let score = *self.by_member.get(member)?;
        let key = (OrderedFloat(score), member.to_owned());
        Some(self.by_score.range(..key).count() as u64)
    }

    fn len(&self) -> u64 {
        self.by_member.len() as u64
    }

    fn range_by_score(&self, min: f64, max: f64, limit: u64) -> Vec<String> {
        self.by_score
            .range((OrderedFloat(min), String::new())..=(OrderedFloat(max), String::from('\u{10FFFF}')))
            .take(limit as usize)
            .map(|((_, m), ())| m.clone())
            .collect()
    }
}

struct Bucket {
    tokens: f64,
    last_refill_secs: f64,
}

#[derive(Default)]
struct Inner {
    ordered: HashMap<String, OrderedSet>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, String>,
    expires_at: HashMap<String, Instant>,
    positions: HashMap<String, Position>,
    sessions: HashMap<String, ActiveSession>,
    buckets: HashMap<String, Bucket>,
}

impl Inner {
    fn purge_expired(&mut self, key: &str) {
        if let Some(exp) = self.expires_at.get(key) {
            if Instant::now() >= *exp {
                self.expires_at.remove(key);
                self.strings.remove(key);
                self.hashes.remove(key);
            }
        }
    }

    fn is_expired(&self, key: &str) -> bool {
        self.expires_at.get(key).is_some_and(|exp| Instant::now() >= *exp)
    }
}

/// Embedded, single-process `StoreAdapter`.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn epoch_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn add_ordered(
        &self,
        key: &str,
        member: &str,
        score: f64,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        self.inner.lock().ordered.entry(key.to_owned()).or_default().add(member, score);
        Ok(())
    }

    async fn remove_ordered(
        &self,
        key: &str,
        member: &str,
        _cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        Ok(self.inner.lock().ordered.get_mut(key).map(|s| s.remove(member)).unwrap_or(false))
    }

    async fn rank(
        &self,
        key: &str,
        member: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<u64>, StoreError> {
        Ok(self.inner.lock().ordered.get(key).and_then(|s| s.rank(member)))
    }

    async fn length(&self, key: &str, _cancel: &CancellationToken) -> Result<u64, StoreError> {
        Ok(self.inner.lock().ordered.get(key).map(OrderedSet::len).unwrap_or(0))
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: u64,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .ordered
            .get(key)
            .map(|s| s.range_by_score(min, max, limit))
            .unwrap_or_default())
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let entry = inner.hashes.entry(key.to_owned()).or_default();
        for (f, v) in fields {
            entry.insert((*f).to_owned(), (*v).to_owned());
        }
        Ok(())
    }

    async fn hash_get(
        &self,
        key: &str,
        field: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        Ok(inner.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hash_get_all(
        &self,
        key: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<HashMap<String, String>>, StoreError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        Ok(inner.hashes.get(key).cloned())
    }

    async fn expire(
        &self,
        key: &str,
        ttl: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        self.inner.lock().expires_at.insert(key.to_owned(), Instant::now() + ttl);
        Ok(())
    }

    async fn delete(&self, key: &str, _cancel: &CancellationToken) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.strings.remove(key);
        inner.hashes.remove(key);
        inner.lists.remove(key);
        inner.ordered.remove(key);
        inner.expires_at.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str, _cancel: &CancellationToken) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        Ok(inner.strings.get(key).cloned())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.strings.insert(key.to_owned(), value.to_owned());
        inner.expires_at.insert(key.to_owned(), Instant::now() + ttl);
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        _cancel: &CancellationToken,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        let cur: i64 = inner.strings.get(key).and_then(|v| v.parse().ok()).unwrap_or(0);
        let next = cur + delta;
        inner.strings.insert(key.to_owned(), next.to_string());
        Ok(next)
    }

    async fn now_secs(&self, _cancel: &CancellationToken) -> Result<u64, StoreError> {
        Ok(epoch_secs())
    }

    async fn put_descriptor(
        &self,
        queue_id: &str,
        descriptor: &QueueDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(descriptor)
            .map_err(|e| StoreError::Fatal(format!("encode descriptor: {e}")))?;
        self.inner
            .lock()
            .hashes
            .entry(keys::descriptor_hash().to_owned())
            .or_default()
            .insert(queue_id.to_owned(), json);
        Ok(())
    }

    async fn get_descriptor(
        &self,
        queue_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<QueueDescriptor>, StoreError> {
        let inner = self.inner.lock();
        let Some(json) = inner.hashes.get(keys::descriptor_hash()).and_then(|h| h.get(queue_id))
        else {
            return Ok(None);
        };
        serde_json::from_str(json)
            .map(Some)
            .map_err(|e| StoreError::Fatal(format!("decode descriptor: {e}")))
    }

    async fn list_queue_ids(&self, _cancel: &CancellationToken) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .hashes
            .get(keys::descriptor_hash())
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_position(
        &self,
        position_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<Position>, StoreError> {
        Ok(self.inner.lock().positions.get(position_id).cloned())
    }

    async fn lookup_fingerprint(
        &self,
        queue_id: &str,
        fingerprint: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>, StoreError> {
        let key = keys::fingerprint_key(queue_id, fingerprint);
        let mut inner = self.inner.lock();
        inner.purge_expired(&key);
        Ok(inner.strings.get(&key).cloned())
    }

    async fn enqueue_atomic(
        &self,
        req: EnqueueRequest,
        _cancel: &CancellationToken,
    ) -> Result<EnqueueOutcome, StoreError> {
        let mut inner = self.inner.lock();

        let descriptor = inner
            .hashes
            .get(keys::descriptor_hash())
            .and_then(|h| h.get(&req.queue_id))
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let descriptor: QueueDescriptor =
            serde_json::from_str(&descriptor).map_err(|e| StoreError::Fatal(e.to_string()))?;
        if descriptor.status != crate::model::QueueStatus::Active {
            return Err(StoreError::Conflict);
        }

        let fp_key = keys::fingerprint_key(&req.queue_id, &req.fingerprint);
        inner.purge_expired(&fp_key);
        if let Some(existing_id) = inner.strings.get(&fp_key).cloned() {
            if let Some(pos) = inner.positions.get(&existing_id) {
                if pos.status == PositionStatus::Waiting {
                    let rank_key = keys::rank_set(&req.queue_id);
                    let rank = inner.ordered.get(&rank_key).and_then(|s| s.rank(&existing_id)).unwrap_or(0);
                    let length = inner.ordered.get(&rank_key).map(OrderedSet::len).unwrap_or(0);
                    return Ok(EnqueueOutcome {
                        kind: EnqueueKind::Existing,
                        position_id: existing_id,
                        rank,
                        queue_length: length,
                    });
                }
            }
        }

        let rank_key = keys::rank_set(&req.queue_id);
        let current_length = inner.ordered.get(&rank_key).map(OrderedSet::len).unwrap_or(0);
        if descriptor.max_size > 0 && current_length >= descriptor.max_size {
            return Err(StoreError::Conflict);
        }

        let position_id = Uuid::new_v4().to_string();
        let counter_key = keys::enqueue_counter(&req.queue_id);
        let counter: u64 = inner.strings.get(&counter_key).and_then(|v| v.parse().ok()).unwrap_or(0) + 1;
        inner.strings.insert(counter_key, counter.to_string());
        let score = super::priority_rank_score(req.priority, counter);

        let priority_key = keys::priority_list(&req.queue_id, req.priority.as_u8());
        inner.lists.entry(priority_key).or_default().push_back(position_id.clone());
        inner.ordered.entry(rank_key.clone()).or_default().add(&position_id, score);

        let now_secs = epoch_secs();
        let position = Position {
            id: position_id.clone(),
            queue_id: req.queue_id.clone(),
            priority: req.priority,
            status: PositionStatus::Waiting,
            enqueued_at_micros: req.now_micros,
            last_heartbeat_at_secs: now_secs,
            fingerprint: req.fingerprint.clone(),
            user_agent_hash: req.user_agent_hash,
            metadata: req.metadata,
            admitted_at_secs: None,
            expired_at_secs: None,
            expiry_reason: None,
            session_id: None,
        };
        inner.positions.insert(position_id.clone(), position);
        inner.expires_at.insert(keys::position_hash(&position_id), Instant::now() + req.ttl);

        inner
            .ordered
            .entry(keys::liveness_set(&req.queue_id))
            .or_default()
            .add(&position_id, now_secs as f64);

        inner.strings.insert(fp_key.clone(), position_id.clone());
        inner.expires_at.insert(fp_key, Instant::now() + req.ttl);

        let rank = inner.ordered.get(&rank_key).and_then(|s| s.rank(&position_id)).unwrap_or(0);
        let length = inner.ordered.get(&rank_key).map(OrderedSet::len).unwrap_or(0);

        Ok(EnqueueOutcome { kind: EnqueueKind::Created, position_id, rank, queue_length: length })
    }

    async fn dequeue_atomic(
        &self,
        queue_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<DequeueOutcome>, StoreError> {
        let mut inner = self.inner.lock();

        for priority in Priority::ALL_DESCENDING {
            let list_key = keys::priority_list(queue_id, priority.as_u8());
            let Some(position_id) = inner.lists.get_mut(&list_key).and_then(VecDeque::pop_front)
            else {
                continue;
            };

            inner.ordered.get_mut(&keys::rank_set(queue_id)).map(|s| s.remove(&position_id));
            inner.ordered.get_mut(&keys::liveness_set(queue_id)).map(|s| s.remove(&position_id));

            let fingerprint = inner
                .positions
                .get(&position_id)
                .map(|p| p.fingerprint.clone())
                .ok_or(StoreError::NotFound)?;
            inner.strings.remove(&keys::fingerprint_key(queue_id, &fingerprint));
            inner.expires_at.remove(&keys::fingerprint_key(queue_id, &fingerprint));

            let now_secs = epoch_secs();
            if let Some(pos) = inner.positions.get_mut(&position_id) {
                pos.status = PositionStatus::Admitted;
                pos.admitted_at_secs = Some(now_secs);
            }

            return Ok(Some(DequeueOutcome {
                position_id,
                fingerprint,
                priority,
                admitted_at_secs: now_secs,
            }));
        }

        Ok(None)
    }

    async fn touch_atomic(
        &self,
        queue_id: &str,
        position_id: &str,
        now_secs: u64,
        ttl: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let status = inner.positions.get(position_id).map(|p| p.status);
        match status {
            Some(PositionStatus::Waiting) => {}
            _ => return Err(StoreError::NotFound),
        }

        if let Some(pos) = inner.positions.get_mut(position_id) {
            pos.last_heartbeat_at_secs = now_secs;
        }
        inner
            .ordered
            .entry(keys::liveness_set(queue_id))
            .or_default()
            .add(position_id, now_secs as f64);
        inner.expires_at.insert(keys::position_hash(position_id), Instant::now() + ttl);

        let fingerprint = inner.positions.get(position_id).map(|p| p.fingerprint.clone());
        if let Some(fp) = fingerprint {
            let fp_key = keys::fingerprint_key(queue_id, &fp);
            inner.expires_at.insert(fp_key, Instant::now() + ttl);
        }
        Ok(())
    }

    async fn cancel_atomic(
        &self,
        queue_id: &str,
        position_id: &str,
        grace: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let Some(priority) = inner.positions.get(position_id).map(|p| p.priority) else {
            return Err(StoreError::NotFound);
        };

        let list_key = keys::priority_list(queue_id, priority.as_u8());
        if let Some(list) = inner.lists.get_mut(&list_key) {
            list.retain(|id| id != position_id);
        }
        inner.ordered.get_mut(&keys::rank_set(queue_id)).map(|s| s.remove(position_id));
        inner.ordered.get_mut(&keys::liveness_set(queue_id)).map(|s| s.remove(position_id));

        if let Some(pos) = inner.positions.get_mut(position_id) {
            pos.status = PositionStatus::Cancelled;
        }
        inner.expires_at.insert(keys::position_hash(position_id), Instant::now() + grace);
        Ok(())
    }

    async fn expire_batch_atomic(
        &self,
        queue_id: &str,
        cutoff_secs: u64,
        limit: u64,
        grace: Duration,
        _cancel: &CancellationToken,
    ) -> Result<ExpireBatchOutcome, StoreError> {
        let mut inner = self.inner.lock();

        let stale: Vec<String> = inner
            .ordered
            .get(&keys::liveness_set(queue_id))
            .map(|s| s.range_by_score(f64::NEG_INFINITY, cutoff_secs as f64, limit))
            .unwrap_or_default();

        let mut expired = Vec::with_capacity(stale.len());
        for position_id in stale {
            let removed =
                inner.ordered.get_mut(&keys::liveness_set(queue_id)).map(|s| s.remove(&position_id)).unwrap_or(false);
            if !removed {
                // Another reaper instance already won the race for this id.
                continue;
            }

            let priority = inner.positions.get(&position_id).map(|p| p.priority);
            if let Some(priority) = priority {
                let list_key = keys::priority_list(queue_id, priority.as_u8());
                if let Some(list) = inner.lists.get_mut(&list_key) {
                    list.retain(|id| id != &position_id);
                }
            }
            inner.ordered.get_mut(&keys::rank_set(queue_id)).map(|s| s.remove(&position_id));

            let now_secs = epoch_secs();
            if let Some(pos) = inner.positions.get_mut(&position_id) {
                pos.status = PositionStatus::Expired;
                pos.expired_at_secs = Some(now_secs);
                pos.expiry_reason = Some("heartbeat-timeout".to_owned());
            }
            inner.expires_at.insert(keys::position_hash(&position_id), Instant::now() + grace);
            expired.push(position_id);
        }

        Ok(ExpireBatchOutcome { expired_position_ids: expired })
    }

    async fn try_admit_atomic(
        &self,
        queue_id: &str,
        capacity: u64,
        rate_per_sec: f64,
        _cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let now = epoch_secs() as f64;
        let bucket = inner.buckets.entry(queue_id.to_owned()).or_insert(Bucket {
            tokens: capacity as f64,
            last_refill_secs: now,
        });

        let elapsed = (now - bucket.last_refill_secs).max(0.0);
        let refill = elapsed * rate_per_sec;
        bucket.tokens = (bucket.tokens + refill).min(capacity as f64);
        bucket.last_refill_secs = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn return_token_atomic(
        &self,
        queue_id: &str,
        capacity: u64,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(bucket) = inner.buckets.get_mut(queue_id) {
            bucket.tokens = (bucket.tokens + 1.0).min(capacity as f64);
        }
        Ok(())
    }

    async fn link_position_session(
        &self,
        position_id: &str,
        session_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let position = inner.positions.get_mut(position_id).ok_or(StoreError::NotFound)?;
        position.session_id = Some(session_id.to_owned());
        Ok(())
    }

    async fn create_session_atomic(
        &self,
        session: ActiveSession,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        self.inner.lock().sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(
        &self,
        session_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<ActiveSession>, StoreError> {
        Ok(self.inner.lock().sessions.get(session_id).cloned())
    }

    async fn record_activity_atomic(
        &self,
        session_id: &str,
        now_secs: u64,
        _cancel: &CancellationToken,
    ) -> Result<ActiveSession, StoreError> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.get_mut(session_id).ok_or(StoreError::NotFound)?;
        session.view_count += 1;
        session.last_activity_at_secs = now_secs;
        Ok(session.clone())
    }

    async fn terminate_session_atomic(
        &self,
        session_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.get_mut(session_id).ok_or(StoreError::NotFound)?;
        session.status = crate::model::SessionStatus::Terminated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    fn descriptor() -> QueueDescriptor {
        QueueDescriptor {
            name: "q1".into(),
            target_url: "https://example.com".into(),
            max_active: 10,
            max_size: 0,
            admission_rate: 1.0,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 60,
            grace_period_secs: 30,
            status: crate::model::QueueStatus::Active,
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_fingerprint() {
        let store = MemoryStore::new();
        let cancel = token();
        store.put_descriptor("q1", &descriptor(), &cancel).await.unwrap();

        let req = |fp: &str| EnqueueRequest {
            queue_id: "q1".into(),
            priority: Priority::Normal,
            fingerprint: fp.into(),
            user_agent_hash: None,
            metadata: serde_json::json!({}),
            now_micros: epoch_micros(),
            ttl: Duration::from_secs(90),
        };

        let first = store.enqueue_atomic(req("fp-a"), &cancel).await.unwrap();
        assert_eq!(first.kind, EnqueueKind::Created);
        let second = store.enqueue_atomic(req("fp-a"), &cancel).await.unwrap();
        assert_eq!(second.kind, EnqueueKind::Existing);
        assert_eq!(second.position_id, first.position_id);
        assert_eq!(store.length(&keys::rank_set("q1"), &cancel).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dequeue_honours_priority_order() {
        let store = MemoryStore::new();
        let cancel = token();
        store.put_descriptor("q1", &descriptor(), &cancel).await.unwrap();

        let priorities = [
            ("a", Priority::Normal),
            ("b", Priority::Normal),
            ("c", Priority::Vip),
            ("d", Priority::Normal),
            ("e", Priority::PremiumImmediate),
        ];
        for (fp, priority) in priorities {
            store
                .enqueue_atomic(
                    EnqueueRequest {
                        queue_id: "q1".into(),
                        priority,
                        fingerprint: fp.into(),
                        user_agent_hash: None,
                        metadata: serde_json::json!({}),
                        now_micros: epoch_micros(),
                        ttl: Duration::from_secs(90),
                    },
                    &cancel,
                )
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_micros(2)).await;
        }

        let mut order = Vec::new();
        while let Some(out) = store.dequeue_atomic("q1", &cancel).await.unwrap() {
            order.push(out.fingerprint);
        }
        assert_eq!(order, vec!["e", "c", "a", "b", "d"]);
    }

    #[tokio::test]
    async fn queue_full_rejects_enqueue_at_max_size() {
        let store = MemoryStore::new();
        let cancel = token();
        let mut d = descriptor();
        d.max_size = 1;
        store.put_descriptor("q1", &d, &cancel).await.unwrap();

        store
            .enqueue_atomic(
                EnqueueRequest {
                    queue_id: "q1".into(),
                    priority: Priority::Normal,
                    fingerprint: "a".into(),
                    user_agent_hash: None,
                    metadata: serde_json::json!({}),
                    now_micros: epoch_micros(),
                    ttl: Duration::from_secs(90),
                },
                &cancel,
            )
            .await
            .unwrap();

        let err = store
            .enqueue_atomic(
                EnqueueRequest {
                    queue_id: "q1".into(),
                    priority: Priority::Normal,
                    fingerprint: "b".into(),
                    user_agent_hash: None,
                    metadata: serde_json::json!({}),
                    now_micros: epoch_micros(),
                    ttl: Duration::from_secs(90),
                },
                &cancel,
            )
            .await;
        assert!(matches!(err, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn touch_fails_after_expiry_race() {
        let store = MemoryStore::new();
        let cancel = token();
        store.put_descriptor("q1", &descriptor(), &cancel).await.unwrap();

        let out = store
            .enqueue_atomic(
                EnqueueRequest {
                    queue_id: "q1".into(),
                    priority: Priority::Normal,
                    fingerprint: "a".into(),
                    user_agent_hash: None,
                    metadata: serde_json::json!({}),
                    now_micros: epoch_micros(),
                    ttl: Duration::from_secs(90),
                },
                &cancel,
            )
            .await
            .unwrap();

        let expired =
            store.expire_batch_atomic("q1", epoch_secs() + 1, 100, Duration::from_secs(30), &cancel).await.unwrap();
        assert_eq!(expired.expired_position_ids, vec![out.position_id.clone()]);

        let err = store.touch_atomic("q1", &out.position_id, epoch_secs(), Duration::from_secs(90), &cancel).await;
        assert!(matches!(err, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn try_admit_respects_capacity() {
        let store = MemoryStore::new();
        let cancel = token();
        let mut ok_count = 0;
        for _ in 0..10 {
            if store.try_admit_atomic("q1", 3, 0.0, &cancel).await.unwrap() {
                ok_count += 1;
            }
        }
        assert_eq!(ok_count, 3);
    }
}
