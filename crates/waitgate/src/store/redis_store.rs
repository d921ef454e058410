// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis-backed `StoreAdapter`: the production path (spec §9, "pluggable
//! store"). Cross-key invariants run as `redis::Script` (Lua) so a whole
//! enqueue/dequeue/expire-batch/try-admit executes as one round trip with no
//! room for another server-side instance to interleave a conflicting write.
//!
//! `rank`/`length` here are the true `ZRANK`/`ZCARD` the spec's `O(log N)`
//! bound names — this is the backend [`super::memory::MemoryStore`]'s doc
//! comment defers to.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{ActiveSession, Position, Priority, QueueDescriptor};

use super::{
    keys, DequeueOutcome, EnqueueKind, EnqueueOutcome, EnqueueRequest, ExpireBatchOutcome,
    StoreAdapter, StoreError,
};

fn map_err(e: redis::RedisError) -> StoreError {
    if e.is_connection_dropped() || e.is_timeout() || e.is_io_error() {
        StoreError::Transient(e.to_string())
    } else {
        StoreError::Fatal(e.to_string())
    }
}

/// Connects to a Redis (or Redis-protocol-compatible) server.
pub struct RedisStore {
    conn: ConnectionManager,
    enqueue_script: Script,
    dequeue_script: Script,
    touch_script: Script,
    cancel_script: Script,
    expire_batch_script: Script,
    try_admit_script: Script,
    return_token_script: Script,
    record_activity_script: Script,
}

impl RedisStore {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(addr)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            enqueue_script: Script::new(ENQUEUE_LUA),
            dequeue_script: Script::new(DEQUEUE_LUA),
            touch_script: Script::new(TOUCH_LUA),
            cancel_script: Script::new(CANCEL_LUA),
            expire_batch_script: Script::new(EXPIRE_BATCH_LUA),
            try_admit_script: Script::new(TRY_ADMIT_LUA),
            return_token_script: Script::new(RETURN_TOKEN_LUA),
            record_activity_script: Script::new(RECORD_ACTIVITY_LUA),
        })
    }
}

// Each script takes the keys it touches as Lua KEYS so Redis Cluster's
// hash-slot rules stay satisfied, and the rest as ARGV.

const ENQUEUE_LUA: &str = r#"
local rank_key = KEYS[1]
local liveness_key = KEYS[2]
local fp_key = KEYS[3]
local position_key = KEYS[4]
local priority_list_key = KEYS[5]
local counter_key = KEYS[6]

local queue_id = ARGV[1]
local priority = tonumber(ARGV[2])
local fingerprint = ARGV[3]
local position_id = ARGV[4]
local now_secs = tonumber(ARGV[5])
local ttl = tonumber(ARGV[6])
local user_agent_hash = ARGV[7]
local metadata_json = ARGV[8]
local now_micros = ARGV[9]
local band = tonumber(ARGV[10])

local existing = redis.call('GET', fp_key)
if existing then
    local existing_status = redis.call('HGET', 'position:' .. existing, 'status')
    if existing_status == 'waiting' then
        local rank = redis.call('ZRANK', rank_key, existing)
        local length = redis.call('ZCARD', rank_key)
        return {'existing', existing, tostring(rank), tostring(length)}
    end
end

local weight = 3 - priority
local counter = redis.call('INCR', counter_key)
local score = weight * band + counter

redis.call('RPUSH', priority_list_key, position_id)
redis.call('ZADD', rank_key, score, position_id)
redis.call('ZADD', liveness_key, now_secs, position_id)
redis.call('HSET', position_key,
    'id', position_id,
    'queue_id', queue_id,
    'priority', priority,
    'status', 'waiting',
    'enqueued_at_micros', now_micros,
    'last_heartbeat_at_secs', now_secs,
    'fingerprint', fingerprint,
    'user_agent_hash', user_agent_hash,
    'metadata', metadata_json)
redis.call('EXPIRE', position_key, ttl)
redis.call('SET', fp_key, position_id, 'EX', ttl)

local rank = redis.call('ZRANK', rank_key, position_id)
local length = redis.call('ZCARD', rank_key)
return {'created', position_id, tostring(rank), tostring(length)}
"#;

const DEQUEUE_LUA: &str = r#"
local rank_key = KEYS[1]
local liveness_key = KEYS[2]

local queue_id = ARGV[1]
local now_secs = ARGV[2]
local num_priorities = tonumber(ARGV[3])

for i = 1, num_priorities do
    local list_key = ARGV[3 + i]
    local position_id = redis.call('LPOP', list_key)
    if position_id then
        redis.call('ZREM', rank_key, position_id)
        redis.call('ZREM', liveness_key, position_id)
        local position_key = 'position:' .. position_id
        local fingerprint = redis.call('HGET', position_key, 'fingerprint')
        redis.call('DEL', 'queue:' .. queue_id .. ':fp:' .. fingerprint)
        redis.call('HSET', position_key, 'status', 'admitted', 'admitted_at_secs', now_secs)
        return {position_id, fingerprint}
    end
end
return nil
"#;

const TOUCH_LUA: &str = r#"
local liveness_key = KEYS[1]
local position_key = KEYS[2]
local fp_key = KEYS[3]

local position_id = ARGV[1]
local now_secs = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])

local status = redis.call('HGET', position_key, 'status')
if status ~= 'waiting' then
    return 0
end

redis.call('ZADD', liveness_key, now_secs, position_id)
redis.call('HSET', position_key, 'last_heartbeat_at_secs', now_secs)
redis.call('EXPIRE', position_key, ttl)
if fp_key ~= '' then
    redis.call('EXPIRE', fp_key, ttl)
end
return 1
"#;

const CANCEL_LUA: &str = r#"
local rank_key = KEYS[1]
local liveness_key = KEYS[2]
local position_key = KEYS[3]
local priority_list_key = KEYS[4]

local position_id = ARGV[1]
local grace = tonumber(ARGV[2])

local status = redis.call('HGET', position_key, 'status')
if not status then
    return 0
end

redis.call('LREM', priority_list_key, 0, position_id)
redis.call('ZREM', rank_key, position_id)
redis.call('ZREM', liveness_key, position_id)
redis.call('HSET', position_key, 'status', 'cancelled')
redis.call('EXPIRE', position_key, grace)
return 1
"#;

const EXPIRE_BATCH_LUA: &str = r#"
local rank_key = KEYS[1]
local liveness_key = KEYS[2]

local cutoff_secs = ARGV[1]
local limit = tonumber(ARGV[2])
local grace = tonumber(ARGV[3])
local now_secs = ARGV[4]
local num_priorities = tonumber(ARGV[5])

local stale = redis.call('ZRANGEBYSCORE', liveness_key, '-inf', cutoff_secs, 'LIMIT', 0, limit)
local expired = {}
for _, position_id in ipairs(stale) do
    local removed = redis.call('ZREM', liveness_key, position_id)
    if removed == 1 then
        redis.call('ZREM', rank_key, position_id)
        for i = 1, num_priorities do
            local list_key = ARGV[5 + i]
            redis.call('LREM', list_key, 0, position_id)
        end
        local position_key = 'position:' .. position_id
        redis.call('HSET', position_key, 'status', 'expired', 'expired_at_secs', now_secs, 'expiry_reason', 'heartbeat-timeout')
        redis.call('EXPIRE', position_key, grace)
        table.insert(expired, position_id)
    end
end
return expired
"#;

const TRY_ADMIT_LUA: &str = r#"
local bucket_key = KEYS[1]

local capacity = tonumber(ARGV[1])
local rate_per_sec = tonumber(ARGV[2])
local now_secs = tonumber(ARGV[3])

local tokens = tonumber(redis.call('HGET', bucket_key, 'tokens') or capacity)
local last_refill = tonumber(redis.call('HGET', bucket_key, 'last_refill_secs') or now_secs)

local elapsed = math.max(now_secs - last_refill, 0)
tokens = math.min(tokens + elapsed * rate_per_sec, capacity)

local admitted = 0
if tokens >= 1 then
    tokens = tokens - 1
    admitted = 1
end

redis.call('HSET', bucket_key, 'tokens', tokens, 'last_refill_secs', now_secs)
return admitted
"#;

const RETURN_TOKEN_LUA: &str = r#"
local bucket_key = KEYS[1]
local capacity = tonumber(ARGV[1])

local tokens = tonumber(redis.call('HGET', bucket_key, 'tokens') or capacity)
tokens = math.min(tokens + 1, capacity)
redis.call('HSET', bucket_key, 'tokens', tokens)
return 'ok'
"#;

const RECORD_ACTIVITY_LUA: &str = r#"
local session_key = KEYS[1]
local now_secs = ARGV[1]

local exists = redis.call('EXISTS', session_key)
if exists == 0 then
    return nil
end
redis.call('HINCRBY', session_key, 'view_count', 1)
redis.call('HSET', session_key, 'last_activity_at_secs', now_secs)
return redis.call('HGETALL', session_key)
"#;

#[async_trait]
impl StoreAdapter for RedisStore {
    async fn add_ordered(
        &self,
        key: &str,
        member: &str,
        score: f64,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await.map_err(map_err)
    }

    async fn remove_ordered(
        &self,
        key: &str,
        member: &str,
        _cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(key, member).await.map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn rank(
        &self,
        key: &str,
        member: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn.clone();
        conn.zrank(key, member).await.map_err(map_err)
    }

    async fn length(&self, key: &str, _cancel: &CancellationToken) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.zcard(key).await.map_err(map_err)
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: u64,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.zrangebyscore_limit(key, min, max, 0, limit as isize).await.map_err(map_err)
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, &str)],
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let owned: Vec<(String, String)> =
            fields.iter().map(|(f, v)| ((*f).to_owned(), (*v).to_owned())).collect();
        conn.hset_multiple::<_, _, _, ()>(key, &owned).await.map_err(map_err)
    }

    async fn hash_get(
        &self,
        key: &str,
        field: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(map_err)
    }

    async fn hash_get_all(
        &self,
        key: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<HashMap<String, String>>, StoreError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(key).await.map_err(map_err)?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    async fn expire(
        &self,
        key: &str,
        ttl: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl.as_secs() as i64).await.map_err(map_err)
    }

    async fn delete(&self, key: &str, _cancel: &CancellationToken) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(map_err)
    }

    async fn get(&self, key: &str, _cancel: &CancellationToken) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_err)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await.map_err(map_err)
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        _cancel: &CancellationToken,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.incr(key, delta).await.map_err(map_err)
    }

    async fn now_secs(&self, _cancel: &CancellationToken) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let (secs, _micros): (i64, i64) =
            redis::cmd("TIME").query_async(&mut conn).await.map_err(map_err)?;
        Ok(secs as u64)
    }

    async fn put_descriptor(
        &self,
        queue_id: &str,
        descriptor: &QueueDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(descriptor)
            .map_err(|e| StoreError::Fatal(format!("encode descriptor: {e}")))?;
        self.hash_set(keys::descriptor_hash(), &[(queue_id, &json)], cancel).await
    }

    async fn get_descriptor(
        &self,
        queue_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<QueueDescriptor>, StoreError> {
        let Some(json) = self.hash_get(keys::descriptor_hash(), queue_id, cancel).await? else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StoreError::Fatal(format!("decode descriptor: {e}")))
    }

    async fn list_queue_ids(&self, cancel: &CancellationToken) -> Result<Vec<String>, StoreError> {
        Ok(self
            .hash_get_all(keys::descriptor_hash(), cancel)
            .await?
            .map(|m| m.into_keys().collect())
            .unwrap_or_default())
    }

    async fn get_position(
        &self,
        position_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Position>, StoreError> {
        let Some(map) = self.hash_get_all(&keys::position_hash(position_id), cancel).await? else {
            return Ok(None);
        };
        parse_position(&map)
    }

    async fn lookup_fingerprint(
        &self,
        queue_id: &str,
        fingerprint: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(keys::fingerprint_key(queue_id, fingerprint)).await.map_err(map_err)
    }

    async fn enqueue_atomic(
        &self,
        req: EnqueueRequest,
        _cancel: &CancellationToken,
    ) -> Result<EnqueueOutcome, StoreError> {
        let position_id = Uuid::new_v4().to_string();
        let now_secs = req.now_micros / 1_000_000;
        let ttl = req.ttl.as_secs().max(1);
        let metadata_json =
            serde_json::to_string(&req.metadata).map_err(|e| StoreError::Fatal(e.to_string()))?;

        let mut conn = self.conn.clone();
        let result: Vec<String> = self
            .enqueue_script
            .key(keys::rank_set(&req.queue_id))
            .key(keys::liveness_set(&req.queue_id))
            .key(keys::fingerprint_key(&req.queue_id, &req.fingerprint))
            .key(keys::position_hash(&position_id))
            .key(keys::priority_list(&req.queue_id, req.priority.as_u8()))
            .key(keys::enqueue_counter(&req.queue_id))
            .arg(&req.queue_id)
            .arg(req.priority.as_u8())
            .arg(&req.fingerprint)
            .arg(&position_id)
            .arg(now_secs)
            .arg(ttl)
            .arg(req.user_agent_hash.as_deref().unwrap_or(""))
            .arg(&metadata_json)
            .arg(req.now_micros)
            .arg(super::PRIORITY_BAND)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;

        let kind = match result[0].as_str() {
            "existing" => EnqueueKind::Existing,
            _ => EnqueueKind::Created,
        };
        let rank: u64 = result[2].parse().unwrap_or(0);
        let queue_length: u64 = result[3].parse().unwrap_or(0);

        Ok(EnqueueOutcome { kind, position_id: result[1].clone(), rank, queue_length })
    }

    async fn dequeue_atomic(
        &self,
        queue_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DequeueOutcome>, StoreError> {
        let mut conn = self.conn.clone();
        let now_secs = self.now_secs(cancel).await?;

        let mut invocation = self.dequeue_script.prepare_invoke();
        invocation
            .key(keys::rank_set(queue_id))
            .key(keys::liveness_set(queue_id))
            .arg(queue_id)
            .arg(now_secs)
            .arg(Priority::ALL_DESCENDING.len());
        for priority in Priority::ALL_DESCENDING {
            invocation.arg(keys::priority_list(queue_id, priority.as_u8()));
        }

        let result: Option<(String, String)> = invocation.invoke_async(&mut conn).await.map_err(map_err)?;
        let Some((position_id, fingerprint)) = result else {
            return Ok(None);
        };

        let position = self.get_position(&position_id, cancel).await?;
        let priority = position.map(|p| p.priority).unwrap_or(Priority::Normal);

        Ok(Some(DequeueOutcome { position_id, fingerprint, priority, admitted_at_secs: now_secs }))
    }

    async fn touch_atomic(
        &self,
        queue_id: &str,
        position_id: &str,
        now_secs: u64,
        ttl: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let position = self.get_position(position_id, _cancel).await?;
        let fp_key = position
            .map(|p| keys::fingerprint_key(queue_id, &p.fingerprint))
            .unwrap_or_default();

        let mut conn = self.conn.clone();
        let ok: i64 = self
            .touch_script
            .key(keys::liveness_set(queue_id))
            .key(keys::position_hash(position_id))
            .key(fp_key)
            .arg(position_id)
            .arg(now_secs)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;

        if ok == 1 {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn cancel_atomic(
        &self,
        queue_id: &str,
        position_id: &str,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let position = self.get_position(position_id, cancel).await?.ok_or(StoreError::NotFound)?;
        let mut conn = self.conn.clone();
        let ok: i64 = self
            .cancel_script
            .key(keys::rank_set(queue_id))
            .key(keys::liveness_set(queue_id))
            .key(keys::position_hash(position_id))
            .key(keys::priority_list(queue_id, position.priority.as_u8()))
            .arg(position_id)
            .arg(grace.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;

        if ok == 1 {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn expire_batch_atomic(
        &self,
        queue_id: &str,
        cutoff_secs: u64,
        limit: u64,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExpireBatchOutcome, StoreError> {
        let now_secs = self.now_secs(cancel).await?;
        let mut conn = self.conn.clone();

        let mut invocation = self.expire_batch_script.prepare_invoke();
        invocation
            .key(keys::rank_set(queue_id))
            .key(keys::liveness_set(queue_id))
            .arg(cutoff_secs)
            .arg(limit)
            .arg(grace.as_secs().max(1))
            .arg(now_secs)
            .arg(Priority::ALL_DESCENDING.len());
        for priority in Priority::ALL_DESCENDING {
            invocation.arg(keys::priority_list(queue_id, priority.as_u8()));
        }

        let expired: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(map_err)?;
        Ok(ExpireBatchOutcome { expired_position_ids: expired })
    }

    async fn try_admit_atomic(
        &self,
        queue_id: &str,
        capacity: u64,
        rate_per_sec: f64,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        let now_secs = self.now_secs(cancel).await?;
        let mut conn = self.conn.clone();
        let admitted: i64 = self
            .try_admit_script
            .key(keys::bucket(queue_id))
            .arg(capacity)
            .arg(rate_per_sec)
            .arg(now_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(admitted == 1)
    }

    async fn return_token_atomic(
        &self,
        queue_id: &str,
        capacity: u64,
        _cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = self
            .return_token_script
            .key(keys::bucket(queue_id))
            .arg(capacity)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn link_position_session(
        &self,
        position_id: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let exists = self.hash_get(&keys::position_hash(position_id), "id", cancel).await?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }
        self.hash_set(&keys::position_hash(position_id), &[("session_id", session_id)], cancel).await
    }

    async fn create_session_atomic(
        &self,
        session: ActiveSession,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let key = format!("session:{}", session.id);
        self.hash_set(
            &key,
            &[
                ("queue_id", session.queue_id.as_str()),
                ("position_id", session.position_id.as_str()),
                ("issued_at_secs", &session.issued_at_secs.to_string()),
                ("expires_at_secs", &session.expires_at_secs.to_string()),
                ("last_activity_at_secs", &session.last_activity_at_secs.to_string()),
                ("view_count", &session.view_count.to_string()),
                ("status", "active"),
            ],
            cancel,
        )
        .await?;
        let ttl = Duration::from_secs(session.expires_at_secs.saturating_sub(session.issued_at_secs).max(1));
        self.expire(&key, ttl, cancel).await
    }

    async fn get_session(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ActiveSession>, StoreError> {
        let Some(map) = self.hash_get_all(&format!("session:{session_id}"), cancel).await? else {
            return Ok(None);
        };
        parse_session(session_id, &map)
    }

    async fn record_activity_atomic(
        &self,
        session_id: &str,
        now_secs: u64,
        _cancel: &CancellationToken,
    ) -> Result<ActiveSession, StoreError> {
        let mut conn = self.conn.clone();
        let pairs: Option<Vec<String>> = self
            .record_activity_script
            .key(format!("session:{session_id}"))
            .arg(now_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        let Some(pairs) = pairs else {
            return Err(StoreError::NotFound);
        };
        let map: HashMap<String, String> =
            pairs.chunks(2).filter(|c| c.len() == 2).map(|c| (c[0].clone(), c[1].clone())).collect();
        parse_session(session_id, &map)?.ok_or(StoreError::NotFound)
    }

    async fn terminate_session_atomic(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let key = format!("session:{session_id}");
        let exists = self.hash_get(&key, "status", cancel).await?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }
        self.hash_set(&key, &[("status", "terminated")], cancel).await
    }
}

fn parse_position(map: &HashMap<String, String>) -> Result<Option<Position>, StoreError> {
    let get = |field: &str| map.get(field).cloned().ok_or_else(|| StoreError::Fatal(format!("position missing field {field}")));
    let parse_u64 = |field: &str| -> Result<u64, StoreError> {
        get(field)?.parse().map_err(|_| StoreError::Fatal(format!("bad u64 field {field}")))
    };

    let status = match map.get("status").map(String::as_str) {
        Some("waiting") => crate::model::PositionStatus::Waiting,
        Some("admitted") => crate::model::PositionStatus::Admitted,
        Some("expired") => crate::model::PositionStatus::Expired,
        Some("completed") => crate::model::PositionStatus::Completed,
        Some("cancelled") => crate::model::PositionStatus::Cancelled,
        _ => return Err(StoreError::Fatal("position has unknown status".into())),
    };
    let priority = get("priority")?
        .parse::<u8>()
        .ok()
        .and_then(Priority::from_u8)
        .ok_or_else(|| StoreError::Fatal("position has unknown priority".into()))?;
    let metadata = get("metadata")
        .ok()
        .and_then(|m| serde_json::from_str(&m).ok())
        .unwrap_or(serde_json::Value::Null);
    let user_agent_hash = map.get("user_agent_hash").filter(|s| !s.is_empty()).cloned();

    Ok(Some(Position {
        id: get("id")?,
        queue_id: get("queue_id")?,
        priority,
        status,
        enqueued_at_micros: parse_u64("enqueued_at_micros")?,
        last_heartbeat_at_secs: parse_u64("last_heartbeat_at_secs")?,
        fingerprint: get("fingerprint")?,
        user_agent_hash,
        metadata,
        admitted_at_secs: map.get("admitted_at_secs").and_then(|s| s.parse().ok()),
        expired_at_secs: map.get("expired_at_secs").and_then(|s| s.parse().ok()),
        expiry_reason: map.get("expiry_reason").filter(|s| !s.is_empty()).cloned(),
        session_id: map.get("session_id").filter(|s| !s.is_empty()).cloned(),
    }))
}

fn parse_session(
    session_id: &str,
    map: &HashMap<String, String>,
) -> Result<Option<ActiveSession>, StoreError> {
    let get = |field: &str| map.get(field).cloned().ok_or_else(|| StoreError::Fatal(format!("session missing field {field}")));
    let parse_u64 = |field: &str| -> Result<u64, StoreError> {
        get(field)?.parse().map_err(|_| StoreError::Fatal(format!("bad u64 field {field}")))
    };

    let status = match map.get("status").map(String::as_str) {
        Some("active") => crate::model::SessionStatus::Active,
        Some("expired") => crate::model::SessionStatus::Expired,
        Some("terminated") => crate::model::SessionStatus::Terminated,
        _ => return Err(StoreError::Fatal("session has unknown status".into())),
    };

    Ok(Some(ActiveSession {
        id: session_id.to_owned(),
        queue_id: get("queue_id")?,
        position_id: get("position_id")?,
        issued_at_secs: parse_u64("issued_at_secs")?,
        expires_at_secs: parse_u64("expires_at_secs")?,
        last_activity_at_secs: parse_u64("last_activity_at_secs")?,
        view_count: parse_u64("view_count")?,
        status,
    }))
}
