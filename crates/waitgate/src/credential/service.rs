// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Issues, validates, and revokes bearer credentials (spec §4.B).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::WaitError;
use crate::store::{keys, StoreAdapter};

use super::claims::{self, Claims, CredentialError, CredentialKind};
use super::key::KeyRing;

pub struct CredentialService {
    key_ring: RwLock<KeyRing>,
    store: Arc<dyn StoreAdapter>,
    clock_skew: Duration,
}

impl CredentialService {
    pub fn new(key_ring: KeyRing, store: Arc<dyn StoreAdapter>, clock_skew: Duration) -> Self {
        Self { key_ring: RwLock::new(key_ring), store, clock_skew }
    }

    fn now_secs() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }

    pub fn issue(&self, kind: CredentialKind, sub: &str, queue_id: &str, fingerprint_hash: &str, ttl: Duration) -> String {
        let now = Self::now_secs();
        let claims = Claims {
            kind,
            sub: sub.to_owned(),
            queue_id: queue_id.to_owned(),
            fingerprint_hash: fingerprint_hash.to_owned(),
            iat: now,
            exp: now + ttl.as_secs(),
            jti: Uuid::new_v4().to_string(),
        };
        claims::encode(&self.key_ring.read(), &claims)
    }

    /// Decode, verify, and apply time/revocation/binding checks to `token`.
    ///
    /// `presented_fingerprint_hash` is checked against the credential's bound
    /// hash; a mismatch is rejected with `bound-mismatch` when `strict_bind`
    /// is set, and merely logged otherwise (spec §4.B, §9 open question).
    pub async fn validate(
        &self,
        token: &str,
        expect_kind: CredentialKind,
        presented_fingerprint_hash: &str,
        strict_bind: bool,
        cancel: &CancellationToken,
    ) -> Result<Claims, WaitError> {
        let claims = claims::decode(&self.key_ring.read(), token).map_err(|e| match e {
            CredentialError::Expired => WaitError::SessionExpired,
            _ => WaitError::Unauthorized,
        })?;

        if claims.kind != expect_kind {
            return Err(WaitError::Unauthorized);
        }

        let now = Self::now_secs();
        if now > claims.exp.saturating_add(self.clock_skew.as_secs()) {
            return Err(match claims.kind {
                CredentialKind::Waiting => WaitError::PositionExpired,
                CredentialKind::Admitted => WaitError::SessionExpired,
            });
        }

        if !super::fingerprints_match(&claims.fingerprint_hash, presented_fingerprint_hash) {
            if strict_bind {
                return Err(WaitError::BoundMismatch);
            }
            tracing::warn!(jti = %claims.jti, "fingerprint mismatch on non-strict credential, accepting anyway");
        }

        let revoked = self
            .store
            .get(&keys::revocation(&claims.jti), cancel)
            .await
            .map_err(|_| WaitError::InternalError)?;
        if revoked.is_some() {
            return Err(WaitError::Unauthorized);
        }

        Ok(claims)
    }

    pub async fn revoke(&self, claims: &Claims, cancel: &CancellationToken) -> Result<(), WaitError> {
        let now = Self::now_secs();
        let remaining = claims.exp.saturating_sub(now).max(1);
        self.store
            .set_with_ttl(&keys::revocation(&claims.jti), "1", Duration::from_secs(remaining), cancel)
            .await
            .map_err(|_| WaitError::InternalError)
    }

    pub fn rotate(&self, new_key: super::key::SigningKey) {
        self.key_ring.write().rotate(new_key);
    }
}
