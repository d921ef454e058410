// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateless bearer credentials (spec §4.B): a dot-separated, base64url
//! envelope of `header.payload.signature`, in the same shape OAuth/JWT
//! bearer tokens use, but signed with Ed25519 rather than parsed by a
//! general-purpose JWT crate — the waiting-room only ever mints and
//! verifies its own two credential kinds.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::key::KeyRing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Issued while a client holds a waiting-room position.
    Waiting,
    /// Issued once a client has been admitted to the protected origin.
    Admitted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    alg: String,
    kid: String,
}

/// Claims carried by a credential (spec §4.B, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub kind: CredentialKind,
    /// Position id (waiting) or session id (admitted).
    pub sub: String,
    pub queue_id: String,
    /// Salted hash of the client fingerprint this credential is bound to.
    pub fingerprint_hash: String,
    pub iat: u64,
    pub exp: u64,
    /// Credential id, used as the revocation-index key.
    pub jti: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("malformed credential envelope")]
    Malformed,
    #[error("unknown signing key")]
    UnknownKey,
    #[error("signature verification failed")]
    BadSignature,
    #[error("credential expired")]
    Expired,
}

/// Encode `claims`, signed by the key ring's active key, as `header.payload.signature`.
pub fn encode(key_ring: &KeyRing, claims: &Claims) -> String {
    let header = Header { alg: "Ed25519".to_owned(), kid: key_ring.active_kid().to_owned() };
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap_or_default());
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = key_ring.sign(signing_input.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(signature);
    format!("{signing_input}.{signature_b64}")
}

/// Decode and verify a credential's signature, returning its claims.
///
/// Does not check `exp`/`iat` against the current time or consult the
/// revocation index — callers combine this with their own clock and store
/// lookup (see [`super::service::CredentialService::validate`]).
pub fn decode(key_ring: &KeyRing, token: &str) -> Result<Claims, CredentialError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CredentialError::Malformed);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_b64).map_err(|_| CredentialError::Malformed)?;
    let header: Header = serde_json::from_slice(&header_bytes).map_err(|_| CredentialError::Malformed)?;
    if header.alg != "Ed25519" {
        return Err(CredentialError::Malformed);
    }

    let signature = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|_| CredentialError::Malformed)?;
    let signing_input = format!("{header_b64}.{payload_b64}");
    if !key_ring.verify(&header.kid, signing_input.as_bytes(), &signature) {
        return Err(CredentialError::BadSignature);
    }

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| CredentialError::Malformed)?;
    serde_json::from_slice(&payload_bytes).map_err(|_| CredentialError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::super::key::SigningKey;
    use super::*;

    fn ring() -> KeyRing {
        KeyRing::new(SigningKey::generate("k1").unwrap())
    }

    fn claims() -> Claims {
        Claims {
            kind: CredentialKind::Waiting,
            sub: "pos-1".into(),
            queue_id: "q1".into(),
            fingerprint_hash: "abc".into(),
            iat: 1000,
            exp: 2000,
            jti: "cred-1".into(),
        }
    }

    #[test]
    fn round_trips() {
        let key_ring = ring();
        let token = encode(&key_ring, &claims());
        let decoded = decode(&key_ring, &token).unwrap();
        assert_eq!(decoded.sub, "pos-1");
        assert_eq!(decoded.kind, CredentialKind::Waiting);
    }

    #[test]
    fn rejects_tampered_payload() {
        let key_ring = ring();
        let token = encode(&key_ring, &claims());
        let mut parts: Vec<&str> = token.split('.').collect();
        let tampered_payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"evil"}"#);
        parts[1] = &tampered_payload;
        let tampered = parts.join(".");
        assert!(matches!(decode(&ring(), &tampered), Err(CredentialError::BadSignature)));
    }

    #[test]
    fn rejects_wrong_key_ring() {
        let token = encode(&ring(), &claims());
        let other = ring();
        assert!(matches!(decode(&other, &token), Err(CredentialError::UnknownKey | CredentialError::BadSignature)));
    }
}
