// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential issuance, validation, and client fingerprinting (spec §4.B).

pub mod claims;
pub mod key;
pub mod service;

pub use claims::CredentialKind;
pub use service::CredentialService;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Salted hash of `(ip, user_agent)`, the client fingerprint spec §3/§4.B
/// binds credentials to. Salting keeps the hash from being reversible to the
/// raw IP/UA pair while staying stable across requests from the same client.
pub fn compute_fingerprint(salt: &str, ip: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"|");
    hasher.update(ip.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Constant-time comparison of two fingerprint hashes, so a timing side
/// channel can't be used to guess a bound fingerprint one byte at a time.
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_salt_sensitive() {
        let a = compute_fingerprint("salt1", "1.2.3.4", "curl/8");
        let b = compute_fingerprint("salt1", "1.2.3.4", "curl/8");
        let c = compute_fingerprint("salt2", "1.2.3.4", "curl/8");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn match_uses_constant_time_eq() {
        assert!(fingerprints_match("abc", "abc"));
        assert!(!fingerprints_match("abc", "abd"));
    }
}
