//! Hash derivations and envelope signing
//!
//! All derivations use BLAKE3 with domain separation prefixes. The envelope
//! signature is an HMAC-style keyed BLAKE3 over the content hash; no
//! asymmetric scheme is required by the container contract.

use blake3::Hasher;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain prefix for container content hashes
pub const DOMAIN_CONTENT: &[u8] = b"concord-content";
/// Domain prefix for envelope signatures
pub const DOMAIN_SIGNATURE: &[u8] = b"concord-sig";
/// Domain prefix for raw event idempotence hashes
pub const DOMAIN_RAW_EVENT: &[u8] = b"concord-raw-event";
/// Domain prefix for canonical content dedup hashes
pub const DOMAIN_CANONICAL: &[u8] = b"concord-canonical";

/// 32-byte content-address hash of an encoded DTU buffer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Keyed-BLAKE3 signature over a content hash.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeSignature(pub [u8; 32]);

impl EnvelopeSignature {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Substrate signing key for envelope signatures.
#[derive(Clone)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    /// Create from seed bytes (for deterministic recovery and testing).
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(seed)
    }

    /// Sign a content hash.
    ///
    /// `sig = BLAKE3_KEYED(key, "concord-sig" || content_hash)`
    pub fn sign(&self, content: &ContentHash) -> EnvelopeSignature {
        let mut hasher = Hasher::new_keyed(&self.0);
        hasher.update(DOMAIN_SIGNATURE);
        hasher.update(&content.0);
        EnvelopeSignature(*hasher.finalize().as_bytes())
    }

    /// Verify a signature against a content hash.
    pub fn verify(&self, content: &ContentHash, signature: &EnvelopeSignature) -> bool {
        self.sign(content) == *signature
    }
}

/// Compute the content hash of an encoded container buffer.
///
/// `hash = BLAKE3("concord-content" || buffer)`
pub fn content_hash(buffer: &[u8]) -> ContentHash {
    let mut hasher = Hasher::new();
    hasher.update(DOMAIN_CONTENT);
    hasher.update(buffer);
    ContentHash(*hasher.finalize().as_bytes())
}

/// Compute the canonical dedup hash of arbitrary content bytes.
pub fn canonical_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Hasher::new();
    hasher.update(DOMAIN_CANONICAL);
    hasher.update(content);
    ContentHash(*hasher.finalize().as_bytes())
}

/// Idempotence hash of a raw event: the first 16 hex chars of the digest
/// over (type, data, id).
pub fn raw_event_hash(event_type: &str, data: &serde_json::Value, event_id: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(DOMAIN_RAW_EVENT);
    hasher.update(event_type.as_bytes());
    hasher.update(data.to_string().as_bytes());
    hasher.update(event_id.as_bytes());
    hex::encode(hasher.finalize().as_bytes())[..16].to_string()
}

/// Generate a fresh DTU id with the given prefix, e.g. `evtdtu_3fa81c...`.
pub fn generate_id(prefix: &str) -> String {
    let mut raw = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut raw);
    format!("{}_{}", prefix, hex::encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_deterministic() {
        let h1 = content_hash(b"payload");
        let h2 = content_hash(b"payload");
        assert_eq!(h1, h2);
        assert_ne!(h1, content_hash(b"other"));
    }

    #[test]
    fn test_domain_separation() {
        // Same bytes, different domains, different hashes.
        assert_ne!(content_hash(b"x").0, canonical_hash(b"x").0);
    }

    #[test]
    fn test_signature_roundtrip() {
        let key = SigningKey::from_seed([7; 32]);
        let hash = content_hash(b"buffer");
        let sig = key.sign(&hash);
        assert!(key.verify(&hash, &sig));

        let other = SigningKey::from_seed([8; 32]);
        assert!(!other.verify(&hash, &sig));
    }

    #[test]
    fn test_raw_event_hash_shape() {
        let data = serde_json::json!({"decision": "approved"});
        let hash = raw_event_hash("council:vote", &data, "evt_1");
        assert_eq!(hash.len(), 16);
        assert_eq!(hash, raw_event_hash("council:vote", &data, "evt_1"));
        assert_ne!(hash, raw_event_hash("council:vote", &data, "evt_2"));
    }

    #[test]
    fn test_id_prefix() {
        let id = generate_id("evtdtu");
        assert!(id.starts_with("evtdtu_"));
        assert_eq!(id.len(), "evtdtu_".len() + 16);
    }
}
