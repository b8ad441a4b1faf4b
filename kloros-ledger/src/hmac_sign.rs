//! HMAC-SHA256 signing and verification over canonicalized byte payloads
//! (the envelope `signature` field). Key rotation keeps the last
//! `retain_last` keys acceptable for verification: the default is to keep
//! the last N keys (N=2) and accept signatures from any of them (see
//! DESIGN.md).

use crate::error::{LedgerError, Result};
use hmac::{Hmac, Mac};
use kloros_bus::Facts;
use kloros_config::KeyRingConfig;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A decoded HMAC signing/verification key ring.
#[derive(Debug, Clone)]
pub struct KeyRing {
    active_id: String,
    keys: Vec<(String, Vec<u8>)>,
}

impl KeyRing {
    /// Decode a `KeyRingConfig` loaded by `kloros-config` into usable key
    /// bytes. Every `secret_hex` must be valid hex; malformed entries are
    /// skipped (they cannot have been produced by this system's own key
    /// rotation, so are treated as operator error rather than a fatal load).
    pub fn from_config(config: &KeyRingConfig) -> Self {
        let keys = config
            .keys
            .iter()
            .filter_map(|k| hex::decode(&k.secret_hex).ok().map(|bytes| (k.id.clone(), bytes)))
            .collect();
        Self {
            active_id: config.active_key_id.clone(),
            keys,
        }
    }

    /// Build a ring from raw bytes, for tests and for components that mint
    /// a throwaway key rather than loading `keys.toml`.
    pub fn single(id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        let id = id.into();
        Self {
            active_id: id.clone(),
            keys: vec![(id, secret.into())],
        }
    }

    /// Sign `bytes` with the active key, returning a hex-encoded MAC.
    pub fn sign(&self, bytes: &[u8]) -> Option<String> {
        let (_, secret) = self.keys.iter().find(|(id, _)| *id == self.active_id)?;
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(bytes);
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify `bytes` against `signature_hex`, accepting a match against
    /// any key currently in the ring (active or retired).
    pub fn verify(&self, bytes: &[u8], signature_hex: &str) -> bool {
        let Ok(expected) = hex::decode(signature_hex) else {
            return false;
        };
        self.keys.iter().any(|(_, secret)| {
            let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                return false;
            };
            mac.update(bytes);
            mac.verify_slice(&expected).is_ok()
        })
    }
}

/// Canonicalize a `Facts` payload to bytes for signing: `Facts` is a
/// `BTreeMap`, so `serde_json` already serializes keys in sorted order,
/// giving a stable byte representation independent of insertion order.
pub fn canonicalize_facts(facts: &Facts) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(facts).map_err(LedgerError::Canonicalize)?)
}

/// Sign a `Facts` payload, returning the hex signature to attach to an
/// `OBSERVATION` envelope.
pub fn sign_facts(ring: &KeyRing, facts: &Facts) -> Result<String> {
    let bytes = canonicalize_facts(facts)?;
    ring.sign(&bytes).ok_or(LedgerError::SignatureError)
}

/// Verify a `Facts` payload's attached signature.
pub fn verify_facts(ring: &KeyRing, facts: &Facts, signature_hex: &str) -> Result<()> {
    let bytes = canonicalize_facts(facts)?;
    if ring.verify(&bytes, signature_hex) {
        Ok(())
    } else {
        Err(LedgerError::SignatureError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_facts() -> Facts {
        let mut f = Facts::new();
        f.insert("zooid".into(), Value::String("lm_001".into()));
        f.insert("ok".into(), Value::Bool(true));
        f
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let ring = KeyRing::single("k1", vec![1, 2, 3, 4]);
        let facts = sample_facts();
        let sig = sign_facts(&ring, &facts).unwrap();
        assert!(verify_facts(&ring, &facts, &sig).is_ok());
    }

    #[test]
    fn tampered_facts_fail_verification() {
        let ring = KeyRing::single("k1", vec![1, 2, 3, 4]);
        let facts = sample_facts();
        let sig = sign_facts(&ring, &facts).unwrap();

        let mut tampered = facts;
        tampered.insert("ok".into(), Value::Bool(false));
        assert!(verify_facts(&ring, &tampered, &sig).is_err());
    }

    #[test]
    fn accepts_signature_from_retired_key_still_in_ring() {
        let mut config = KeyRingConfig {
            active_key_id: "k2".into(),
            retain_last: 2,
            keys: vec![],
        };
        config.keys.push(kloros_config::HmacKeyEntry {
            id: "k1".into(),
            secret_hex: hex::encode([1u8; 16]),
            created_ts: "2026-01-01T00:00:00Z".into(),
        });
        config.keys.push(kloros_config::HmacKeyEntry {
            id: "k2".into(),
            secret_hex: hex::encode([2u8; 16]),
            created_ts: "2026-02-01T00:00:00Z".into(),
        });
        let ring = KeyRing::from_config(&config);

        let old_ring = KeyRing::single("k1", [1u8; 16].to_vec());
        let facts = sample_facts();
        let sig = sign_facts(&old_ring, &facts).unwrap();
        assert!(verify_facts(&ring, &facts, &sig).is_ok());
    }
}
