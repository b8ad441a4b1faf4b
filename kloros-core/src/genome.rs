//! Content-hashed genome identity ("Genome").

use serde::{Deserialize, Serialize};
use std::fmt;

/// A genome hash: Blake3 digest of the serialized (module source, phenotype) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenomeHash(#[serde(with = "hex_bytes32")] pub [u8; 32]);

impl GenomeHash {
    /// Hash the canonical genome bytes (module source concatenated with the
    /// serialized phenotype) into a `GenomeHash`.
    pub fn of(module_source: &[u8], phenotype_canonical: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(module_source);
        hasher.update(b"\0");
        hasher.update(phenotype_canonical);
        GenomeHash(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for GenomeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

mod hex_bytes32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("genome hash must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        let a = GenomeHash::of(b"fn main() {}", b"{\"k\":1}");
        let b = GenomeHash::of(b"fn main() {}", b"{\"k\":1}");
        assert_eq!(a, b);
    }

    #[test]
    fn different_phenotype_differs() {
        let a = GenomeHash::of(b"fn main() {}", b"{\"k\":1}");
        let b = GenomeHash::of(b"fn main() {}", b"{\"k\":2}");
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_json() {
        let h = GenomeHash::of(b"src", b"pheno");
        let json = serde_json::to_string(&h).unwrap();
        let back: GenomeHash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
