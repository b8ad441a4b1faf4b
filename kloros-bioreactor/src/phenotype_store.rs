//! Durable phenotype storage, keyed by zooid name. The Registry addresses
//! zooids by `genome_hash` only; the Bioreactor is the sole producer of
//! phenotypes, so it is the natural owner of their raw parameter values
//! (needed as mutation bases for future ticks).

use crate::error::Result;
use crate::phenotype::Phenotype;
use std::path::Path;

/// A small `sled`-backed phenotype map, one entry per zooid name.
pub struct PhenotypeStore {
    tree: sled::Tree,
}

impl PhenotypeStore {
    /// Open (or create) the `phenotypes` tree inside the shared `sled`
    /// database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(db_path)?;
        let tree = db.open_tree("phenotypes")?;
        Ok(Self { tree })
    }

    /// Fetch a zooid's current phenotype, if recorded.
    pub fn get(&self, zooid: &str) -> Result<Option<Phenotype>> {
        match self.tree.get(zooid)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record a zooid's phenotype.
    pub fn put(&self, zooid: &str, phenotype: &Phenotype) -> Result<()> {
        let bytes = bincode::serialize(phenotype)?;
        self.tree.insert(zooid, bytes)?;
        Ok(())
    }

    /// Every currently-recorded phenotype for a set of zooid names, in the
    /// order given, skipping any without a recorded entry.
    pub fn get_many(&self, zooids: &[String]) -> Result<Vec<Phenotype>> {
        let mut out = Vec::new();
        for name in zooids {
            if let Some(p) = self.get(name)? {
                out.push(p);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_phenotype() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhenotypeStore::open(dir.path()).unwrap();
        let mut p = Phenotype::new();
        p.insert("threshold".into(), 0.42);
        store.put("lm_001", &p).unwrap();
        assert_eq!(store.get("lm_001").unwrap(), Some(p));
    }

    #[test]
    fn missing_zooid_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhenotypeStore::open(dir.path()).unwrap();
        assert_eq!(store.get("ghost").unwrap(), None);
    }
}
