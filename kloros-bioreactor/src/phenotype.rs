//! Candidate phenotypes: bounded-parameter mutation and content hashing
//! ("Differentiate").

use kloros_core::GenomeHash;
use rand::Rng;
use std::collections::BTreeMap;

/// A candidate's tunable parameters. Serializes as a `BTreeMap`, so
/// `serde_json` canonicalizes it with sorted keys for hashing.
pub type Phenotype = BTreeMap<String, f64>;

/// Inclusive bounds a mutation operator may resample a parameter within.
#[derive(Debug, Clone, Copy)]
pub struct MutationRange {
    pub min: f64,
    pub max: f64,
}

/// A niche's mutation operator: the module source identifying the niche's
/// logic, and the bounded range each tunable phenotype parameter may be
/// resampled within.
#[derive(Debug, Clone)]
pub struct NicheMutationSpec {
    /// Serialized module source this niche's candidates run (content-hashed
    /// alongside the phenotype to form `genome_hash`).
    pub module_source: Vec<u8>,
    /// Per-parameter bounded resampling ranges.
    pub ranges: BTreeMap<String, MutationRange>,
}

/// Resample every ranged parameter of `base` uniformly within its bound,
/// producing one new candidate phenotype ("parameter resampling
/// within bounded ranges defined per niche").
pub fn mutate(base: &Phenotype, spec: &NicheMutationSpec, rng: &mut impl Rng) -> Phenotype {
    let mut out = base.clone();
    for (param, range) in &spec.ranges {
        out.insert(param.clone(), rng.gen_range(range.min..=range.max));
    }
    out
}

/// Canonical bytes of a phenotype, key-sorted by construction.
pub fn canonical_phenotype_bytes(phenotype: &Phenotype) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(phenotype)
}

/// Hash a module source and phenotype into the candidate's `genome_hash`.
pub fn genome_hash_of(
    module_source: &[u8],
    phenotype: &Phenotype,
) -> serde_json::Result<GenomeHash> {
    let bytes = canonical_phenotype_bytes(phenotype)?;
    Ok(GenomeHash::of(module_source, &bytes))
}
