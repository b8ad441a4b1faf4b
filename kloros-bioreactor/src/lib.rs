//! The Bioreactor: per-tick candidate differentiation, de-duplication,
//! registration, and conservative ACTIVE tournament.

pub mod bioreactor;
pub mod error;
pub mod loss_tracker;
pub mod phenotype;
pub mod phenotype_store;
pub mod tournament;

pub use bioreactor::{Bioreactor, TickReport};
pub use error::{BioreactorError, Result};
pub use loss_tracker::LossTracker;
pub use phenotype::{canonical_phenotype_bytes, genome_hash_of, mutate, MutationRange, NicheMutationSpec, Phenotype};
pub use phenotype_store::PhenotypeStore;
pub use tournament::{rank, split_winners, Scored};
