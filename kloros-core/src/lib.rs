//! Shared data model for the evolutionary lifecycle core: zooids, niches,
//! genomes, and the ledger record shapes everything else builds on.

pub mod error;
pub mod genome;
pub mod guard;
pub mod ledger;
pub mod niche;
pub mod schema;
pub mod zooid;

pub use error::{CoreError, Result};
pub use genome::GenomeHash;
pub use guard::ProdGuardFailureLookup;
pub use ledger::{FitnessLedgerRecord, LifecycleEventRecord, PhaseFitnessRecord, PhaseQueueRecord};
pub use niche::NicheKey;
pub use schema::{check_schema_version, CURRENT_SCHEMA_VERSION};
pub use zooid::{LifecycleState, PhaseSnapshot, PolicyOverrides, ProdSnapshot, Zooid};
