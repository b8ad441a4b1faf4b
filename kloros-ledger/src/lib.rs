//! Append-only ledger storage, HMAC signing/verification, and the Ledger
//! Writer's `fitness_ledger` roll-up.

pub mod error;
pub mod hmac_sign;
pub mod lifecycle_log;
pub mod store;
pub mod writer;

pub use error::{LedgerError, Result};
pub use hmac_sign::{canonicalize_facts, sign_facts, verify_facts, KeyRing};
pub use lifecycle_log::LifecycleEventLog;
pub use store::LedgerStore;
pub use writer::LedgerWriter;
