//! Introspection scanners: a shared observation cache and a pluggable
//! `Scanner` trait driven by scheduler triggers with per-scan timeouts and
//! fingerprint-based deduplication.

pub mod builtin;
pub mod cache;
pub mod error;
pub mod scanner;

pub use builtin::{BackpressureScanner, BottleneckScanner};
pub use cache::ObservationCache;
pub use error::{IntrospectionError, Result};
pub use scanner::{Finding, Scanner, ScannerRunner, DEFAULT_DEDUP_TTL_SEC, DEFAULT_SCAN_TIMEOUT_SEC};
