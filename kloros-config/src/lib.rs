//! Operator configuration: lifecycle policy, workload driver profiles, and
//! the HMAC key ring, loaded from TOML with `KLOROS_*` environment overrides.

pub mod env;
pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, Result};
pub use loader::{load_config, validate_config, KlorosConfig};
pub use schema::{
    HmacKeyEntry, KeyRingConfig, LifecyclePolicyConfig, PolicyDefaults, ScheduleEntry,
    WorkloadProfile, WorkloadProfilesConfig,
};
