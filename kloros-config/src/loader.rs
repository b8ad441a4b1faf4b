//! Loading, overriding, and validating the three configuration files.

use crate::env::apply_env_overrides;
use crate::error::{ConfigError, Result};
use crate::schema::{KeyRingConfig, LifecyclePolicyConfig, WorkloadProfilesConfig};
use std::fs;
use std::path::Path;
use tracing::instrument;

/// Fully loaded, validated operator configuration.
#[derive(Debug, Clone)]
pub struct KlorosConfig {
    /// Lifecycle policy defaults, per-niche overrides, and schedules.
    pub policy: LifecyclePolicyConfig,
    /// Per-niche PHASE workload driver profiles.
    pub workloads: WorkloadProfilesConfig,
    /// HMAC signing key ring.
    pub keys: KeyRingConfig,
}

/// Load `lifecycle_policy.toml`, `workload_profiles.toml`, and `keys.toml`
/// from `config_dir`, apply `KLOROS_*` environment overrides, and validate
/// the result.
#[instrument(skip_all, fields(config_dir = %config_dir.as_ref().display()))]
pub fn load_config(config_dir: impl AsRef<Path>) -> Result<KlorosConfig> {
    let dir = config_dir.as_ref();

    let mut policy: LifecyclePolicyConfig =
        load_toml_or_default(&dir.join("lifecycle_policy.toml"))?;
    apply_env_overrides(&mut policy)?;

    let workloads: WorkloadProfilesConfig =
        load_toml_or_default(&dir.join("workload_profiles.toml"))?;

    let keys: KeyRingConfig = load_toml_or_default(&dir.join("keys.toml"))?;

    let config = KlorosConfig {
        policy,
        workloads,
        keys,
    };
    validate_config(&config)?;
    Ok(config)
}

fn load_toml_or_default<T>(path: &Path) -> Result<T>
where
    T: Default + serde::de::DeserializeOwned,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}

/// Validate cross-field invariants that `serde` defaults cannot express
///.
pub fn validate_config(config: &KlorosConfig) -> Result<()> {
    let check_policy = |name: &str, p: &crate::schema::PolicyDefaults| -> Result<()> {
        if !(0.0..=1.0).contains(&p.phase_threshold) {
            return Err(ConfigError::OperatorPolicyError(format!(
                "{name}: phase_threshold must be in [0, 1], got {}",
                p.phase_threshold
            )));
        }
        if p.demotion_ceiling == 0 {
            return Err(ConfigError::OperatorPolicyError(format!(
                "{name}: demotion_ceiling must be >= 1"
            )));
        }
        if p.tournament_k == 0 {
            return Err(ConfigError::OperatorPolicyError(format!(
                "{name}: tournament_k must be >= 1"
            )));
        }
        Ok(())
    };

    check_policy("defaults", &config.policy.defaults)?;
    for (name, overrides) in &config.policy.niches {
        check_policy(name, overrides)?;
    }

    for (name, schedule) in &config.policy.schedules {
        if schedule.interval_sec == 0 {
            return Err(ConfigError::OperatorPolicyError(format!(
                "schedule {name}: interval_sec must be >= 1"
            )));
        }
        if schedule.critical && schedule.floor_sec > schedule.interval_sec {
            return Err(ConfigError::OperatorPolicyError(format!(
                "schedule {name}: floor_sec cannot exceed interval_sec"
            )));
        }
    }

    for (name, profile) in &config.workloads.profiles {
        if profile.driver_command.is_empty() {
            return Err(ConfigError::OperatorPolicyError(format!(
                "workload profile {name}: driver_command cannot be empty"
            )));
        }
        if profile.timeout_sec == 0 {
            return Err(ConfigError::OperatorPolicyError(format!(
                "workload profile {name}: timeout_sec must be >= 1"
            )));
        }
    }

    if !config.keys.keys.is_empty() {
        if !config
            .keys
            .keys
            .iter()
            .any(|k| k.id == config.keys.active_key_id)
        {
            return Err(ConfigError::OperatorPolicyError(format!(
                "active_key_id {} is not present in the key ring",
                config.keys.active_key_id
            )));
        }
        if config.keys.keys.len() > config.keys.retain_last {
            return Err(ConfigError::OperatorPolicyError(format!(
                "key ring holds {} keys, exceeding retain_last={}",
                config.keys.keys.len(),
                config.keys.retain_last
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_when_files_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.policy.defaults.phase_threshold, 0.70);
        assert!(config.workloads.profiles.is_empty());
    }

    #[test]
    fn rejects_unknown_active_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("keys.toml")).unwrap();
        writeln!(
            f,
            r#"active_key_id = "missing"
[[keys]]
id = "k1"
secret_hex = "00"
created_ts = "2026-01-01T00:00:00Z"
"#
        )
        .unwrap();
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn rejects_out_of_range_phase_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("lifecycle_policy.toml")).unwrap();
        writeln!(
            f,
            r#"[defaults]
phase_threshold = 1.5
"#
        )
        .unwrap();
        assert!(load_config(dir.path()).is_err());
    }
}
