//! `KLOROS_*` environment variable overrides, applied after file load and
//! before validation, mirroring the `KNHK_CONNECTOR_*` / `KNHK_EPOCH_*`
//! override convention.

use crate::error::{ConfigError, Result};
use crate::schema::LifecyclePolicyConfig;
use std::env;

/// Apply `KLOROS_*` overrides to the global policy defaults and, for
/// `KLOROS_NICHE_<ECOSYSTEM>_<NICHE>_<SETTING>`, to a specific niche's
/// override section.
pub fn apply_env_overrides(config: &mut LifecyclePolicyConfig) -> Result<()> {
    for (key, value) in env::vars() {
        if let Some(setting) = key.strip_prefix("KLOROS_DEFAULT_") {
            apply_setting(&mut config.defaults, setting, &value, &key)?;
            continue;
        }

        if let Some(rest) = key.strip_prefix("KLOROS_NICHE__") {
            // KLOROS_NICHE__<ecosystem>__<niche>__<setting>
            let parts: Vec<&str> = rest.split("__").collect();
            if parts.len() == 3 {
                let niche_key = format!(
                    "{}/{}",
                    parts[0].to_lowercase(),
                    parts[1].to_lowercase()
                );
                let entry = config
                    .niches
                    .entry(niche_key)
                    .or_insert_with(|| config.defaults.clone());
                apply_setting(entry, &parts[2].to_lowercase(), &value, &key)?;
            }
        }
    }
    Ok(())
}

fn apply_setting(
    target: &mut crate::schema::PolicyDefaults,
    setting: &str,
    value: &str,
    full_key: &str,
) -> Result<()> {
    let bad = |value: &str| ConfigError::BadEnvOverride {
        key: full_key.to_string(),
        value: value.to_string(),
    };

    match setting.to_lowercase().as_str() {
        "phase_threshold" => target.phase_threshold = value.parse().map_err(|_| bad(value))?,
        "min_phase_evidence" => {
            target.min_phase_evidence = value.parse().map_err(|_| bad(value))?
        }
        "demotion_ceiling" => target.demotion_ceiling = value.parse().map_err(|_| bad(value))?,
        "quarantine_window_sec" => {
            target.quarantine_window_sec = value.parse().map_err(|_| bad(value))?
        }
        "phase_half_life_sec" => {
            target.phase_half_life_sec = value.parse().map_err(|_| bad(value))?
        }
        "heartbeat_slo_sec" => target.heartbeat_slo_sec = value.parse().map_err(|_| bad(value))?,
        "prod_guard_failures_threshold" => {
            target.prod_guard_failures_threshold = value.parse().map_err(|_| bad(value))?
        }
        "tournament_k" => target.tournament_k = value.parse().map_err(|_| bad(value))?,
        "catastrophic_crash_limit" => {
            target.catastrophic_crash_limit = value.parse().map_err(|_| bad(value))?
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_override_applies() {
        env::set_var("KLOROS_DEFAULT_PHASE_THRESHOLD", "0.85");
        let mut cfg = LifecyclePolicyConfig::default();
        apply_env_overrides(&mut cfg).unwrap();
        assert_eq!(cfg.defaults.phase_threshold, 0.85);
        env::remove_var("KLOROS_DEFAULT_PHASE_THRESHOLD");
    }

    #[test]
    fn niche_override_is_independent_of_defaults() {
        env::set_var(
            "KLOROS_NICHE__queue_management__latency_monitoring__min_phase_evidence",
            "10",
        );
        let mut cfg = LifecyclePolicyConfig::default();
        apply_env_overrides(&mut cfg).unwrap();
        let niche = cfg
            .niches
            .get("queue_management/latency_monitoring")
            .unwrap();
        assert_eq!(niche.min_phase_evidence, 10);
        assert_eq!(cfg.defaults.min_phase_evidence, 50);
        env::remove_var("KLOROS_NICHE__queue_management__latency_monitoring__min_phase_evidence");
    }

    #[test]
    fn bad_value_is_rejected() {
        env::set_var("KLOROS_DEFAULT_PHASE_THRESHOLD", "not-a-number");
        let mut cfg = LifecyclePolicyConfig::default();
        assert!(apply_env_overrides(&mut cfg).is_err());
        env::remove_var("KLOROS_DEFAULT_PHASE_THRESHOLD");
    }
}
