//! The sandboxed workload driver: runs one niche's synthetic workload as a
//! child process with a scrubbed environment and a hard wall-clock deadline,
//! then parses its single-line JSON report from stdout.

use crate::error::{PhaseError, Result};
use kloros_config::WorkloadProfile;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{instrument, warn};

/// The JSON object a workload driver writes to stdout on exit.
#[derive(Debug, Clone, Deserialize)]
struct DriverReport {
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
    composite: Option<f64>,
    #[serde(default)]
    anomalies: Vec<String>,
}

/// The outcome of one sandboxed run.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverRun {
    /// Per-metric scores the driver reported.
    pub metrics: BTreeMap<String, f64>,
    /// Composite fitness score in `[0, 1]`.
    pub composite: f64,
    /// Anomaly labels the driver reported.
    pub anomalies: Vec<String>,
    /// Wall-clock duration of the attempt, in milliseconds.
    pub duration_ms: u64,
    /// Whether the process exited zero and produced a parseable report.
    pub completed: bool,
    /// Whether the attempt was killed after exceeding `timeout_sec`.
    pub timed_out: bool,
}

impl DriverRun {
    fn failed(duration_ms: u64, timed_out: bool) -> Self {
        Self {
            metrics: BTreeMap::new(),
            composite: 0.0,
            anomalies: Vec::new(),
            duration_ms,
            completed: false,
            timed_out,
        }
    }
}

/// Runs a `WorkloadProfile` as a sandboxed child process.
pub struct WorkloadDriver {
    env_allowlist: Vec<String>,
}

impl WorkloadDriver {
    /// Construct a driver that forwards only the named environment
    /// variables into each child process, alongside the run's own
    /// `KLOROS_ZOOID`/`KLOROS_SEED`/`KLOROS_ATTEMPT` markers.
    pub fn new(env_allowlist: Vec<String>) -> Self {
        Self { env_allowlist }
    }

    /// Run one attempt of `profile` against `zooid_name`, seeded
    /// deterministically, returning crash/timeout as outcomes rather than
    /// errors -- only spawn and I/O failures are `Err`.
    #[instrument(skip(self, profile), fields(zooid = %zooid_name, attempt))]
    pub async fn run(
        &self,
        profile: &WorkloadProfile,
        zooid_name: &str,
        seed: u64,
        attempt: u32,
    ) -> Result<DriverRun> {
        let mut cmd = Command::new(&profile.driver_command);
        cmd.args(&profile.driver_args);
        cmd.env_clear();
        for key in &self.env_allowlist {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("KLOROS_ZOOID", zooid_name);
        cmd.env("KLOROS_SEED", seed.to_string());
        cmd.env("KLOROS_ATTEMPT", attempt.to_string());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|e| PhaseError::Spawn {
            command: profile.driver_command.clone(),
            source: e,
        })?;

        let deadline = Duration::from_secs(profile.timeout_sec.max(1));
        match timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                if !output.status.success() {
                    warn!(zooid = %zooid_name, status = ?output.status, "workload driver exited non-zero");
                    return Ok(DriverRun::failed(duration_ms, false));
                }
                let stdout = String::from_utf8_lossy(&output.stdout);
                let line = stdout.lines().last().unwrap_or("").trim();
                let report: DriverReport = serde_json::from_str(line)
                    .map_err(|e| PhaseError::MalformedOutput(e.to_string()))?;
                let composite = report.composite.unwrap_or_else(|| mean(&report.metrics));
                Ok(DriverRun {
                    metrics: report.metrics,
                    composite: composite.clamp(0.0, 1.0),
                    anomalies: report.anomalies,
                    duration_ms,
                    completed: true,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(PhaseError::Spawn {
                command: profile.driver_command.clone(),
                source: e,
            }),
            Err(_elapsed) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                warn!(zooid = %zooid_name, timeout_sec = profile.timeout_sec, "workload driver timed out");
                Ok(DriverRun::failed(duration_ms, true))
            }
        }
    }
}

fn mean(metrics: &BTreeMap<String, f64>) -> f64 {
    if metrics.is_empty() {
        return 0.0;
    }
    metrics.values().sum::<f64>() / metrics.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(command: &str, args: Vec<&str>) -> WorkloadProfile {
        WorkloadProfile {
            driver_command: command.to_string(),
            driver_args: args.into_iter().map(str::to_string).collect(),
            timeout_sec: 5,
            catastrophic_rule: None,
            observations_per_batch: 1,
        }
    }

    #[tokio::test]
    async fn parses_composite_from_stdout() {
        let driver = WorkloadDriver::new(vec![]);
        let run = driver
            .run(
                &profile("sh", vec!["-c", "echo '{\"metrics\":{\"a\":0.5},\"composite\":0.8}'"]),
                "lm_001",
                1,
                1,
            )
            .await
            .unwrap();
        assert!(run.completed);
        assert_eq!(run.composite, 0.8);
    }

    #[tokio::test]
    async fn falls_back_to_metric_mean_when_composite_absent() {
        let driver = WorkloadDriver::new(vec![]);
        let run = driver
            .run(
                &profile("sh", vec!["-c", "echo '{\"metrics\":{\"a\":0.4,\"b\":0.6}}'"]),
                "lm_001",
                1,
                1,
            )
            .await
            .unwrap();
        assert_eq!(run.composite, 0.5);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failed_run_not_an_error() {
        let driver = WorkloadDriver::new(vec![]);
        let run = driver
            .run(&profile("sh", vec!["-c", "exit 1"]), "lm_001", 1, 1)
            .await
            .unwrap();
        assert!(!run.completed);
        assert!(!run.timed_out);
    }

    #[tokio::test]
    async fn exceeding_timeout_is_reported_not_errored() {
        let driver = WorkloadDriver::new(vec![]);
        let run = driver
            .run(&profile("sh", vec!["-c", "sleep 5"]), "lm_001", 1, 1)
            .await
            .unwrap();
        assert!(run.timed_out);
        assert!(!run.completed);
    }
}
