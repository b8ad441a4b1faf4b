//! `SharedContext`: assembles the directory layout, bus, registry, ledger
//! stores, signing key ring, and niche topology every component binary
//! needs, so each `src/bin/*.rs` is a thin loop over an already-built
//! context rather than its own bootstrap sequence, grounded on
//! `knhk-autonomous-system::system::AutonomousOntologyPlant::initialize`'s
//! single numbered-step constructor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kloros_bus::ChemBus;
use kloros_config::KlorosConfig;
use kloros_core::{FitnessLedgerRecord, PhaseFitnessRecord, PhaseQueueRecord};
use kloros_historian::ConsolidatedRecord;
use kloros_ledger::{hmac_sign::KeyRing, LedgerStore, LifecycleEventLog};
use kloros_registry::Registry;
use tracing::info;

use crate::error::Result;
use crate::niches::{load_niches, NicheEntry};

/// Everything a component binary needs to start serving: config, the bus,
/// the registry, every ledger stream, the signing key ring, and the
/// configured niche topology.
pub struct SharedContext {
    pub state_root: PathBuf,
    pub config: KlorosConfig,
    pub bus: Arc<ChemBus>,
    pub registry: Arc<Registry>,
    pub keyring: KeyRing,
    pub niches: Vec<NicheEntry>,
    pub phase_queue: Arc<LedgerStore<PhaseQueueRecord>>,
    pub phase_fitness: Arc<LedgerStore<PhaseFitnessRecord>>,
    pub fitness_ledger: Arc<LedgerStore<FitnessLedgerRecord>>,
    pub lifecycle_log: Arc<LifecycleEventLog>,
    pub episodic: Arc<LedgerStore<ConsolidatedRecord>>,
}

impl SharedContext {
    /// Build a context rooted at `state_root`, loading configuration from
    /// `config_dir`. `service_name` is used only for tracing/telemetry
    /// identification, not for any on-disk path.
    pub async fn build(state_root: impl AsRef<Path>, config_dir: impl AsRef<Path>, service_name: &str) -> Result<Self> {
        let state_root = state_root.as_ref().to_path_buf();
        let config_dir = config_dir.as_ref().to_path_buf();

        for sub in ["registry", "lineage", "observability", "locks", "episodic"] {
            let dir = state_root.join(sub);
            std::fs::create_dir_all(&dir).map_err(|source| crate::error::DaemonError::StateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }

        info!(service = service_name, state_root = %state_root.display(), "building shared context");

 // 1. Configuration ("Configuration artifacts").
        let config = kloros_config::load_config(&config_dir)?;

 // 2. Bus. Constructed fresh per process; the signal bus
 // is intra-host, not durable state.
        let bus = ChemBus::new();

 // 3. Registry, reconciled on load.
        let registry = Arc::new(Registry::load(&state_root, Some(Arc::clone(&bus))).await?);

 // 4. Signing key ring.
        let keyring = KeyRing::from_config(&config.keys);

        // 5. Niche topology (Bioreactor's fourth configuration artifact; see
        // `niches.rs`).
        let niches = load_niches(&config_dir)?;

 // 6. Ledger streams, all inside one shared sled database (        // "Ledgers"; `kloros_ledger::LedgerStore::open` relies on sled's
        // per-process open registry to share one `Db` across trees).
        let ledger_db = state_root.join("lineage").join("ledgers.db");
        let phase_queue = Arc::new(LedgerStore::open(&ledger_db, "phase_queue")?);
        let phase_fitness = Arc::new(LedgerStore::open(&ledger_db, "phase_fitness")?);
        let fitness_ledger = Arc::new(LedgerStore::open(&ledger_db, "fitness_ledger")?);
        let events = Arc::new(LedgerStore::open(
            state_root.join("observability").join("lifecycle_events.db"),
            "lifecycle_events",
        )?);
        let episodic = Arc::new(LedgerStore::open(
            state_root.join("episodic").join("episodic.db"),
            "consolidated",
        )?);

        // 7. Lifecycle event log: every transition's provenance record plus
 // its bus publication ("Every transition emits...").
        let lifecycle_log = Arc::new(LifecycleEventLog::new(events, Arc::clone(&bus)));

        Ok(Self {
            state_root,
            config,
            bus,
            registry,
            keyring,
            niches,
            phase_queue,
            phase_fitness,
            fitness_ledger,
            lifecycle_log,
            episodic,
        })
    }

    /// Path to the global coordination lock, `locks/colony_cycle.lock`.
    pub fn phase_lock_path(&self) -> PathBuf {
        self.state_root.join("locks").join("phase_coordination.lock")
    }

    /// Whether the kill switch is tripped.
    pub fn emergency_stopped(&self) -> bool {
        crate::emergency_stop::is_active(&self.state_root)
    }
}

/// `WorkloadDriver`'s environment allowlist, read from
/// `KLOROS_DRIVER_ENV_ALLOWLIST` as a comma-separated list: the child
/// process only inherits variables named here.
pub fn driver_env_allowlist() -> Vec<String> {
    std::env::var("KLOROS_DRIVER_ENV_ALLOWLIST")
        .ok()
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// Reference timestamp for the startup clock-skew check, read from
/// `KLOROS_CLOCK_REFERENCE` as RFC3339.
pub fn clock_reference() -> Option<chrono::DateTime<chrono::Utc>> {
    std::env::var("KLOROS_CLOCK_REFERENCE")
        .ok()
        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}
