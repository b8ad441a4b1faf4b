//! Starts and stops external zooid processes on promotion/demotion: a
//! zooid exits cleanly on a stop request, with its service lifecycle
//! otherwise managed by this supervisor. Reacts to
//! `governance.zooid_state_change`'s
//! `service_action` fact rather than to the lifecycle transition directly,
//! so it stays a plain bus subscriber like every other component here.
//!
//! Grounded on `knhk-swarm::agents::Agent`'s `start`/`stop`/`health_check`
//! shape, generalized from an in-process async trait to an out-of-process
//! child with the same three operations (`health_check` is the existing
//! `HEARTBEAT` subscription the Graduator already watches, so this module
//! only needs `start`/`stop`).

use async_trait::async_trait;
use kloros_bus::{signals, Envelope, SignalHandler};
use kloros_registry::Registry;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::niches::NicheEntry;

/// Watches `governance.zooid_state_change` and spawns or kills the external
/// process behind a zooid name, using each niche's configured
/// `service_command` template.
pub struct ZooidSupervisor {
    registry: Arc<Registry>,
    commands: HashMap<String, Vec<String>>,
    children: Mutex<HashMap<String, Child>>,
}

impl ZooidSupervisor {
    /// Build a supervisor over the niche topology's service commands,
    /// resolving each transitioning zooid's niche through `registry`.
    pub fn new(registry: Arc<Registry>, niches: &[NicheEntry]) -> Self {
        let commands = niches
            .iter()
            .filter(|n| !n.service_command.is_empty())
            .map(|n| (n.key().to_string(), n.service_command.clone()))
            .collect();
        Self {
            registry,
            commands,
            children: Mutex::new(HashMap::new()),
        }
    }

    async fn start(&self, name: &str) {
        let Some(zooid) = self.registry.get(name).await else {
            warn!(zooid = name, "start requested for unknown zooid, skipping");
            return;
        };
        let Some(template) = self.commands.get(&zooid.niche.to_string()) else {
            warn!(zooid = name, niche = %zooid.niche, "no service_command configured for niche, skipping start");
            return;
        };
        let Some((program, args)) = template.split_first() else {
            return;
        };

        let mut children = self.children.lock().await;
        if children.contains_key(name) {
            return;
        }
        match tokio::process::Command::new(program)
            .args(args)
            .arg(name)
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                info!(zooid = name, "zooid process started");
                children.insert(name.to_string(), child);
            }
            Err(err) => warn!(zooid = name, error = %err, "failed to start zooid process"),
        }
    }

    async fn stop(&self, name: &str) {
        let mut children = self.children.lock().await;
        if let Some(mut child) = children.remove(name) {
            let _ = child.start_kill();
            let _ = child.wait().await;
            info!(zooid = name, "zooid process stopped");
        } else {
            info!(zooid = name, "stop requested for a zooid this supervisor did not start, nothing to do");
        }
    }
}

#[async_trait]
impl SignalHandler for ZooidSupervisor {
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String> {
        if envelope.signal != signals::ZOOID_STATE_CHANGE {
            return Ok(());
        }
        let Some(name) = envelope.facts.get("zooid").and_then(Value::as_str) else {
            return Ok(());
        };
        match envelope.facts.get("service_action").and_then(Value::as_str) {
            Some("start") => self.start(name).await,
            Some("stop") => self.stop(name).await,
            _ => {}
        }
        Ok(())
    }
}
