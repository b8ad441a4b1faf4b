//! Ecosystem/niche classification ("Niche"/"Ecosystem").

use serde::{Deserialize, Serialize};
use std::fmt;

/// An ecosystem/niche pair, e.g. `("queue_management", "latency_monitoring")`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NicheKey {
    /// Grouping of niches that share a workload domain.
    pub ecosystem: String,
    /// Named role within the ecosystem.
    pub niche: String,
}

impl NicheKey {
    /// Construct a new niche key.
    pub fn new(ecosystem: impl Into<String>, niche: impl Into<String>) -> Self {
        Self {
            ecosystem: ecosystem.into(),
            niche: niche.into(),
        }
    }
}

impl fmt::Display for NicheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ecosystem, self.niche)
    }
}
