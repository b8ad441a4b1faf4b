//! Criticality classification for back-pressure handling: critical
//! topics block briefly when a subscriber queue is full, everything else is
//! dropped.

/// Signal prefixes treated as critical. A publisher blocks briefly (rather
/// than dropping) when a subscriber's queue is full for one of these.
const CRITICAL_PREFIXES: &[&str] = &["OBSERVATION"];

/// Whether `signal` belongs to a critical topic.
pub fn is_critical(signal: &str) -> bool {
    CRITICAL_PREFIXES
        .iter()
        .any(|prefix| signal.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_is_critical() {
        assert!(is_critical("OBSERVATION"));
    }

    #[test]
    fn heartbeat_is_not_critical() {
        assert!(!is_critical("HEARTBEAT"));
    }
}
