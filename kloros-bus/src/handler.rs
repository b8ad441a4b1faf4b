//! The per-subscriber callback interface.

use crate::envelope::Envelope;
use async_trait::async_trait;

/// Implemented by anything that wants to receive bus messages via
/// [`ChemBus::subscribe`](crate::bus::ChemBus::subscribe).
///
/// Handlers run on their subscriber's own dispatch task, never on the
/// publisher's call stack; they must not block the dispatcher.
/// A handler that returns `Err` counts against its subscriber's failure
/// tally; it is not removed unless the failure rate trips quarantine.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    /// Handle one envelope. The returned string is logged as the failure
    /// reason on `Err`.
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String>;
}

#[async_trait]
impl<F> SignalHandler for F
where
    F: Fn(&Envelope) -> std::result::Result<(), String> + Send + Sync,
{
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), String> {
        self(envelope)
    }
}
