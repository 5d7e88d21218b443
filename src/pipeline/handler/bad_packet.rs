use crate::{
    metrics::METRICS,
    pipeline::{Envelope, EnvelopeHandler},
};
use tracing::debug;

/// Accounts for the envelopes that failed. Runs last.
#[derive(Default)]
pub struct BadPacketHandler;

impl BadPacketHandler {
    pub fn new() -> Self {
        BadPacketHandler
    }
}

impl EnvelopeHandler for BadPacketHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if let Some(reason) = envelope.bad_packet() {
            debug!(
                "Envelope #{} dropped from {:?}: {}",
                envelope.id(),
                envelope.remote(),
                reason
            );
            METRICS.increment(&METRICS.bad_packets);
        }
    }
}
