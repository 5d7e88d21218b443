use crate::{
    metrics::METRICS,
    pipeline::{util, Envelope, EnvelopeHandler, Field, FieldValue},
    transport::Transport,
};
use std::sync::Arc;
use tracing::trace;

/// Hands outgoing packets to the transport.
pub struct OutgoingParcelHandler {
    transport: Arc<dyn Transport>,
}

impl OutgoingParcelHandler {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        OutgoingParcelHandler { transport }
    }
}

impl EnvelopeHandler for OutgoingParcelHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if !util::require_field(envelope, Field::Parcel) {
            return;
        }
        if let Some(FieldValue::Parcel(packet, dst)) = envelope.remove(Field::Parcel) {
            trace!("Envelope #{}: {} to {}", envelope.id(), packet, dst);
            self.transport.send(packet, dst);
            METRICS.increment(&METRICS.packets_sent);
        }
    }
}
