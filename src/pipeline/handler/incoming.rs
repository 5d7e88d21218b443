use crate::{
    metrics::METRICS,
    node_info::NodeAddress,
    packet::{self, Packet},
    pipeline::{util, Envelope, EnvelopeHandler, Field, FieldValue},
    session::SessionRegistry,
};
use std::sync::Arc;
use tracing::trace;

/// Sorts a received packet by kind and recovers its sender from the tag.
pub struct IncomingPacketHandler {
    registry: Arc<SessionRegistry>,
}

impl IncomingPacketHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        IncomingPacketHandler { registry }
    }
}

impl EnvelopeHandler for IncomingPacketHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if !util::require_field(envelope, Field::IncomingPacket)
            || !util::require_field(envelope, Field::Remote)
        {
            return;
        }
        let (packet, remote) = match (envelope.packet(Field::IncomingPacket), envelope.remote()) {
            (Some(packet), Some(remote)) => (packet.clone(), remote),
            _ => return,
        };
        METRICS.increment(&METRICS.packets_recv);
        trace!(
            "Envelope #{}: {} from {}",
            envelope.id(),
            packet,
            remote
        );

        let local_id = self.registry.local().node_id();
        match &packet {
            Packet::WhoAreYou { magic, .. } => {
                if *magic != packet::magic(&local_id) {
                    envelope.mark_bad(format!("WHOAREYOU from {} is not addressed to us", remote));
                    return;
                }
                envelope.put(Field::PacketWhoAreYou, FieldValue::Packet(packet));
            }
            Packet::AuthMessage { tag, .. } => {
                let src_id = packet::src_id(tag, &local_id);
                envelope.put(
                    Field::SessionLookup,
                    FieldValue::Lookup(NodeAddress::new(remote, src_id)),
                );
                envelope.put(Field::PacketAuthMessage, FieldValue::Packet(packet));
            }
            Packet::RandomPacket { tag, .. } | Packet::Message { tag, .. } => {
                let src_id = packet::src_id(tag, &local_id);
                if src_id == local_id {
                    envelope.mark_bad(format!("Packet from {} claims our own node id", remote));
                    return;
                }
                envelope.put(
                    Field::SessionLookup,
                    FieldValue::Lookup(NodeAddress::new(remote, src_id)),
                );
                envelope.put(Field::PacketMessage, FieldValue::Packet(packet));
            }
        }
    }
}
