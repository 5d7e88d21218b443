use crate::{
    error::RequestError,
    packet::Packet,
    pipeline::{util, Envelope, EnvelopeHandler, Field, FieldValue},
    session::{SessionRegistry, SessionStatus},
};
use std::sync::Arc;
use tracing::debug;

/// Challenges the sender of a packet we cannot decrypt with a WHOAREYOU.
///
/// A random packet always asks for a challenge. For an authenticated session it means the peer
/// lost its keys, so the session is replaced by a fresh one first. When both sides opened with a
/// random packet at the same time, only the node with the lower node id issues the challenge.
pub struct ChallengeHandler {
    registry: Arc<SessionRegistry>,
}

impl ChallengeHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        ChallengeHandler { registry }
    }
}

impl EnvelopeHandler for ChallengeHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope) || !util::require_field(envelope, Field::PacketMessage) {
            return;
        }
        let mut session = match envelope.session() {
            Some(session) => session,
            None => return,
        };
        let (auth_tag, is_random) = match envelope.packet(Field::PacketMessage) {
            Some(packet) => match packet.auth_tag() {
                Some(auth_tag) => (*auth_tag, packet.is_random()),
                None => return,
            },
            None => return,
        };
        if !util::require_condition(
            envelope,
            is_random || !session.has_keys(),
            "packet cannot be decrypted",
        ) {
            return;
        }

        if session.is_authenticated() {
            debug!(
                "Random packet from authenticated node {}, starting over",
                session.address()
            );
            let address = session.address().clone();
            self.registry.reset(&address, RequestError::SessionReset);
            session = self.registry.get_or_create(&address);
            envelope.overwrite(Field::Session, FieldValue::Session(session.clone()));
        }

        let id_nonce = match session.status() {
            SessionStatus::WhoAreYouSent => session
                .id_nonce()
                .unwrap_or_else(|| session.generate_id_nonce()),
            SessionStatus::RandomPacketSent if !session.has_keys() => {
                if session.local().node_id().raw() > session.node_id().raw() {
                    debug!(
                        "Both sides opened a handshake with {}, waiting for its challenge",
                        session.address()
                    );
                    return;
                }
                session.generate_id_nonce()
            }
            _ => session.generate_id_nonce(),
        };

        session.set_id_nonce(id_nonce);
        if !session.set_status(SessionStatus::WhoAreYouSent) {
            return;
        }
        let enr_seq = session.node_record().map(|enr| enr.seq()).unwrap_or(0);
        debug!(
            "Envelope #{}: sending WHOAREYOU to {}, known ENR seq {}",
            envelope.id(),
            session.address(),
            enr_seq
        );
        session.send_outgoing(Packet::whoareyou(
            &session.node_id(),
            enr_seq,
            auth_tag,
            id_nonce,
        ));
    }
}
