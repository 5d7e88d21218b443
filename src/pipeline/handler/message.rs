use crate::{
    metrics::METRICS,
    packet::Packet,
    pipeline::{util, Envelope, EnvelopeHandler, Field, FieldValue},
    rpc::Message,
    session::{SessionRegistry, SessionStatus},
};
use std::sync::Arc;
use tracing::debug;

/// Decrypts a message packet with the session keys.
///
/// The first message that decrypts on a session still waiting for confirmation of its auth-header
/// authenticates it, and retires the sessions of the node at other addresses. A packet that fails
/// to decrypt is dropped and the session left as it was.
pub struct MessagePacketHandler {
    registry: Arc<SessionRegistry>,
}

impl MessagePacketHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        MessagePacketHandler { registry }
    }
}

impl EnvelopeHandler for MessagePacketHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope)
            || !util::require_field(envelope, Field::PacketMessage)
            || !util::require_absent(envelope, Field::Message)
        {
            return;
        }
        let session = match envelope.session() {
            Some(session) => session,
            None => return,
        };
        let (tag, auth_tag, ciphertext) = match envelope.packet(Field::PacketMessage) {
            Some(Packet::Message {
                tag,
                auth_tag,
                message,
            }) => (*tag, *auth_tag, message.clone()),
            _ => return,
        };
        if !util::require_condition(envelope, session.has_keys(), "session holds keys") {
            return;
        }

        let plaintext = match session.decrypt_message(auth_tag, &ciphertext, &tag) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                envelope.mark_bad(format!(
                    "Message from {} failed to decrypt: {}",
                    session.address(),
                    e
                ));
                return;
            }
        };
        let message = match Message::decode(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                envelope.mark_bad(format!(
                    "Message from {} failed to decode: {}",
                    session.address(),
                    e
                ));
                return;
            }
        };

        if !session.is_authenticated() && session.set_status(SessionStatus::Authenticated) {
            METRICS.increment(&METRICS.handshakes);
            debug!(
                "Envelope #{}: session {} authenticated by its first reply",
                envelope.id(),
                session.address()
            );
            self.registry.authenticated(&session);
            session.established();
            if session.first_await_request().is_some() {
                session.schedule_next_task();
            }
        }
        envelope.put(Field::Message, FieldValue::Message(message));
    }
}
