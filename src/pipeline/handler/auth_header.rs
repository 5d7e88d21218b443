use crate::{
    crypto,
    error::Discv5Error,
    metrics::METRICS,
    packet::{AuthHeader, Packet, Tag},
    pipeline::{util, Envelope, EnvelopeHandler, Field, FieldValue},
    rpc::Message,
    session::{Keys, NodeSession, SessionRegistry, SessionStatus},
    Enr,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Completes a handshake we challenged: verifies the auth-header and the message it carries, and
/// only then installs the keys and authenticates the session.
pub struct AuthHeaderHandler {
    registry: Arc<SessionRegistry>,
}

impl AuthHeaderHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        AuthHeaderHandler { registry }
    }
}

impl EnvelopeHandler for AuthHeaderHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope) || !util::require_field(envelope, Field::PacketAuthMessage)
        {
            return;
        }
        let session = match envelope.session() {
            Some(session) => session,
            None => return,
        };
        let (tag, auth_header, ciphertext) = match envelope.packet(Field::PacketAuthMessage) {
            Some(Packet::AuthMessage {
                tag,
                auth_header,
                message,
            }) => (*tag, auth_header.clone(), message.clone()),
            _ => return,
        };
        if !util::require_condition(
            envelope,
            !session.is_authenticated(),
            "session not yet authenticated",
        ) {
            envelope.mark_bad(format!(
                "Auth-header from already authenticated node {}",
                session.address()
            ));
            return;
        }
        let matches_challenge = session.id_nonce() == Some(auth_header.id_nonce);
        if !util::require_condition(envelope, matches_challenge, "auth-header answers our challenge")
        {
            envelope.mark_bad(format!(
                "Auth-header from {} does not answer our challenge",
                session.address()
            ));
            return;
        }

        match self.verify(&session, &tag, &auth_header, &ciphertext) {
            Ok((keys, record, message)) => {
                session.set_keys(keys);
                session.set_status(SessionStatus::Authenticated);
                if let Some(record) = record {
                    session.update_node_record(record);
                }
                METRICS.increment(&METRICS.handshakes);
                debug!(
                    "Envelope #{}: session {} authenticated",
                    envelope.id(),
                    session.address()
                );
                self.registry.authenticated(&session);
                envelope.put(Field::Message, FieldValue::Message(message));
                if session.first_await_request().is_some() {
                    session.schedule_next_task();
                }
            }
            Err(e) => {
                warn!(
                    "Rejected auth-header from {}: {}",
                    session.address(),
                    e
                );
                envelope.mark_bad(format!("Invalid auth-header: {}", e));
            }
        }
    }
}

impl AuthHeaderHandler {
    /// Derives the keys the auth-header claims and checks every part of it against them. Nothing
    /// is stored on the session.
    fn verify(
        &self,
        session: &NodeSession,
        tag: &Tag,
        auth_header: &AuthHeader,
        ciphertext: &[u8],
    ) -> Result<(Keys, Option<Enr>, Message), Discv5Error> {
        let local = session.local();
        let derived = crypto::derive_keys_from_pubkey(
            local.key(),
            &local.node_id(),
            &session.node_id(),
            &auth_header.id_nonce,
            &auth_header.ephemeral_pubkey,
        )?;
        let auth_response =
            crypto::decrypt_auth_response(&derived.auth_resp_key, &auth_header.auth_response)?;

        // the record the peer claims to be, falling back to the one we know
        let sent_record = auth_response.node_record.clone();
        let record = sent_record
            .clone()
            .or_else(|| session.node_record())
            .or_else(|| self.registry.node_store().resolve(&session.node_id()))
            .ok_or(Discv5Error::Custom("No ENR of the handshake initiator"))?;
        if record.node_id() != session.node_id() {
            return Err(Discv5Error::Custom("ENR does not match the packet tag"));
        }

        if !crypto::verify_authentication_nonce(
            &record.public_key(),
            &auth_header.ephemeral_pubkey,
            &auth_header.id_nonce,
            &auth_response.signature,
        ) {
            return Err(Discv5Error::InvalidSignature);
        }

        let plaintext = crypto::decrypt_message(
            &derived.initiator_key,
            auth_header.auth_tag,
            ciphertext,
            tag,
        )?;
        let message = Message::decode(&plaintext)?;

        Ok((Keys::recipient(&derived), sent_record, message))
    }
}
