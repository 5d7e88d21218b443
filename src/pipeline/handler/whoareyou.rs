use crate::{
    crypto,
    error::{Discv5Error, RequestError},
    packet::{self, AuthHeader, AuthResponse, Packet},
    pipeline::{util, Envelope, EnvelopeHandler, Field},
    session::{
        Keys, NodeSession, RequestInfo, RequestOutcome, SessionRegistry, SessionStatus, TaskType,
    },
    Enr,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Answers a WHOAREYOU with an auth-header packet carrying the first waiting request.
///
/// The session keys are installed as soon as the auth-header is built; the session becomes
/// authenticated once the first reply from the peer decrypts. A repeated challenge before that
/// replaces the keys.
pub struct WhoAreYouHandler {
    registry: Arc<SessionRegistry>,
}

impl WhoAreYouHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        WhoAreYouHandler { registry }
    }
}

impl EnvelopeHandler for WhoAreYouHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope) || !util::require_field(envelope, Field::PacketWhoAreYou) {
            return;
        }
        let session = match envelope.session() {
            Some(session) => session,
            None => return,
        };
        let (id_nonce, enr_seq) = match envelope.packet(Field::PacketWhoAreYou) {
            Some(Packet::WhoAreYou {
                id_nonce, enr_seq, ..
            }) => (*id_nonce, *enr_seq),
            _ => return,
        };

        if session.is_authenticated() {
            // the peer lost its keys, start over
            debug!(
                "WHOAREYOU from {} with established keys, resetting the session",
                session.address()
            );
            self.registry
                .reset(session.address(), RequestError::SessionReset);
            return;
        }

        let request = match session.first_await_request() {
            Some(request) => request,
            None => {
                envelope.mark_bad(format!(
                    "WHOAREYOU from {} with no request waiting",
                    session.address()
                ));
                return;
            }
        };
        let record = match util::require_node_record(envelope, &session) {
            Some(record) => record,
            None => {
                session.fail_request(
                    &request.id,
                    RequestError::InvalidEnr("no record of the challenger".into()),
                );
                envelope.mark_bad(format!("WHOAREYOU from unknown node {}", session.address()));
                return;
            }
        };

        let packet = match build_auth_packet(&session, &record, &request, &id_nonce, enr_seq) {
            Ok((packet, keys)) => {
                session.set_keys(keys);
                packet
            }
            Err(e) => {
                warn!(
                    "Could not answer the WHOAREYOU of {}: {}",
                    session.address(),
                    e
                );
                session.fail_request(&request.id, RequestError::InvalidKey(e.to_string()));
                envelope.mark_bad(format!("Unanswerable WHOAREYOU: {}", e));
                return;
            }
        };
        session.set_status(SessionStatus::RandomPacketSent);

        if request.task == TaskType::Handshake && request.options.is_capture() {
            debug!("Captured the auth-header packet for {}", session.address());
            let _ = session.clear_request(
                &request.id,
                TaskType::Handshake,
                RequestOutcome::AuthPacket(Box::new(packet)),
            );
        } else if let Some(auth_tag) = packet.auth_tag().copied() {
            session.set_auth_tag(auth_tag);
            session.mark_sent(&request.id, auth_tag);
            session.send_outgoing(packet);
        }

        if session.first_await_request().is_some() {
            session.schedule_next_task();
        }
    }
}

/// Derives the session keys against the challenger's static key and builds the auth-header
/// packet that carries `request`.
fn build_auth_packet(
    session: &NodeSession,
    record: &Enr,
    request: &RequestInfo,
    id_nonce: &packet::IdNonce,
    known_seq: u64,
) -> Result<(Packet, Keys), Discv5Error> {
    let local = session.local();
    let local_id = local.node_id();
    let remote_id = session.node_id();

    let (derived, ephem_pubkey) =
        crypto::generate_session_keys(&local_id, &remote_id, &record.public_key(), id_nonce)?;
    let signature = crypto::sign_nonce(local.key(), id_nonce, &ephem_pubkey)?;

    let local_enr = local.enr();
    let node_record = if known_seq < local_enr.seq() {
        Some(local_enr)
    } else {
        None
    };
    let auth_response = AuthResponse::new(&signature, node_record);
    let auth_response = crypto::encrypt_auth_response(&derived.auth_resp_key, &auth_response)?;

    let tag = packet::tag(&local_id, &remote_id);
    let auth_tag = session.generate_nonce();
    let message = request.to_message(local.seq()).encode();
    let message = crypto::encrypt_message(&derived.initiator_key, auth_tag, &message, &tag)?;

    let packet = Packet::AuthMessage {
        tag,
        auth_header: AuthHeader::new(auth_tag, *id_nonce, ephem_pubkey, auth_response),
        message,
    };
    Ok((packet, Keys::initiator(&derived)))
}
