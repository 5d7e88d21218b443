//! Handlers that attach a session to the envelope.
use crate::{
    error::RequestError,
    node_info::NodeAddress,
    packet::Packet,
    pipeline::{util, Envelope, EnvelopeHandler, Field, FieldValue},
    session::SessionRegistry,
};
use std::sync::Arc;
use tracing::debug;

/// Finds the session a WHOAREYOU answers through the auth-tag it echoes.
pub struct WhoAreYouSessionResolver {
    registry: Arc<SessionRegistry>,
}

impl WhoAreYouSessionResolver {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        WhoAreYouSessionResolver { registry }
    }
}

impl EnvelopeHandler for WhoAreYouSessionResolver {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope)
            || !util::require_field(envelope, Field::PacketWhoAreYou)
            || !util::require_absent(envelope, Field::Session)
        {
            return;
        }
        let auth_tag = match envelope.packet(Field::PacketWhoAreYou) {
            Some(Packet::WhoAreYou { auth_tag, .. }) => *auth_tag,
            _ => return,
        };
        let remote = envelope.remote();

        match self.registry.auth_tags().get(&auth_tag) {
            Some(session) if Some(session.address().socket_addr) == remote => {
                envelope.put(Field::Session, FieldValue::Session(session));
            }
            Some(session) => envelope.mark_bad(format!(
                "WHOAREYOU for session {} arrived from {:?}",
                session.address(),
                remote
            )),
            None => envelope.mark_bad(format!(
                "WHOAREYOU with unknown auth-tag {}",
                hex::encode(auth_tag)
            )),
        }
    }
}

/// Turns the record a new request is addressed to into a session lookup.
pub struct NodeToSessionLookup {
    registry: Arc<SessionRegistry>,
}

impl NodeToSessionLookup {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        NodeToSessionLookup { registry }
    }
}

impl EnvelopeHandler for NodeToSessionLookup {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope)
            || !util::require_field(envelope, Field::Node)
            || !util::require_absent(envelope, Field::Session)
        {
            return;
        }
        let enr = match envelope.node() {
            Some(enr) => enr.clone(),
            None => return,
        };
        if enr.node_id() == self.registry.local().node_id() {
            envelope.fail_completion(RequestError::InvalidEnr("ENR is our own".into()));
            envelope.mark_bad("Request addressed to ourselves");
            return;
        }
        match NodeAddress::from_enr(&enr) {
            Some(address) => {
                self.registry.node_store().save(enr);
                envelope.put(Field::SessionLookup, FieldValue::Lookup(address));
            }
            None => {
                debug!("ENR of {} carries no UDP socket", enr.node_id());
                envelope.fail_completion(RequestError::InvalidEnr(
                    "ENR carries no UDP socket".into(),
                ));
                envelope.mark_bad("Request addressed to an unreachable ENR");
            }
        }
    }
}

/// Attaches the session of the looked up address, creating it if needed.
pub struct NodeIdToSessionHandler {
    registry: Arc<SessionRegistry>,
}

impl NodeIdToSessionHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        NodeIdToSessionHandler { registry }
    }
}

impl EnvelopeHandler for NodeIdToSessionHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope)
            || !util::require_field(envelope, Field::SessionLookup)
            || !util::require_absent(envelope, Field::Session)
        {
            return;
        }
        if let Some(address) = envelope.lookup().cloned() {
            let session = self.registry.get_or_create(&address);
            envelope.put(Field::Session, FieldValue::Session(session));
        }
    }
}
