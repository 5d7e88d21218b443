//! The envelope handlers and the order they run in.
//!
//! Inbound, for every received packet:
//!
//! 1. [`IncomingPacketHandler`] sorts the packet and recovers the sender's node id.
//! 2. [`WhoAreYouSessionResolver`] finds the session a WHOAREYOU answers.
//! 3. [`NodeIdToSessionHandler`] finds or creates the sender's session.
//! 4. [`ChallengeHandler`] challenges packets we cannot decrypt.
//! 5. [`WhoAreYouHandler`] answers a challenge with an auth-header.
//! 6. [`AuthHeaderHandler`] completes a handshake we challenged.
//! 7. [`MessagePacketHandler`] decrypts messages.
//! 8. [`MessageDispatchHandler`] answers requests and resolves replies.
//! 9. [`BadPacketHandler`] accounts for failed envelopes.
//!
//! Outbound, for new requests, packets to send and sessions with waiting requests:
//!
//! 1. [`OutgoingParcelHandler`] hands packets to the transport.
//! 2. [`NodeToSessionLookup`] resolves the record a request is addressed to.
//! 3. [`NodeIdToSessionHandler`] finds or creates the session.
//! 4. [`NewTaskHandler`] queues the request on the session.
//! 5. [`NextTaskHandler`] sends the oldest waiting request.
use super::EnvelopeHandler;
use crate::{session::SessionRegistry, transport::Transport};
use std::sync::Arc;

mod auth_header;
mod bad_packet;
mod challenge;
mod dispatch;
mod incoming;
mod message;
mod outgoing;
mod session_lookup;
mod task;
mod whoareyou;

#[cfg(test)]
mod tests;

pub use auth_header::AuthHeaderHandler;
pub use bad_packet::BadPacketHandler;
pub use challenge::ChallengeHandler;
pub use dispatch::MessageDispatchHandler;
pub use incoming::IncomingPacketHandler;
pub use message::MessagePacketHandler;
pub use outgoing::OutgoingParcelHandler;
pub use session_lookup::{NodeIdToSessionHandler, NodeToSessionLookup, WhoAreYouSessionResolver};
pub use task::{NewTaskHandler, NextTaskHandler};
pub use whoareyou::WhoAreYouHandler;

/// The handlers of the inbound pipeline, in order.
pub fn inbound_handlers(registry: &Arc<SessionRegistry>) -> Vec<Box<dyn EnvelopeHandler>> {
    vec![
        Box::new(IncomingPacketHandler::new(registry.clone())),
        Box::new(WhoAreYouSessionResolver::new(registry.clone())),
        Box::new(NodeIdToSessionHandler::new(registry.clone())),
        Box::new(ChallengeHandler::new(registry.clone())),
        Box::new(WhoAreYouHandler::new(registry.clone())),
        Box::new(AuthHeaderHandler::new(registry.clone())),
        Box::new(MessagePacketHandler::new(registry.clone())),
        Box::new(MessageDispatchHandler::new(registry.clone())),
        Box::new(BadPacketHandler::new()),
    ]
}

/// The handlers of the outbound pipeline, in order.
pub fn outbound_handlers(
    registry: &Arc<SessionRegistry>,
    transport: Arc<dyn Transport>,
) -> Vec<Box<dyn EnvelopeHandler>> {
    vec![
        Box::new(OutgoingParcelHandler::new(transport)),
        Box::new(NodeToSessionLookup::new(registry.clone())),
        Box::new(NodeIdToSessionHandler::new(registry.clone())),
        Box::new(NewTaskHandler::new()),
        Box::new(NextTaskHandler::new()),
        Box::new(BadPacketHandler::new()),
    ]
}
