//! The outbound request drivers: admitting new requests to a session and sending the next waiting
//! one.
use crate::{
    error::RequestError,
    packet::{self, Packet},
    pipeline::{util, Envelope, EnvelopeHandler, Field},
    session::{
        NodeSession, RequestInfo, RequestOutcome, SessionStatus, TaskOptions, TaskType,
    },
};
use tracing::{debug, trace, warn};

/// Creates the pending request an envelope asks for.
#[derive(Default)]
pub struct NewTaskHandler;

impl NewTaskHandler {
    pub fn new() -> Self {
        NewTaskHandler
    }
}

impl EnvelopeHandler for NewTaskHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope)
            || !util::require_field(envelope, Field::Task)
            || !util::require_field(envelope, Field::Completion)
        {
            return;
        }
        let session = match envelope.session() {
            Some(session) => session,
            None => return,
        };
        let task = match envelope.task() {
            Some(task) => task,
            None => return,
        };
        let options = envelope
            .task_options()
            .cloned()
            .unwrap_or_else(TaskOptions::default);
        if let Some(enr) = envelope.node().cloned() {
            session.update_node_record(enr);
        }
        let completion = match envelope.take_completion() {
            Some(completion) => completion,
            None => return,
        };

        match session.create_next_request(task, options, completion) {
            Ok(info) => trace!(
                "Envelope #{}: {:?} request {} queued for {}",
                envelope.id(),
                task,
                info.id,
                session.address()
            ),
            Err(e) => envelope.mark_bad(format!(
                "Session {} refused a {:?} request: {}",
                session.address(),
                task,
                e
            )),
        }
    }
}

/// Sends the oldest waiting request of a session, if the session can carry it now.
///
/// An authenticated session sends the request as an encrypted message. Any other session opens a
/// handshake with a random packet, unless a handshake is already under way or the request carries
/// a captured auth-header packet to deliver.
#[derive(Default)]
pub struct NextTaskHandler;

impl NextTaskHandler {
    pub fn new() -> Self {
        NextTaskHandler
    }
}

impl EnvelopeHandler for NextTaskHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope) || !util::require_field(envelope, Field::Session) {
            return;
        }
        let session = match envelope.session() {
            Some(session) => session,
            None => return,
        };
        let request = match session.first_await_request() {
            Some(request) => request,
            None => {
                trace!(
                    "Envelope #{}: no request waiting for {}",
                    envelope.id(),
                    session.address()
                );
                return;
            }
        };

        if util::require_session_state(envelope, &session, &[SessionStatus::Authenticated]) {
            send_authenticated(&session, &request);
            if session.first_await_request().is_some() {
                session.schedule_next_task();
            }
        } else {
            open_handshake(&session, &request);
        }
    }
}

fn send_authenticated(session: &NodeSession, request: &RequestInfo) {
    if request.task == TaskType::Handshake {
        if request.options.is_capture() {
            session.fail_request(&request.id, RequestError::AlreadyEstablished);
        } else {
            let _ = session.clear_request(
                &request.id,
                TaskType::Handshake,
                RequestOutcome::Established,
            );
        }
        return;
    }

    let message = request.to_message(session.local().seq());
    match session.send_message(&message) {
        Ok(auth_tag) => {
            session.mark_sent(&request.id, auth_tag);
        }
        Err(e) => {
            warn!(
                "Could not encrypt request {} for {}: {}",
                request.id,
                session.address(),
                e
            );
            session.fail_request(&request.id, RequestError::InvalidKey(e.to_string()));
        }
    }
}

fn open_handshake(session: &NodeSession, request: &RequestInfo) {
    if let Some(packet) = request.options.deliver_packet() {
        match packet.auth_tag().copied() {
            Some(auth_tag) => {
                debug!("Delivering the auth-header packet to {}", session.address());
                session.set_auth_tag(auth_tag);
                session.mark_sent(&request.id, auth_tag);
                session.send_outgoing(packet.clone());
            }
            None => {
                session.fail_request(
                    &request.id,
                    RequestError::Cancelled("not an auth-header packet".into()),
                );
            }
        }
        return;
    }
    // our challenge is out, the peer's auth-header completes the handshake
    if session.status() == SessionStatus::WhoAreYouSent || session.awaits_challenge() {
        trace!(
            "Handshake with {} in progress, request {} waits",
            session.address(),
            request.id
        );
        return;
    }

    let tag = packet::tag(&session.local().node_id(), &session.node_id());
    let packet = Packet::random(tag);
    if let Some(auth_tag) = packet.auth_tag().copied() {
        session.set_auth_tag(auth_tag);
        session.update_request_info(&request.id, |pending| {
            pending.info.auth_tag = Some(auth_tag)
        });
        if session.status() == SessionStatus::Initial {
            session.set_status(SessionStatus::RandomPacketSent);
        }
        debug!(
            "Opening a handshake with {} for request {}",
            session.address(),
            request.id
        );
        session.send_outgoing(packet);
    }
}
