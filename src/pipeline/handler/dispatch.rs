use crate::{
    crypto,
    error::RequestError,
    pipeline::{util, Envelope, EnvelopeHandler, Field},
    rpc::{Message, RequestId},
    session::{NodeSession, RequestOutcome, SessionRegistry, TaskType},
    Enr,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, trace, warn};

/// Records per NODES message, keeping each packet within the datagram limit.
const NODES_PER_MESSAGE: usize = 3;

/// The most NODES messages one FINDNODE is answered with. A full bucket of 16 records fits in six
/// messages.
pub(super) const MAX_NODES_RESPONSES: u64 = 6;

/// Answers requests and hands replies to the requests they belong to.
pub struct MessageDispatchHandler {
    registry: Arc<SessionRegistry>,
}

impl MessageDispatchHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        MessageDispatchHandler { registry }
    }
}

impl EnvelopeHandler for MessageDispatchHandler {
    fn handle(&mut self, envelope: &mut Envelope) {
        if util::is_bad_packet(envelope) || !util::require_field(envelope, Field::Message) {
            return;
        }
        let (session, message) = match (envelope.session(), envelope.message()) {
            (Some(session), Some(message)) => (session, message.clone()),
            _ => return,
        };
        trace!(
            "Envelope #{}: {} from {}",
            envelope.id(),
            message,
            session.address()
        );

        match message {
            Message::Ping { id, enr_seq } => self.handle_ping(&session, id, enr_seq),
            Message::FindNode { id, distances } => self.handle_find_node(&session, id, distances),
            Message::Pong {
                id,
                enr_seq,
                ip,
                port,
            } => {
                let answers_ping = session
                    .request_info(&id)
                    .map_or(false, |request| request.task == TaskType::Ping);
                if answers_ping {
                    session.set_reported_address(SocketAddr::new(ip, port));
                }
                let outcome = RequestOutcome::Pong { enr_seq, ip, port };
                log_clear_error(&session, &id, session.clear_request(&id, TaskType::Ping, outcome));
            }
            Message::Nodes { id, total, nodes } => {
                self.handle_nodes(&session, id, total, nodes)
            }
        }
    }
}

impl MessageDispatchHandler {
    fn handle_ping(&self, session: &NodeSession, id: RequestId, enr_seq: u64) {
        if let Some(record) = session.node_record() {
            if record.seq() < enr_seq {
                debug!(
                    "Node {} announced ENR seq {}, we know seq {}",
                    session.address(),
                    enr_seq,
                    record.seq()
                );
            }
        }
        let remote = session.address().socket_addr;
        let pong = Message::Pong {
            id,
            enr_seq: session.local().seq(),
            ip: remote.ip(),
            port: remote.port(),
        };
        if let Err(e) = session.send_message(&pong) {
            warn!("Could not answer PING of {}: {}", session.address(), e);
        }
    }

    fn handle_find_node(&self, session: &NodeSession, id: RequestId, distances: Vec<u64>) {
        let local = session.local();
        let limit = self.registry.config().max_nodes_response;
        let mut records: Vec<Enr> = Vec::new();
        for distance in distances {
            if records.len() >= limit {
                break;
            }
            if distance == 0 {
                records.push(local.enr());
            } else {
                let found = self.registry.node_store().nodes_at_distance(
                    &local.node_id(),
                    distance,
                    limit - records.len(),
                );
                records.extend(found);
            }
        }

        let chunks: Vec<Vec<Enr>> = if records.is_empty() {
            vec![Vec::new()]
        } else {
            records
                .chunks(NODES_PER_MESSAGE)
                .map(|chunk| chunk.to_vec())
                .collect()
        };
        let total = chunks.len() as u64;
        trace!(
            "Answering FINDNODE of {} with {} records in {} messages",
            session.address(),
            records.len(),
            total
        );
        for nodes in chunks {
            let response = Message::Nodes {
                id: id.clone(),
                total,
                nodes,
            };
            if let Err(e) = session.send_message(&response) {
                warn!("Could not answer FINDNODE of {}: {}", session.address(), e);
                return;
            }
        }
    }

    fn handle_nodes(&self, session: &NodeSession, id: RequestId, total: u64, nodes: Vec<Enr>) {
        let request = match session.request_info(&id) {
            Some(request) => request,
            None => {
                debug!(
                    "NODES for unknown request {} from {}",
                    id,
                    session.address()
                );
                return;
            }
        };
        if request.task != TaskType::FindNode {
            log_clear_error(
                session,
                &id,
                session.clear_request(&id, TaskType::FindNode, RequestOutcome::Nodes(Vec::new())),
            );
            return;
        }

        let total = if total > MAX_NODES_RESPONSES {
            warn!(
                "NODES from {} has a total larger than {}, nodes will be truncated",
                session.address(),
                MAX_NODES_RESPONSES
            );
            MAX_NODES_RESPONSES
        } else {
            total
        };

        let distance = request.options.distance.unwrap_or(0);
        let remote_id = session.node_id();
        let accepted: Vec<Enr> = nodes
            .into_iter()
            .filter(|enr| {
                let in_range = crypto::log_distance(&enr.node_id(), &remote_id) == distance;
                if !in_range {
                    debug!(
                        "Dropping record {} outside the requested distance {} of {}",
                        enr.node_id(),
                        distance,
                        session.address()
                    );
                }
                in_range
            })
            .collect();
        for enr in &accepted {
            self.registry.node_store().save(enr.clone());
        }

        // a reply does not extend the deadline of its request
        let progress = session.modify_request(&id, |pending| {
            pending.nodes.extend(accepted);
            let remaining = pending
                .remaining_responses
                .unwrap_or_else(|| total.max(1))
                .saturating_sub(1);
            pending.remaining_responses = Some(remaining);
            if remaining == 0 {
                NodesProgress::Complete(std::mem::take(&mut pending.nodes))
            } else {
                NodesProgress::Waiting(remaining)
            }
        });
        match progress {
            Some(NodesProgress::Complete(nodes)) => log_clear_error(
                session,
                &id,
                session.clear_request(&id, TaskType::FindNode, RequestOutcome::Nodes(nodes)),
            ),
            Some(NodesProgress::Waiting(remaining)) => trace!(
                "Waiting for {} more NODES for request {} of {}",
                remaining,
                id,
                session.address()
            ),
            None => {}
        }
    }
}

enum NodesProgress {
    Complete(Vec<Enr>),
    Waiting(u64),
}

fn log_clear_error(session: &NodeSession, id: &RequestId, result: Result<(), RequestError>) {
    match result {
        Ok(()) => {}
        Err(RequestError::UnknownRequest) => debug!(
            "Reply to unknown request {} from {}",
            id,
            session.address()
        ),
        Err(e) => warn!("Reply {} from {} rejected: {}", id, session.address(), e),
    }
}
