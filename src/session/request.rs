//! The requests a session tracks while waiting for replies.
use crate::{
    error::RequestError,
    packet::{AuthTag, Packet},
    rpc::{Message, RequestId},
    Enr,
};
use std::net::IpAddr;
use tokio::sync::oneshot;

/// The kind of exchange a request drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Ping,
    FindNode,
    /// Establishes a session without an RPC exchange of its own.
    Handshake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, nothing carrying the request has been sent.
    Await,
    /// The packet carrying the request has been sent.
    Sent,
}

/// How a handshake request interacts with the auth-header packet.
#[derive(Debug, Clone)]
pub enum HandshakeContinuation {
    /// Build the auth-header packet when the challenge arrives, but hand it to the caller instead
    /// of sending it.
    Capture,
    /// Send this previously captured auth-header packet and resolve once the session is
    /// authenticated.
    Deliver(Box<Packet>),
}

/// Request-specific options.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// A successful reply marks the peer as live in the node store.
    pub liveness_update: bool,
    /// The log distance a FINDNODE asks for.
    pub distance: Option<u64>,
    pub handshake: Option<HandshakeContinuation>,
}

impl TaskOptions {
    pub fn liveness() -> Self {
        TaskOptions {
            liveness_update: true,
            ..Default::default()
        }
    }

    pub fn distance(distance: u64) -> Self {
        TaskOptions {
            liveness_update: true,
            distance: Some(distance),
            handshake: None,
        }
    }

    pub fn handshake(continuation: HandshakeContinuation) -> Self {
        TaskOptions {
            handshake: Some(continuation),
            ..Default::default()
        }
    }

    pub fn is_capture(&self) -> bool {
        matches!(self.handshake, Some(HandshakeContinuation::Capture))
    }

    /// The captured packet a deliver request sends.
    pub fn deliver_packet(&self) -> Option<&Packet> {
        match &self.handshake {
            Some(HandshakeContinuation::Deliver(packet)) => Some(packet),
            _ => None,
        }
    }
}

/// The successful result of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Pong {
        enr_seq: u64,
        ip: IpAddr,
        port: u16,
    },
    Nodes(Vec<Enr>),
    /// The session is authenticated.
    Established,
    /// The auth-header packet of a captured handshake.
    AuthPacket(Box<Packet>),
}

impl RequestOutcome {
    /// The kind of request the outcome answers.
    pub fn task(&self) -> TaskType {
        match self {
            RequestOutcome::Pong { .. } => TaskType::Ping,
            RequestOutcome::Nodes(_) => TaskType::FindNode,
            RequestOutcome::Established | RequestOutcome::AuthPacket(_) => TaskType::Handshake,
        }
    }
}

pub type RequestResult = Result<RequestOutcome, RequestError>;

/// The signal a request resolves exactly once.
pub type Completion = oneshot::Sender<RequestResult>;

/// A snapshot of a pending request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub id: RequestId,
    pub task: TaskType,
    pub status: TaskStatus,
    pub options: TaskOptions,
    /// The auth-tag of the last packet sent on behalf of the request.
    pub auth_tag: Option<AuthTag>,
}

impl RequestInfo {
    /// The RPC message that carries the request. Handshake requests are carried by a PING so the
    /// peer has something to answer.
    pub fn to_message(&self, enr_seq: u64) -> Message {
        match self.task {
            TaskType::FindNode => Message::FindNode {
                id: self.id.clone(),
                distances: vec![self.options.distance.unwrap_or(0)],
            },
            TaskType::Ping | TaskType::Handshake => Message::Ping {
                id: self.id.clone(),
                enr_seq,
            },
        }
    }
}

/// A request in a session's request table.
#[derive(Debug)]
pub struct PendingRequest {
    pub info: RequestInfo,
    completion: Completion,
    /// NODES packets still expected, once the first one announced the total.
    pub remaining_responses: Option<u64>,
    /// Records received so far.
    pub nodes: Vec<Enr>,
}

impl PendingRequest {
    pub(crate) fn new(info: RequestInfo, completion: Completion) -> Self {
        PendingRequest {
            info,
            completion,
            remaining_responses: None,
            nodes: Vec::new(),
        }
    }

    /// Consumes the request, resolving its completion signal. Returns false if the caller stopped
    /// listening.
    pub(crate) fn resolve(self, result: RequestResult) -> bool {
        self.completion.send(result).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_messages() {
        let mut info = RequestInfo {
            id: RequestId(vec![1]),
            task: TaskType::FindNode,
            status: TaskStatus::Await,
            options: TaskOptions::distance(255),
            auth_tag: None,
        };
        assert_eq!(
            info.to_message(3),
            Message::FindNode {
                id: RequestId(vec![1]),
                distances: vec![255]
            }
        );

        info.task = TaskType::Handshake;
        info.options = TaskOptions::handshake(HandshakeContinuation::Capture);
        assert!(info.options.is_capture());
        assert!(info.options.deliver_packet().is_none());
        assert_eq!(
            info.to_message(3),
            Message::Ping {
                id: RequestId(vec![1]),
                enr_seq: 3
            }
        );
    }

    #[test]
    fn resolve_reports_dropped_receivers() {
        let info = RequestInfo {
            id: RequestId::random(),
            task: TaskType::Ping,
            status: TaskStatus::Await,
            options: TaskOptions::liveness(),
            auth_tag: None,
        };

        let (tx, mut rx) = oneshot::channel();
        assert!(PendingRequest::new(info.clone(), tx).resolve(Ok(RequestOutcome::Established)));
        assert_eq!(rx.try_recv().unwrap(), Ok(RequestOutcome::Established));

        let (tx, rx) = oneshot::channel();
        drop(rx);
        assert!(!PendingRequest::new(info, tx).resolve(Err(RequestError::Timeout)));
    }
}
