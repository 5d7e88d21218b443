//! Session management for the Discv5 handshake.
//!
//! A [`NodeSession`] holds everything we know about one remote node at one socket address: the
//! handshake status, the negotiated keys and the requests waiting for replies. The handshake
//! progresses through the following states:
//!
//! ```text
//!            Initial
//!            /     \
//!  WhoAreYouSent   RandomPacketSent
//!            \     /
//!         Authenticated
//! ```
//!
//! The recipient of a first contact issues a challenge (`WhoAreYouSent`) and becomes
//! `Authenticated` once a valid auth-header arrives. The initiator opens with a random packet
//! (`RandomPacketSent`), answers the challenge with an auth-header and becomes `Authenticated` once
//! the first reply from the peer decrypts.
//!
//! Status never moves backwards. A session whose keys are no longer usable is discarded by the
//! [`SessionRegistry`] and replaced by a new one.
//!
//! Every request has an expiration timer. A request leaves the request table exactly once: by a
//! matching reply, by failure, by expiry or by cancellation, and its completion signal is resolved
//! at that moment.
use crate::{
    crypto::{self, DerivedKeys, Key},
    error::{Discv5Error, RequestError},
    metrics::METRICS,
    node_info::{LocalNode, NodeAddress},
    node_store::NodeStore,
    packet::{self, AuthTag, IdNonce, Packet},
    pipeline::{Envelope, Field, FieldValue, Pipeline},
    rpc::{Message, RequestId},
    scheduler::{ExpirationScheduler, Scheduler},
    Enr,
};
use enr::NodeId;
use futures::future::AbortHandle;
use hashlink::LinkedHashMap;
use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};
use tracing::{debug, trace, warn};
use zeroize::Zeroize;

mod registry;
mod request;

pub use registry::{AuthTagRepository, SessionRegistry};
pub use request::{
    Completion, HandshakeContinuation, PendingRequest, RequestInfo, RequestOutcome, RequestResult,
    TaskOptions, TaskStatus, TaskType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Nothing has been exchanged yet.
    Initial,
    /// We challenged the peer and wait for its auth-header.
    WhoAreYouSent,
    /// We opened with a random packet and wait for the challenge, or for the confirmation of our
    /// auth-header.
    RandomPacketSent,
    /// Keys are negotiated and confirmed.
    Authenticated,
}

impl SessionStatus {
    /// Transitions may keep or raise the rank, never lower it.
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Initial => 0,
            SessionStatus::WhoAreYouSent | SessionStatus::RandomPacketSent => 1,
            SessionStatus::Authenticated => 2,
        }
    }
}

/// The session keys from our side of the exchange.
#[derive(Zeroize, Clone, PartialEq)]
#[zeroize(drop)]
pub struct Keys {
    /// The key we encrypt with.
    encryption_key: Key,
    /// The key we decrypt with.
    decryption_key: Key,
    auth_resp_key: Key,
}

impl Keys {
    /// Keys of the node that answered the challenge.
    pub fn initiator(derived: &DerivedKeys) -> Self {
        Keys {
            encryption_key: derived.initiator_key,
            decryption_key: derived.recipient_key,
            auth_resp_key: derived.auth_resp_key,
        }
    }

    /// Keys of the node that issued the challenge.
    pub fn recipient(derived: &DerivedKeys) -> Self {
        Keys {
            encryption_key: derived.recipient_key,
            decryption_key: derived.initiator_key,
            auth_resp_key: derived.auth_resp_key,
        }
    }

    pub fn auth_resp_key(&self) -> &Key {
        &self.auth_resp_key
    }
}

struct SessionState {
    status: SessionStatus,
    /// The best known record of the peer.
    record: Option<Enr>,
    /// The nonce of the challenge we issued.
    id_nonce: Option<IdNonce>,
    /// Our address as the peer last reported it in a PONG.
    reported_address: Option<SocketAddr>,
    keys: Option<Keys>,
    /// Pending requests, oldest first.
    requests: LinkedHashMap<RequestId, PendingRequest>,
    /// Set on teardown. No request is accepted afterwards.
    closed: Option<RequestError>,
    next_task: Option<AbortHandle>,
}

/// The handshake and request state of one remote node.
pub struct NodeSession {
    self_ref: Weak<NodeSession>,
    address: NodeAddress,
    local: Arc<LocalNode>,
    state: Mutex<SessionState>,
    expirations: ExpirationScheduler<RequestId>,
    scheduler: Scheduler,
    next_task_delay: Duration,
    outgoing: Pipeline,
    node_store: Arc<dyn NodeStore>,
    auth_tags: Arc<AuthTagRepository>,
}

/// The timings a session works with.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub request_timeout: Duration,
    pub next_task_delay: Duration,
}

impl NodeSession {
    pub(crate) fn new(
        address: NodeAddress,
        local: Arc<LocalNode>,
        scheduler: Scheduler,
        timings: SessionTimings,
        outgoing: Pipeline,
        node_store: Arc<dyn NodeStore>,
        auth_tags: Arc<AuthTagRepository>,
    ) -> Arc<Self> {
        let record = node_store.resolve(&address.node_id);
        Arc::new_cyclic(|self_ref| NodeSession {
            self_ref: self_ref.clone(),
            address,
            local,
            state: Mutex::new(SessionState {
                status: SessionStatus::Initial,
                record,
                id_nonce: None,
                reported_address: None,
                keys: None,
                requests: LinkedHashMap::new(),
                closed: None,
                next_task: None,
            }),
            expirations: ExpirationScheduler::new(scheduler.clone(), timings.request_timeout),
            scheduler,
            next_task_delay: timings.next_task_delay,
            outgoing,
            node_store,
            auth_tags,
        })
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn node_id(&self) -> NodeId {
        self.address.node_id
    }

    pub fn local(&self) -> &Arc<LocalNode> {
        &self.local
    }

    /* Nonces */

    /// A fresh per-packet auth-tag.
    pub fn generate_nonce(&self) -> AuthTag {
        rand::random()
    }

    /// A fresh challenge nonce.
    pub fn generate_id_nonce(&self) -> IdNonce {
        rand::random()
    }

    pub fn id_nonce(&self) -> Option<IdNonce> {
        self.state.lock().id_nonce
    }

    pub fn set_id_nonce(&self, id_nonce: IdNonce) {
        self.state.lock().id_nonce = Some(id_nonce);
    }

    /* Status and keys */

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    /// Moves the session to `status`. A transition that would lower the status is refused.
    pub fn set_status(&self, status: SessionStatus) -> bool {
        let mut state = self.state.lock();
        if status.rank() < state.status.rank() {
            warn!(
                "Refused session transition {:?} -> {:?} for {}",
                state.status, status, self.address
            );
            return false;
        }
        if state.status != status {
            debug!(
                "Session {} moved {:?} -> {:?}",
                self.address, state.status, status
            );
            state.status = status;
        }
        true
    }

    /// Installs the negotiated keys. Keys of an unconfirmed handshake are replaced by a newer
    /// handshake; the keys of an authenticated session are final.
    pub fn set_keys(&self, keys: Keys) -> bool {
        let mut state = self.state.lock();
        if state.status == SessionStatus::Authenticated {
            warn!("Session keys of {} are already confirmed", self.address);
            return false;
        }
        if state.keys.is_some() {
            debug!("Replacing unconfirmed session keys of {}", self.address);
        }
        state.keys = Some(keys);
        true
    }

    pub fn has_keys(&self) -> bool {
        self.state.lock().keys.is_some()
    }

    /// Encrypts a message to the peer. `aad` is the tag of the carrying packet.
    pub fn encrypt_message(
        &self,
        auth_tag: AuthTag,
        msg: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Discv5Error> {
        match &self.state.lock().keys {
            Some(keys) => crypto::encrypt_message(&keys.encryption_key, auth_tag, msg, aad),
            None => Err(Discv5Error::SessionNotEstablished),
        }
    }

    pub fn decrypt_message(
        &self,
        auth_tag: AuthTag,
        msg: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Discv5Error> {
        match &self.state.lock().keys {
            Some(keys) => crypto::decrypt_message(&keys.decryption_key, auth_tag, msg, aad),
            None => Err(Discv5Error::SessionNotEstablished),
        }
    }

    /* Records */

    pub fn node_record(&self) -> Option<Enr> {
        self.state.lock().record.clone()
    }

    /// Keeps `enr` if it is newer than the known record and hands it to the node store.
    pub fn update_node_record(&self, enr: Enr) -> bool {
        if enr.node_id() != self.address.node_id {
            warn!(
                "Refused ENR of {} for session {}",
                enr.node_id(),
                self.address
            );
            return false;
        }
        {
            let mut state = self.state.lock();
            if let Some(known) = &state.record {
                if known.seq() > enr.seq() {
                    return false;
                }
            }
            state.record = Some(enr.clone());
        }
        self.node_store.save(enr);
        true
    }

    /// Our external address as seen by the peer, from its last PONG.
    pub fn reported_address(&self) -> Option<SocketAddr> {
        self.state.lock().reported_address
    }

    pub fn set_reported_address(&self, address: SocketAddr) {
        let mut state = self.state.lock();
        if state.reported_address != Some(address) {
            debug!("Node {} reports our address as {}", self.address, address);
            state.reported_address = Some(address);
        }
    }

    pub fn update_liveness(&self) {
        self.node_store.update_liveness(&self.address.node_id);
    }

    /* Auth-tags */

    /// Registers the auth-tag of a packet we sent, so a WHOAREYOU answering it finds this session.
    pub fn set_auth_tag(&self, auth_tag: AuthTag) {
        if let Some(session) = self.self_ref.upgrade() {
            self.auth_tags.put(auth_tag, &session);
        }
    }

    /// The auth-tag of the last packet we sent, if it is still resolvable.
    pub fn auth_tag(&self) -> Option<AuthTag> {
        self.auth_tags.tag_of(&self.address)
    }

    /// Releases the timers and the auth-tag of the session.
    pub fn cleanup(&self) {
        self.expirations.cancel_all();
        if let Some(handle) = self.state.lock().next_task.take() {
            handle.abort();
        }
        self.auth_tags.remove_session(&self.address);
    }

    /* Requests */

    /// Adds a request in `Await` status and arms its expiration timer.
    pub fn create_next_request(
        &self,
        task: TaskType,
        options: TaskOptions,
        completion: Completion,
    ) -> Result<RequestInfo, RequestError> {
        let info = {
            let mut state = self.state.lock();
            if let Some(reason) = state.closed.clone() {
                drop(state);
                let _ = completion.send(Err(reason.clone()));
                return Err(reason);
            }
            let mut id = RequestId::random();
            while state.requests.contains_key(&id) {
                id = RequestId::random();
            }
            let info = RequestInfo {
                id: id.clone(),
                task,
                status: TaskStatus::Await,
                options,
                auth_tag: None,
            };
            state
                .requests
                .insert(id, PendingRequest::new(info.clone(), completion));
            info
        };
        trace!(
            "New {:?} request {} for {}",
            info.task,
            info.id,
            self.address
        );
        self.arm_expiration(&info.id);
        Ok(info)
    }

    /// Applies `update` to the request and re-arms its timer. Returns `None` if the request is no
    /// longer pending.
    pub fn update_request_info<R>(
        &self,
        id: &RequestId,
        update: impl FnOnce(&mut PendingRequest) -> R,
    ) -> Option<R> {
        let result = self.modify_request(id, update)?;
        self.arm_expiration(id);
        Some(result)
    }

    /// Applies `update` to the request, keeping its deadline. Returns `None` if the request is no
    /// longer pending.
    pub fn modify_request<R>(
        &self,
        id: &RequestId,
        update: impl FnOnce(&mut PendingRequest) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock();
        match state.requests.get_mut(id) {
            Some(request) => Some(update(request)),
            None => {
                debug!(
                    "Request {} of {} is no longer pending, update ignored",
                    id, self.address
                );
                None
            }
        }
    }

    /// Marks the request as sent by the packet with `auth_tag`.
    pub fn mark_sent(&self, id: &RequestId, auth_tag: AuthTag) -> bool {
        self.update_request_info(id, |request| {
            request.info.status = TaskStatus::Sent;
            request.info.auth_tag = Some(auth_tag);
        })
        .is_some()
    }

    /// A copy of a pending request.
    pub fn request_info(&self, id: &RequestId) -> Option<RequestInfo> {
        self.state
            .lock()
            .requests
            .get(id)
            .map(|request| request.info.clone())
    }

    /// Resolves the request with `outcome` and removes it. `reply_kind` is the kind of request the
    /// reply answers; a different stored kind fails the request with `ProtocolMismatch`.
    pub fn clear_request(
        &self,
        id: &RequestId,
        reply_kind: TaskType,
        outcome: RequestOutcome,
    ) -> Result<(), RequestError> {
        let request = self
            .state
            .lock()
            .requests
            .remove(id)
            .ok_or(RequestError::UnknownRequest)?;
        self.expirations.cancel(id);

        if request.info.task != reply_kind {
            let error = RequestError::ProtocolMismatch {
                expected: request.info.task,
                found: reply_kind,
            };
            warn!(
                "Reply to request {} of {} does not match: {}",
                id, self.address, error
            );
            request.resolve(Err(error.clone()));
            return Err(error);
        }

        if request.info.options.liveness_update {
            self.update_liveness();
        }
        trace!("Request {} of {} completed", id, self.address);
        request.resolve(Ok(outcome));
        Ok(())
    }

    /// Fails the request with `error` and removes it.
    pub fn fail_request(&self, id: &RequestId, error: RequestError) -> bool {
        let request = self.state.lock().requests.remove(id);
        match request {
            Some(request) => {
                self.expirations.cancel(id);
                debug!("Request {} of {} failed: {}", id, self.address, error);
                request.resolve(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fails every pending request with `reason` and refuses new ones.
    pub fn cancel_all_requests(&self, reason: RequestError) {
        let requests: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            state.closed = Some(reason.clone());
            let mut requests = Vec::with_capacity(state.requests.len());
            while let Some((_, request)) = state.requests.pop_front() {
                requests.push(request);
            }
            requests
        };
        self.expirations.cancel_all();
        if !requests.is_empty() {
            debug!(
                "Cancelling {} requests of {}: {}",
                requests.len(),
                self.address,
                reason
            );
        }
        for request in requests {
            request.resolve(Err(reason.clone()));
        }
    }

    /// Resolves the handshake requests whose packets are sent. Called once the session is
    /// authenticated.
    pub fn established(&self) {
        let ids: Vec<RequestId> = self
            .state
            .lock()
            .requests
            .values()
            .filter(|request| {
                request.info.task == TaskType::Handshake
                    && request.info.status == TaskStatus::Sent
            })
            .map(|request| request.info.id.clone())
            .collect();
        for id in ids {
            let _ = self.clear_request(&id, TaskType::Handshake, RequestOutcome::Established);
        }
    }

    pub fn first_await_request(&self) -> Option<RequestInfo> {
        self.first_request(TaskStatus::Await)
    }

    pub fn first_sent_request(&self) -> Option<RequestInfo> {
        self.first_request(TaskStatus::Sent)
    }

    fn first_request(&self, status: TaskStatus) -> Option<RequestInfo> {
        self.state
            .lock()
            .requests
            .values()
            .find(|request| request.info.status == status)
            .map(|request| request.info.clone())
    }

    /// Whether a pending request already opened a handshake with its packet.
    pub fn awaits_challenge(&self) -> bool {
        self.state
            .lock()
            .requests
            .values()
            .any(|request| request.info.auth_tag.is_some())
    }

    pub fn pending_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    fn arm_expiration(&self, id: &RequestId) {
        let session = self.self_ref.clone();
        let expired = id.clone();
        self.expirations.put(id.clone(), move || {
            if let Some(session) = session.upgrade() {
                session.expire_request(&expired);
            }
        });
    }

    fn expire_request(&self, id: &RequestId) {
        let (request, resume) = {
            let mut state = self.state.lock();
            let request = match state.requests.remove(id) {
                Some(request) => request,
                None => return,
            };
            let resume = state.closed.is_none()
                && state
                    .requests
                    .values()
                    .any(|request| request.info.status == TaskStatus::Await);
            (request, resume)
        };
        debug!(
            "{:?} request {} of {} timed out",
            request.info.task, id, self.address
        );
        METRICS.increment(&METRICS.requests_timed_out);
        request.resolve(Err(RequestError::Timeout));
        if resume {
            self.push_next_task();
        }
    }

    /* Outgoing */

    /// Hands `packet` to the outgoing pipeline, addressed to the peer.
    pub fn send_outgoing(&self, packet: Packet) {
        trace!("Sending {} to {}", packet, self.address);
        let mut envelope = Envelope::new();
        envelope.put(
            Field::Parcel,
            FieldValue::Parcel(packet, self.address.socket_addr),
        );
        self.outgoing.push(envelope);
    }

    /// Encrypts `message` into a message packet and sends it. Returns the auth-tag of the packet.
    pub fn send_message(&self, message: &Message) -> Result<AuthTag, Discv5Error> {
        let tag = packet::tag(&self.local.node_id(), &self.address.node_id);
        let auth_tag = self.generate_nonce();
        let ciphertext = self.encrypt_message(auth_tag, &message.encode(), &tag)?;
        self.set_auth_tag(auth_tag);
        self.send_outgoing(Packet::Message {
            tag,
            auth_tag,
            message: ciphertext,
        });
        Ok(auth_tag)
    }

    /// Re-enters the outgoing pipeline so the next-task driver looks at this session.
    pub fn push_next_task(&self) {
        if let Some(session) = self.self_ref.upgrade() {
            let mut envelope = Envelope::new();
            envelope.put(Field::Session, FieldValue::Session(session));
            self.outgoing.push(envelope);
        }
    }

    /// Runs the next-task driver for this session after the next-task delay. A previously
    /// scheduled run is replaced.
    pub fn schedule_next_task(&self) {
        let session = self.self_ref.clone();
        let handle = self.scheduler.execute_after(self.next_task_delay, move || {
            if let Some(session) = session.upgrade() {
                session.push_next_task();
            }
        });
        if let Some(previous) = self.state.lock().next_task.replace(handle) {
            previous.abort();
        }
    }
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NodeSession")
            .field("address", &self.address)
            .field("status", &state.status)
            .field("has_keys", &state.keys.is_some())
            .field("requests", &state.requests.len())
            .finish()
    }
}

impl Drop for NodeSession {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.requests.is_empty() {
            let reason = state
                .closed
                .clone()
                .unwrap_or_else(|| RequestError::Cancelled("session dropped".into()));
            while let Some((_, request)) = state.requests.pop_front() {
                request.resolve(Err(reason.clone()));
            }
        }
    }
}
