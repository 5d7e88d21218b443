//! The sessions of one local node and the auth-tags that lead back to them.
use super::{NodeSession, SessionTimings};
use crate::{
    error::RequestError,
    lru_time_cache::LruTimeCache,
    metrics::METRICS,
    node_info::{LocalNode, NodeAddress},
    node_store::NodeStore,
    packet::AuthTag,
    pipeline::Pipeline,
    scheduler::Scheduler,
    Discv5Config,
};
use enr::NodeId;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};
use tracing::{debug, trace};

/// Maps the auth-tags of packets we sent to the session that sent them, for a limited time. A
/// WHOAREYOU carries no sender information besides the auth-tag it answers.
pub struct AuthTagRepository {
    inner: Mutex<AuthTags>,
}

struct AuthTags {
    sessions: LruTimeCache<AuthTag, (NodeAddress, Weak<NodeSession>)>,
    /// The latest auth-tag per session.
    latest: HashMap<NodeAddress, AuthTag>,
}

impl AuthTags {
    fn forget(&mut self, displaced: Vec<(AuthTag, (NodeAddress, Weak<NodeSession>))>) {
        for (auth_tag, (address, _)) in displaced {
            if self.latest.get(&address) == Some(&auth_tag) {
                self.latest.remove(&address);
            }
        }
    }
}

impl AuthTagRepository {
    pub fn new(ttl: Duration) -> Self {
        AuthTagRepository {
            inner: Mutex::new(AuthTags {
                sessions: LruTimeCache::new(ttl, None),
                latest: HashMap::new(),
            }),
        }
    }

    pub fn put(&self, auth_tag: AuthTag, session: &Arc<NodeSession>) {
        let address = session.address().clone();
        let mut inner = self.inner.lock();
        let displaced = inner
            .sessions
            .insert(auth_tag, (address.clone(), Arc::downgrade(session)));
        inner.forget(displaced);
        inner.latest.insert(address, auth_tag);
    }

    /// The live session that sent the packet with `auth_tag`.
    pub fn get(&self, auth_tag: &AuthTag) -> Option<Arc<NodeSession>> {
        self.inner
            .lock()
            .sessions
            .peek(auth_tag)
            .and_then(|(_, session)| session.upgrade())
    }

    /// The latest auth-tag sent by the session at `address`.
    pub fn tag_of(&self, address: &NodeAddress) -> Option<AuthTag> {
        let inner = self.inner.lock();
        let auth_tag = inner.latest.get(address)?;
        inner.sessions.peek(auth_tag).map(|_| *auth_tag)
    }

    /// Drops the latest auth-tag of the session at `address`.
    pub fn remove_session(&self, address: &NodeAddress) {
        let mut inner = self.inner.lock();
        if let Some(auth_tag) = inner.latest.remove(address) {
            inner.sessions.remove(&auth_tag);
        }
    }

    /// Drops expired auth-tags. Returns how many were dropped.
    pub fn expire(&self) -> usize {
        let mut inner = self.inner.lock();
        let expired = inner.sessions.expire();
        let count = expired.len();
        inner.forget(expired);
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The sessions of a local node, keyed by the remote node id and the socket address it spoke
/// from.
///
/// Sessions that sit idle for `session_timeout` are dropped, and the least recently used session
/// makes room once `session_cache_capacity` is reached. A node id may have sessions at several
/// addresses until one of them authenticates; the others are then reset.
///
/// This is the only place sessions are enumerated. Every session leaving the registry has its
/// pending requests resolved.
pub struct SessionRegistry {
    local: Arc<LocalNode>,
    config: Discv5Config,
    scheduler: Scheduler,
    outgoing: Pipeline,
    node_store: Arc<dyn NodeStore>,
    auth_tags: Arc<AuthTagRepository>,
    sessions: Mutex<LruTimeCache<NodeAddress, Arc<NodeSession>>>,
}

impl SessionRegistry {
    pub fn new(
        local: Arc<LocalNode>,
        config: Discv5Config,
        scheduler: Scheduler,
        outgoing: Pipeline,
        node_store: Arc<dyn NodeStore>,
    ) -> Self {
        let auth_tags = Arc::new(AuthTagRepository::new(config.auth_tag_timeout));
        let sessions = LruTimeCache::new(
            config.session_timeout,
            Some(config.session_cache_capacity.max(1)),
        );
        SessionRegistry {
            local,
            config,
            scheduler,
            outgoing,
            node_store,
            auth_tags,
            sessions: Mutex::new(sessions),
        }
    }

    pub fn local(&self) -> &Arc<LocalNode> {
        &self.local
    }

    pub fn config(&self) -> &Discv5Config {
        &self.config
    }

    pub fn node_store(&self) -> &Arc<dyn NodeStore> {
        &self.node_store
    }

    pub fn auth_tags(&self) -> &Arc<AuthTagRepository> {
        &self.auth_tags
    }

    /// The session of `address`, created if there is none. Sessions of the same node at other
    /// addresses are left alone.
    pub fn get_or_create(&self, address: &NodeAddress) -> Arc<NodeSession> {
        let (session, expired, evicted) = {
            let mut sessions = self.sessions.lock();
            let expired = sessions.expire();
            let existing = sessions.get(address).cloned();
            if let Some(session) = existing {
                drop(sessions);
                self.dropped(expired, "session expired");
                return session;
            }
            let session = NodeSession::new(
                address.clone(),
                self.local.clone(),
                self.scheduler.clone(),
                SessionTimings {
                    request_timeout: self.config.request_timeout,
                    next_task_delay: self.config.next_task_delay,
                },
                self.outgoing.clone(),
                self.node_store.clone(),
                self.auth_tags.clone(),
            );
            trace!("New session {}", address);
            METRICS.increment(&METRICS.active_sessions);
            let evicted = sessions.insert(address.clone(), session.clone());
            (session, expired, evicted)
        };

        self.dropped(expired, "session expired");
        self.dropped(evicted, "session evicted");
        // purge stale auth-tags while we are here
        self.auth_tags.expire();
        session
    }

    /// The session of `node_id`. An authenticated session is preferred over unconfirmed ones at
    /// other addresses.
    pub fn get(&self, node_id: &NodeId) -> Option<Arc<NodeSession>> {
        let sessions = self.sessions.lock();
        let mut found: Option<&Arc<NodeSession>> = None;
        for (address, session) in sessions.iter() {
            if &address.node_id != node_id {
                continue;
            }
            if session.is_authenticated() {
                return Some(session.clone());
            }
            // the most recently used one
            found = Some(session);
        }
        found.cloned()
    }

    /// The session of `address`, if there is one. Does not count as a use.
    pub fn get_by_address(&self, address: &NodeAddress) -> Option<Arc<NodeSession>> {
        self.sessions.lock().peek(address).cloned()
    }

    /// Resets the sessions of the same node at other addresses once `session` authenticated.
    /// Their requests fail with `SessionReset`.
    pub fn authenticated(&self, session: &NodeSession) {
        let address = session.address();
        let moved: Vec<NodeAddress> = self
            .sessions
            .lock()
            .iter()
            .filter(|(other, _)| other.node_id == address.node_id && *other != address)
            .map(|(other, _)| other.clone())
            .collect();
        for previous in moved {
            debug!(
                "Node {} moved from {} to {}",
                address.node_id, previous.socket_addr, address.socket_addr
            );
            self.reset(&previous, RequestError::SessionReset);
        }
    }

    /// Discards the session of `address`, failing its requests with `reason`.
    pub fn reset(&self, address: &NodeAddress, reason: RequestError) -> Option<Arc<NodeSession>> {
        let session = self.sessions.lock().remove(address)?;
        METRICS.decrement(&METRICS.active_sessions);
        debug!("Session {} reset: {}", session.address(), reason);
        Self::teardown(&session, reason);
        Some(session)
    }

    /// Discards the session of `address`, cancelling its requests.
    pub fn remove(&self, address: &NodeAddress) -> Option<Arc<NodeSession>> {
        self.reset(address, RequestError::Cancelled("session removed".into()))
    }

    pub fn sessions(&self) -> Vec<Arc<NodeSession>> {
        self.sessions
            .lock()
            .iter()
            .map(|(_, session)| session.clone())
            .collect()
    }

    /// The number of live sessions. Idle sessions are dropped first.
    pub fn len(&self) -> usize {
        let expired = self.sessions.lock().expire();
        self.dropped(expired, "session expired");
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards every session, failing all pending requests with `Shutdown`.
    pub fn shutdown(&self) {
        let sessions = self.sessions.lock().drain();
        for (_, session) in sessions {
            METRICS.decrement(&METRICS.active_sessions);
            Self::teardown(&session, RequestError::Shutdown);
        }
    }

    /// Tears down the sessions that fell out of the cache.
    fn dropped(&self, sessions: Vec<(NodeAddress, Arc<NodeSession>)>, reason: &str) {
        for (address, session) in sessions {
            METRICS.decrement(&METRICS.active_sessions);
            debug!("Dropping session {}: {}", address, reason);
            Self::teardown(&session, RequestError::Cancelled(reason.into()));
        }
    }

    fn teardown(session: &NodeSession, reason: RequestError) {
        session.cancel_all_requests(reason);
        session.cleanup();
    }
}
