//! The public face of the crate: a local node that pings peers, looks up nodes and negotiates
//! sessions over a [`Transport`].
//!
//! [`Discovery`] owns two pipelines spawned on the configured executor. Received packets enter the
//! inbound pipeline through an [`InboundHandle`]; requests and packets to send run through the
//! outbound pipeline. Every request resolves exactly once, at the latest when it times out.
//!
//! ```rust,no_run
//! use discv5_handshake::{
//!     enr::{CombinedKey, EnrBuilder},
//!     node_store::MemoryNodeStore,
//!     transport::ChannelTransport,
//!     Discovery, Discv5ConfigBuilder,
//! };
//! use std::{net::Ipv4Addr, sync::Arc};
//!
//! # async fn run(remote: discv5_handshake::Enr) {
//! let key = CombinedKey::generate_secp256k1();
//! let enr = EnrBuilder::new("v4")
//!     .ip4(Ipv4Addr::LOCALHOST)
//!     .udp4(9000)
//!     .build(&key)
//!     .unwrap();
//! let (transport, _datagrams) = ChannelTransport::new("127.0.0.1:9000".parse().unwrap());
//!
//! let discovery = Discovery::new(
//!     enr,
//!     key,
//!     Discv5ConfigBuilder::new().build(),
//!     Arc::new(transport),
//!     Arc::new(MemoryNodeStore::new()),
//! )
//! .unwrap();
//!
//! // received packets are handed to `discovery.inbound()`
//! let (enr_seq, observed) = discovery.ping(remote).await.unwrap();
//! # }
//! ```
use crate::{
    error::{Discv5Error, RequestError},
    node_info::LocalNode,
    node_store::NodeStore,
    packet::Packet,
    pipeline::{handler, Envelope, Field, FieldValue, Pipeline, PipelineBuilder, PipelineService},
    rpc::MAX_DISTANCE,
    scheduler::Scheduler,
    session::{
        HandshakeContinuation, RequestOutcome, SessionRegistry, SessionStatus, TaskOptions,
        TaskType,
    },
    transport::Transport,
    Discv5Config, Enr, TokioExecutor,
};
use enr::{CombinedKey, NodeId};
use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};


/// Feeds received packets into the inbound pipeline.
#[derive(Clone)]
pub struct InboundHandle {
    pipeline: Pipeline,
}

impl InboundHandle {
    /// Queues a packet received from `src`. Returns false once the node has shut down.
    pub fn push(&self, packet: Packet, src: SocketAddr) -> bool {
        let mut envelope = Envelope::new();
        envelope.put(Field::IncomingPacket, FieldValue::Packet(packet));
        envelope.put(Field::Remote, FieldValue::Remote(src));
        self.pipeline.push(envelope)
    }
}

/// A local node of the discovery protocol.
pub struct Discovery {
    local: Arc<LocalNode>,
    registry: Arc<SessionRegistry>,
    inbound: Pipeline,
    outgoing: Pipeline,
    services: Mutex<Vec<PipelineService>>,
    shut_down: AtomicBool,
}

impl Discovery {
    /// Spawns the inbound and outbound pipelines of a node with the record `enr` signed by `key`.
    ///
    /// Without an executor in the config, the tokio runtime this is called on is used.
    pub fn new(
        enr: Enr,
        key: CombinedKey,
        mut config: Discv5Config,
        transport: Arc<dyn Transport>,
        node_store: Arc<dyn NodeStore>,
    ) -> Result<Self, Discv5Error> {
        let local = Arc::new(LocalNode::new(enr, key)?);

        let executor = match config.executor.clone() {
            Some(executor) => executor,
            None => {
                let executor: Box<dyn crate::Executor + Send + Sync> =
                    Box::new(TokioExecutor::default());
                config.executor = Some(executor.clone());
                executor
            }
        };
        let scheduler = Scheduler::new(executor);

        let inbound_builder = PipelineBuilder::new("incoming");
        let outgoing_builder = PipelineBuilder::new("outgoing");
        let inbound = inbound_builder.pipeline();
        let outgoing = outgoing_builder.pipeline();

        let registry = Arc::new(SessionRegistry::new(
            local.clone(),
            config,
            scheduler.clone(),
            outgoing.clone(),
            node_store,
        ));

        let services = vec![
            inbound_builder
                .add_handlers(handler::inbound_handlers(&registry))
                .build(&scheduler),
            outgoing_builder
                .add_handlers(handler::outbound_handlers(&registry, transport))
                .build(&scheduler),
        ];
        info!("Discovery started, local node {}", local.node_id());

        Ok(Discovery {
            local,
            registry,
            inbound,
            outgoing,
            services: Mutex::new(services),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn local_enr(&self) -> Enr {
        self.local.enr()
    }

    /// Sets `key` of the local record to `value` and re-signs it. Returns the new sequence number,
    /// which the next PING or PONG announces to peers.
    pub fn update_enr_field(&self, key: &str, value: Vec<u8>) -> Result<u64, Discv5Error> {
        let seq = self.local.insert(key, value)?;
        info!("Local ENR field {} updated, seq {}", key, seq);
        Ok(seq)
    }

    /// Every record the node store knows.
    pub fn known_nodes(&self) -> Vec<Enr> {
        self.registry.node_store().known_nodes()
    }

    /// Our external address as reported by `node_id` in its last PONG.
    pub fn reported_address(&self, node_id: &NodeId) -> Option<SocketAddr> {
        self.registry
            .get(node_id)
            .and_then(|session| session.reported_address())
    }

    /// The entry point of received packets.
    pub fn inbound(&self) -> InboundHandle {
        InboundHandle {
            pipeline: self.inbound.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The handshake status of the session with `node_id`, if there is one.
    pub fn session_status(&self, node_id: &NodeId) -> Option<SessionStatus> {
        self.registry.get(node_id).map(|session| session.status())
    }

    /// Pings `enr`. Returns the peer's ENR sequence number and our address as the peer sees it.
    pub async fn ping(&self, enr: Enr) -> Result<(u64, SocketAddr), RequestError> {
        match self
            .request(enr, TaskType::Ping, TaskOptions::liveness())
            .await?
        {
            RequestOutcome::Pong { enr_seq, ip, port } => Ok((enr_seq, SocketAddr::new(ip, port))),
            other => Err(mismatch(TaskType::Ping, &other)),
        }
    }

    /// Asks `enr` for the records it knows at log distance `distance` from itself.
    pub async fn find_nodes(&self, enr: Enr, distance: u64) -> Result<Vec<Enr>, RequestError> {
        if distance > MAX_DISTANCE {
            return Err(RequestError::InvalidDistance(distance));
        }
        match self
            .request(enr, TaskType::FindNode, TaskOptions::distance(distance))
            .await?
        {
            RequestOutcome::Nodes(nodes) => Ok(nodes),
            other => Err(mismatch(TaskType::FindNode, &other)),
        }
    }

    /// Opens a handshake with `enr` and returns the auth-header packet that would complete it,
    /// without sending it.
    pub async fn start_handshake(&self, enr: Enr) -> Result<Packet, RequestError> {
        let options = TaskOptions::handshake(HandshakeContinuation::Capture);
        match self.request(enr, TaskType::Handshake, options).await? {
            RequestOutcome::AuthPacket(packet) => Ok(*packet),
            other => Err(mismatch(TaskType::Handshake, &other)),
        }
    }

    /// Sends an auth-header packet from [`Discovery::start_handshake`] and resolves once the
    /// session with `enr` is authenticated.
    pub async fn complete_handshake(&self, enr: Enr, packet: Packet) -> Result<(), RequestError> {
        let options = TaskOptions::handshake(HandshakeContinuation::Deliver(Box::new(packet)));
        match self.request(enr, TaskType::Handshake, options).await? {
            RequestOutcome::Established => Ok(()),
            other => Err(mismatch(TaskType::Handshake, &other)),
        }
    }

    /// Fails every pending request with `Shutdown` and stops both pipelines.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            warn!("Discovery is already shut down");
            return;
        }
        self.registry.shutdown();
        for mut service in self.services.lock().drain(..) {
            service.shutdown();
        }
        info!("Discovery of {} shut down", self.local.node_id());
    }

    async fn request(
        &self,
        enr: Enr,
        task: TaskType,
        options: TaskOptions,
    ) -> Result<RequestOutcome, RequestError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RequestError::Shutdown);
        }
        let (completion, result) = oneshot::channel();
        let mut envelope = Envelope::new();
        debug!(
            "Envelope #{}: {:?} request to {}",
            envelope.id(),
            task,
            enr.node_id()
        );
        envelope.put(Field::Node, FieldValue::Node(enr));
        envelope.put(Field::Task, FieldValue::Task(task));
        envelope.put(Field::TaskOptions, FieldValue::TaskOptions(options));
        envelope.put(Field::Completion, FieldValue::Completion(completion));
        self.outgoing.push(envelope);

        result
            .await
            .map_err(|e| RequestError::ChannelFailed(e.to_string()))?
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

fn mismatch(expected: TaskType, outcome: &RequestOutcome) -> RequestError {
    RequestError::ProtocolMismatch {
        expected,
        found: outcome.task(),
    }
}
