//! Envelopes and the pipelines that carry them through ordered handler chains.
//!
//! An [`Envelope`] is one unit of work: a received packet, a new request or a session that should
//! send its next packet. It carries typed [`FieldValue`]s keyed by [`Field`]. A [`Pipeline`] runs
//! each envelope through its handlers in order, one envelope at a time, in push order.
//!
//! Handlers guard on the fields and session state they need (see [`util`]) and are no-ops when a
//! guard fails. Handlers never wait: work that depends on a future event re-enters a pipeline as a
//! new envelope.
//!
//! The pipeline task is spawned on the executor and runs until its [`PipelineService`] is shut
//! down or dropped.
use crate::{
    error::RequestError,
    node_info::NodeAddress,
    packet::Packet,
    rpc::Message,
    scheduler::Scheduler,
    session::{Completion, NodeSession, TaskOptions, TaskType},
    Enr,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

pub mod handler;
pub mod util;


static NEXT_ENVELOPE_ID: AtomicU64 = AtomicU64::new(1);

/// The keys of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// A packet as received.
    IncomingPacket,
    /// The socket address a packet came from.
    Remote,
    /// A WHOAREYOU addressed to us.
    PacketWhoAreYou,
    /// A packet with an auth-header.
    PacketAuthMessage,
    /// A message or random packet.
    PacketMessage,
    /// The address a session should be looked up or created for.
    SessionLookup,
    Session,
    /// A decrypted RPC message.
    Message,
    /// The kind of a new request.
    Task,
    TaskOptions,
    /// The completion signal of a new request.
    Completion,
    /// The record of the node a new request is addressed to.
    Node,
    /// A packet to hand to the transport.
    Parcel,
    /// The reason the envelope failed. Handlers after the failure skip the envelope.
    BadPacket,
}

/// The values of an envelope.
#[derive(Debug)]
pub enum FieldValue {
    Packet(Packet),
    Remote(SocketAddr),
    Lookup(NodeAddress),
    Session(Arc<NodeSession>),
    Message(Message),
    Task(TaskType),
    TaskOptions(TaskOptions),
    Completion(Completion),
    Node(Enr),
    Parcel(Packet, SocketAddr),
    BadPacket(String),
}

/// One unit of pipeline work.
#[derive(Debug)]
pub struct Envelope {
    id: u64,
    fields: HashMap<Field, FieldValue>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

impl Envelope {
    pub fn new() -> Self {
        Envelope {
            id: NEXT_ENVELOPE_ID.fetch_add(1, Ordering::Relaxed),
            fields: HashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sets a field that is not yet set. Returns false, leaving the envelope unchanged, if it is.
    pub fn put(&mut self, field: Field, value: FieldValue) -> bool {
        if self.fields.contains_key(&field) {
            trace!("Envelope #{} already has {:?}", self.id, field);
            return false;
        }
        self.fields.insert(field, value);
        true
    }

    /// Sets a field whether or not it is set.
    pub fn overwrite(&mut self, field: Field, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(field, value)
    }

    pub fn remove(&mut self, field: Field) -> Option<FieldValue> {
        self.fields.remove(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    /// Marks the envelope as failed. The first reason is kept.
    pub fn mark_bad(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("Envelope #{} is bad: {}", self.id, reason);
        self.put(Field::BadPacket, FieldValue::BadPacket(reason));
    }

    pub fn is_bad(&self) -> bool {
        self.contains(Field::BadPacket)
    }

    /* Typed accessors */

    pub fn packet(&self, field: Field) -> Option<&Packet> {
        match self.fields.get(&field) {
            Some(FieldValue::Packet(packet)) => Some(packet),
            _ => None,
        }
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        match self.fields.get(&Field::Remote) {
            Some(FieldValue::Remote(remote)) => Some(*remote),
            _ => None,
        }
    }

    pub fn lookup(&self) -> Option<&NodeAddress> {
        match self.fields.get(&Field::SessionLookup) {
            Some(FieldValue::Lookup(address)) => Some(address),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<Arc<NodeSession>> {
        match self.fields.get(&Field::Session) {
            Some(FieldValue::Session(session)) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self.fields.get(&Field::Message) {
            Some(FieldValue::Message(message)) => Some(message),
            _ => None,
        }
    }

    pub fn task(&self) -> Option<TaskType> {
        match self.fields.get(&Field::Task) {
            Some(FieldValue::Task(task)) => Some(*task),
            _ => None,
        }
    }

    pub fn task_options(&self) -> Option<&TaskOptions> {
        match self.fields.get(&Field::TaskOptions) {
            Some(FieldValue::TaskOptions(options)) => Some(options),
            _ => None,
        }
    }

    /// Takes the completion signal out of the envelope.
    pub fn take_completion(&mut self) -> Option<Completion> {
        match self.fields.remove(&Field::Completion) {
            Some(FieldValue::Completion(completion)) => Some(completion),
            Some(other) => {
                self.fields.insert(Field::Completion, other);
                None
            }
            None => None,
        }
    }

    pub fn node(&self) -> Option<&Enr> {
        match self.fields.get(&Field::Node) {
            Some(FieldValue::Node(enr)) => Some(enr),
            _ => None,
        }
    }

    pub fn bad_packet(&self) -> Option<&str> {
        match self.fields.get(&Field::BadPacket) {
            Some(FieldValue::BadPacket(reason)) => Some(reason),
            _ => None,
        }
    }

    /// Fails the completion signal the envelope still carries.
    pub fn fail_completion(&mut self, error: RequestError) {
        if let Some(completion) = self.take_completion() {
            let _ = completion.send(Err(error));
        }
    }
}

/// A step of a pipeline.
pub trait EnvelopeHandler: Send {
    fn handle(&mut self, envelope: &mut Envelope);
}

/// The pushing end of a pipeline.
#[derive(Clone)]
pub struct Pipeline {
    name: &'static str,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl Pipeline {
    /// Queues an envelope. Returns false if the pipeline has stopped; the envelope is dropped
    /// after failing any completion signal it carries.
    pub fn push(&self, envelope: Envelope) -> bool {
        trace!("Envelope #{} pushed to {}", envelope.id(), self.name);
        match self.sender.send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::SendError(mut envelope)) => {
                debug!(
                    "Pipeline {} has stopped, envelope #{} dropped",
                    self.name,
                    envelope.id()
                );
                envelope.fail_completion(RequestError::Shutdown);
                false
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Collects the handlers of a pipeline. The pushing end is available before the pipeline runs so
/// handlers can be wired to it.
pub struct PipelineBuilder {
    pipeline: Pipeline,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    handlers: Vec<Box<dyn EnvelopeHandler>>,
}

impl PipelineBuilder {
    pub fn new(name: &'static str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        PipelineBuilder {
            pipeline: Pipeline { name, sender },
            receiver,
            handlers: Vec::new(),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline.clone()
    }

    pub fn add_handler(mut self, handler: impl EnvelopeHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn add_handlers(mut self, handlers: Vec<Box<dyn EnvelopeHandler>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Spawns the pipeline task.
    pub fn build(self, scheduler: &Scheduler) -> PipelineService {
        let (exit_sender, exit) = oneshot::channel();
        let name = self.pipeline.name;
        let runner = PipelineRunner {
            name,
            receiver: self.receiver,
            handlers: self.handlers,
            exit,
        };
        scheduler.spawn(Box::pin(runner.run()));
        PipelineService {
            name,
            exit: Some(exit_sender),
        }
    }
}

struct PipelineRunner {
    name: &'static str,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    handlers: Vec<Box<dyn EnvelopeHandler>>,
    exit: oneshot::Receiver<()>,
}

impl PipelineRunner {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(mut envelope) = self.receiver.recv() => {
                    trace!("Pipeline {} processing envelope #{}", self.name, envelope.id());
                    for handler in self.handlers.iter_mut() {
                        handler.handle(&mut envelope);
                    }
                    // an unconsumed completion means no handler took on the request
                    envelope.fail_completion(RequestError::Cancelled("request was not accepted".into()));
                }
                _ = &mut self.exit => {
                    debug!("Pipeline {} shut down", self.name);
                    return;
                }
            }
        }
    }
}

/// Keeps a spawned pipeline running.
pub struct PipelineService {
    name: &'static str,
    exit: Option<oneshot::Sender<()>>,
}

impl PipelineService {
    pub fn shutdown(&mut self) {
        if let Some(exit) = self.exit.take() {
            if exit.send(()).is_err() {
                debug!("Pipeline {} had already stopped", self.name);
            }
        }
    }
}

impl Drop for PipelineService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
