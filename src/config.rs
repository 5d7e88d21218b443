//! A set of configuration parameters to tune the handshake and request machinery.
use crate::{Executor, TokioExecutor};
use std::time::Duration;

/// Configuration parameters of the session layer and its pipelines.
#[derive(Clone)]
pub struct Discv5Config {
    /// The time a request may stay pending before it fails with a timeout. This covers the whole
    /// exchange, including any handshake it has to wait for. Default: 5 seconds.
    pub request_timeout: Duration,

    /// The delay after which the next-task driver looks at a session again when more requests are
    /// awaiting. One packet is sent per session per delay. Default: 1 second.
    pub next_task_delay: Duration,

    /// How long an auth-tag of a sent packet resolves back to its session. WHOAREYOU packets
    /// referencing older tags are dropped. Default: 60 seconds.
    pub auth_tag_timeout: Duration,

    /// The maximum number of nodes we return to a find nodes request. Default: 16.
    pub max_nodes_response: usize,

    /// How long a session is kept without being used. Default: 1 day.
    pub session_timeout: Duration,

    /// The maximum number of sessions kept at once. The least recently used session is dropped to
    /// make room. Default: 1000.
    pub session_cache_capacity: usize,

    /// A custom executor which can spawn the pipeline and timer tasks. This must be a tokio
    /// runtime, with timing support. By default, the runtime that builds the config is used.
    pub executor: Option<Box<dyn Executor + Send + Sync>>,
}

impl Default for Discv5Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            next_task_delay: Duration::from_secs(1),
            auth_tag_timeout: Duration::from_secs(60),
            max_nodes_response: 16,
            session_timeout: Duration::from_secs(86400),
            session_cache_capacity: 1000,
            executor: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Discv5ConfigBuilder {
    config: Discv5Config,
}

impl Discv5ConfigBuilder {
    // set default values
    pub fn new() -> Self {
        Discv5ConfigBuilder::default()
    }

    /// The time a request may stay pending before it fails with a timeout.
    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.request_timeout = timeout;
        self
    }

    /// The delay between two packets the next-task driver sends to the same session.
    pub fn next_task_delay(&mut self, delay: Duration) -> &mut Self {
        self.config.next_task_delay = delay;
        self
    }

    /// How long an auth-tag resolves back to its session.
    pub fn auth_tag_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.auth_tag_timeout = timeout;
        self
    }

    /// The maximum number of nodes we return to a find nodes request.
    pub fn max_nodes_response(&mut self, max: usize) -> &mut Self {
        self.config.max_nodes_response = max;
        self
    }

    /// How long an unused session is kept.
    pub fn session_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.session_timeout = timeout;
        self
    }

    /// The maximum number of sessions kept at once.
    pub fn session_cache_capacity(&mut self, capacity: usize) -> &mut Self {
        self.config.session_cache_capacity = capacity;
        self
    }

    /// A custom executor which can spawn the pipeline and timer tasks.
    pub fn executor(&mut self, executor: Box<dyn Executor + Send + Sync>) -> &mut Self {
        self.config.executor = Some(executor);
        self
    }

    pub fn build(&mut self) -> Discv5Config {
        // If an executor is not provided, assume a current tokio runtime is running.
        if self.config.executor.is_none() {
            self.config.executor = Some(Box::new(TokioExecutor::default()));
        };

        self.config.clone()
    }
}

impl std::fmt::Debug for Discv5Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discv5Config")
            .field("request_timeout", &self.request_timeout)
            .field("next_task_delay", &self.next_task_delay)
            .field("auth_tag_timeout", &self.auth_tag_timeout)
            .field("max_nodes_response", &self.max_nodes_response)
            .field("session_timeout", &self.session_timeout)
            .field("session_cache_capacity", &self.session_cache_capacity)
            .finish()
    }
}
