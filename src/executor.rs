//! A simple trait to allow generic executors or wrappers for spawning the pipeline and timer
//! tasks.
use std::future::Future;
use std::pin::Pin;

pub trait Executor: ExecutorClone {
    /// Run the given future in the background until it ends.
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

pub trait ExecutorClone {
    fn clone_box(&self) -> Box<dyn Executor + Send + Sync>;
}

impl<T> ExecutorClone for T
where
    T: 'static + Executor + Clone + Send + Sync,
{
    fn clone_box(&self) -> Box<dyn Executor + Send + Sync> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Executor + Send + Sync> {
    fn clone(&self) -> Box<dyn Executor + Send + Sync> {
        self.clone_box()
    }
}

#[derive(Clone)]
pub struct TokioExecutor(tokio::runtime::Handle);

impl Executor for TokioExecutor {
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        self.0.spawn(future);
    }
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        TokioExecutor(handle)
    }
}

impl Default for TokioExecutor {
    /// Uses the runtime of the calling context. Panics outside of a tokio runtime.
    fn default() -> Self {
        TokioExecutor(tokio::runtime::Handle::current())
    }
}
