//! Delayed tasks on top of an [`Executor`].
//!
//! [`Scheduler`] runs a closure once a delay has passed and hands back an [`AbortHandle`] to
//! cancel it. [`ExpirationScheduler`] keys such timers so that a key has at most one live timer:
//! arming a key again replaces its previous timer, and a timer that fires after its key has been
//! cancelled or replaced does nothing.
use crate::Executor;
use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Spawns delayed tasks on an executor.
#[derive(Clone)]
pub struct Scheduler {
    executor: Box<dyn Executor + Send + Sync>,
}

impl Scheduler {
    pub fn new(executor: Box<dyn Executor + Send + Sync>) -> Self {
        Scheduler { executor }
    }

    /// Runs `task` after `delay`, unless the returned handle is aborted first.
    pub fn execute_after<F>(&self, delay: Duration, task: F) -> AbortHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (handle, registration) = AbortHandle::new_pair();
        let delayed = Abortable::new(
            async move {
                tokio::time::sleep(delay).await;
                task();
            },
            registration,
        );
        self.executor.spawn(Box::pin(async move {
            // an aborted timer resolves to `Err(Aborted)`
            let _ = delayed.await;
        }));
        handle
    }

    /// Runs `future` in the background.
    pub fn spawn(&self, future: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>) {
        self.executor.spawn(future);
    }
}

/// A timer slot: the generation that armed it and the handle that cancels it.
type Timers<K> = Arc<Mutex<HashMap<K, (u64, AbortHandle)>>>;

/// Keyed timers with a fixed delay.
pub struct ExpirationScheduler<K> {
    scheduler: Scheduler,
    delay: Duration,
    timers: Timers<K>,
    generation: AtomicU64,
}

impl<K> ExpirationScheduler<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(scheduler: Scheduler, delay: Duration) -> Self {
        ExpirationScheduler {
            scheduler,
            delay,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Arms the timer of `key`. The callback runs once the delay has passed, unless the key is
    /// cancelled or armed again in the meantime.
    pub fn put<F>(&self, key: K, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = self.timers.clone();
        let timer_key = key.clone();

        // The slot is registered before the timer exists, so a short delay cannot fire against an
        // empty map.
        let mut slots = self.timers.lock();
        let handle = self.scheduler.execute_after(self.delay, move || {
            let current = {
                let mut timers = timers.lock();
                match timers.get(&timer_key) {
                    Some((armed, _)) if *armed == generation => {
                        timers.remove(&timer_key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                callback();
            }
        });
        if let Some((_, previous)) = slots.insert(key, (generation, handle)) {
            previous.abort();
        }
    }

    /// Disarms the timer of `key`. Returns whether a timer was armed.
    pub fn cancel(&self, key: &K) -> bool {
        match self.timers.lock().remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Disarms every timer.
    pub fn cancel_all(&self) {
        for (_, (_, handle)) in self.timers.lock().drain() {
            handle.abort();
        }
    }

    /// The number of armed timers.
    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.timers.lock().contains_key(key)
    }
}

impl<K> Drop for ExpirationScheduler<K> {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.timers.lock().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokioExecutor;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> Scheduler {
        Scheduler::new(Box::new(TokioExecutor::default()))
    }

    #[tokio::test]
    async fn execute_after_runs_once_after_the_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler().execute_after(Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn aborted_tasks_never_run() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = scheduler().execute_after(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.abort();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rearming_replaces_the_timer() {
        let expirations = ExpirationScheduler::new(scheduler(), Duration::from_millis(40));
        let fired = Arc::new(AtomicUsize::new(0));

        let first = fired.clone();
        expirations.put(1u8, move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = fired.clone();
        expirations.put(1u8, move || {
            second.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(expirations.len(), 1);

        // the first timer would have fired by now
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(expirations.is_empty());
    }

    #[tokio::test]
    async fn cancelled_keys_do_not_fire() {
        let expirations = ExpirationScheduler::new(scheduler(), Duration::from_millis(20));
        let fired = Arc::new(AtomicUsize::new(0));

        for key in 0..3u8 {
            let counter = fired.clone();
            expirations.put(key, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(expirations.cancel(&0));
        assert!(!expirations.cancel(&0));
        assert!(expirations.contains(&1));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        let counter = fired.clone();
        expirations.put(4, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        expirations.cancel_all();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(expirations.len(), 0);
    }
}
