//! # ThrottlingQueue
//!
//! A bounded FIFO that drains one item at a time, waiting at least
//! `interval` between successive handler invocations. Every `Peer` owns
//! one of these for its inbound request queue so that a
//! noisy or malicious peer can flood a connection's read path without
//! blocking it, but can't turn that flood into unbounded memory growth or
//! back-to-back handler calls.
//!
//! Overflow policy is drop-oldest: when `enqueue` would push the queue past
//! `max_queued`, the oldest pending item is discarded and logged. Newer
//! work (a fresh `fetch`, the peer's next `query` reply) is usually more
//! relevant than something that has been waiting a while, so keeping the
//! tail over the head is the more useful half to lose.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Per-item work performed by a [`ThrottlingQueue`]'s single worker.
/// `Peer` implements this for its own `Request` type; see
/// [`crate::peer::Peer::handle_request`].
pub trait Handler<T>: Send + Sync {
    fn handle<'a>(&'a self, item: T) -> BoxFuture<'a>
    where
        T: 'a;
}

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    max_queued: usize,
}

/// A bounded, rate-limited FIFO draining onto a single worker task.
///
/// Dropping the queue cancels the worker; any item still queued or
/// in-flight is discarded, so a destroyed peer's worker exits with it.
pub struct ThrottlingQueue<T> {
    inner: Arc<Inner<T>>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> ThrottlingQueue<T> {
    pub fn new<H>(interval: Duration, max_queued: usize, handler: Arc<H>) -> Self
    where
        H: Handler<T> + 'static,
    {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            max_queued,
        });

        let worker_inner = Arc::clone(&inner);
        let worker = tokio::spawn(async move {
            let mut last_start: Option<Instant> = None;
            loop {
                let item = loop {
                    if let Some(item) = worker_inner.queue.lock().pop_front() {
                        break item;
                    }
                    worker_inner.notify.notified().await;
                };

                if let Some(last) = last_start {
                    let elapsed = last.elapsed();
                    if elapsed < interval {
                        tokio::time::sleep(interval - elapsed).await;
                    }
                }
                last_start = Some(Instant::now());
                handler.handle(item).await;
            }
        });

        Self { inner, worker }
    }

    /// Append an item, shedding the oldest queued item if we're already at
    /// `max_queued`.
    pub fn enqueue(&self, item: T) {
        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.max_queued {
            queue.pop_front();
            trace!(max_queued = self.inner.max_queued, "throttling queue full, dropped oldest item");
        }
        queue.push_back(item);
        drop(queue);
        self.inner.notify.notify_one();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

impl<T> Drop for ThrottlingQueue<T> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
