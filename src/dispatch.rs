//! Delivery of tree notifications to the context that owns the presentation state
//!
//! Nodes never call observers directly; they hand a job to the [`Dispatcher`] of their
//! run context. Headless consumers use [`ImmediateDispatcher`], which runs the job on
//! the calling thread. A UI creates a [`dispatch_queue`] pair, passes the dispatcher
//! into the root context and drains the [`DispatchQueue`] on its own thread.

use std::fmt;

use tokio::sync::mpsc;

/// A unit of deferred notification work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs notification jobs in the context chosen at tree construction
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// Run or enqueue `job`
    fn dispatch(&self, job: Job);
}

/// Runs every job synchronously on the calling thread
///
/// Jobs run while the notifying node is still publishing, so a handler must not
/// change the node it observes; use a [`dispatch_queue`] for handlers that do.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateDispatcher;

impl Dispatcher for ImmediateDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Sends jobs to a [`DispatchQueue`] drained elsewhere
#[derive(Clone)]
pub struct QueueDispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl fmt::Debug for QueueDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDispatcher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::debug!("dispatch queue closed, dropping notification");
        }
    }
}

/// Receiving end of a [`QueueDispatcher`], owned by the presentation thread
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue").finish_non_exhaustive()
    }
}

/// Create a connected dispatcher/queue pair
pub fn dispatch_queue() -> (QueueDispatcher, DispatchQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueDispatcher { tx }, DispatchQueue { rx })
}

impl DispatchQueue {
    /// Run every job queued so far, including jobs queued by those jobs
    ///
    /// Returns the number of jobs run. Never blocks.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Run jobs as they arrive until every dispatcher has been dropped
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn immediate_dispatch_runs_inline() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        ImmediateDispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queued_jobs_wait_for_the_owner() {
        let (dispatcher, mut queue) = dispatch_queue();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&count);
            dispatcher.dispatch(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn jobs_queued_by_jobs_run_in_the_same_drain() {
        let (dispatcher, mut queue) = dispatch_queue();
        let count = Arc::new(AtomicUsize::new(0));
        let inner = dispatcher.clone();
        let c = Arc::clone(&count);
        dispatcher.dispatch(Box::new(move || {
            inner.dispatch(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        assert_eq!(queue.run_pending(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_after_queue_drop_is_harmless() {
        let (dispatcher, queue) = dispatch_queue();
        drop(queue);
        dispatcher.dispatch(Box::new(|| {}));
    }

    #[tokio::test]
    async fn run_drains_until_dispatchers_are_gone() {
        let (dispatcher, queue) = dispatch_queue();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        dispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        drop(dispatcher);
        queue.run().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
