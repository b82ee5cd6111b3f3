//! The progress tree: leaf tasks, containers and downloaders
//!
//! Every node publishes an estimation (forecast work size), a progress (completed work)
//! and an activity label. Containers sum their children; downloaders add a lifecycle
//! status and a spotlighted "current operation". Mutation happens only through the
//! owning handle ([`Task`], [`TaskContainer`], [`Downloader`]); everyone else sees a
//! node through the read-only [`ProgressNode`] trait.

mod container;
mod downloader;
pub mod hub;
mod leaf;
mod runner;

pub use container::TaskContainer;
pub use downloader::Downloader;
pub use hub::{EventHandler, SubscriptionId};
pub use leaf::Task;
pub use runner::{ItemContext, ItemTask, WrappedTask};

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Dispatcher, ImmediateDispatcher};
use crate::log::{ActivityLog, TracingLog};
use crate::status::StatusAccumulator;
use crate::types::{Event, Status, TaskId};

/// Run-scoped capabilities shared by every node of one tree
///
/// A node added to a container adopts the container's context, so a whole tree ends
/// up sharing the cancellation signal, accumulator, log and dispatcher of its root.
#[derive(Clone)]
pub struct TaskContext {
    cancel: CancellationToken,
    accumulator: Arc<StatusAccumulator>,
    log: Arc<dyn ActivityLog>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("log", &self.log)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl TaskContext {
    /// Context for a fresh run: new accumulator, `tracing` log, synchronous delivery
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            accumulator: Arc::new(StatusAccumulator::new()),
            log: Arc::new(TracingLog),
            dispatcher: Arc::new(ImmediateDispatcher),
        }
    }

    /// Replace the activity log
    pub fn with_log(mut self, log: Arc<dyn ActivityLog>) -> Self {
        self.log = log;
        self
    }

    /// Replace the dispatcher events are delivered through
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Replace the accumulator
    pub fn with_accumulator(mut self, accumulator: Arc<StatusAccumulator>) -> Self {
        self.accumulator = accumulator;
        self
    }

    /// The run's cancellation signal
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The run's success/failure tally
    pub fn accumulator(&self) -> &Arc<StatusAccumulator> {
        &self.accumulator
    }

    /// The run's activity log
    pub fn log(&self) -> &Arc<dyn ActivityLog> {
        &self.log
    }

    /// The dispatcher observers are notified through
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    /// Log an error and record one failure
    pub fn fail(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        self.log.error(message, cause);
        self.accumulator.failure_occurred();
    }
}

/// Read-only view of a node, shared with containers and observers
pub trait ProgressNode: Send + Sync {
    /// Identity carried by this node's events
    fn id(&self) -> TaskId;

    /// Current forecast work size
    fn estimation(&self) -> u64;

    /// Current completed work
    fn progress(&self) -> u64;

    /// Current activity label
    fn info(&self) -> String;

    /// Register an observer, delivered through the run's dispatcher
    fn subscribe(&self, handler: EventHandler) -> SubscriptionId;

    /// Register structural wiring, run inline on the notifying thread
    ///
    /// Handlers must not block and must not mutate this node.
    fn attach(&self, handler: EventHandler) -> SubscriptionId;

    /// Remove a subscription made with `subscribe` or `attach`
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Take over the run context of a new parent, recursively
    fn adopt(&self, context: &TaskContext);

    /// Lifecycle status, for nodes that have one
    fn lifecycle(&self) -> Option<Status> {
        None
    }

    /// Receive this node's events on an unbounded channel
    ///
    /// The subscription ends when the receiver is dropped and the next event fails
    /// to send; unsubscribe with the returned id to end it eagerly.
    fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(Arc::new(move |event: &Event| {
            let _ = tx.send(event.clone());
        }));
        (id, rx)
    }
}

/// Owner handles that can hand out their node
pub trait Trackable {
    /// The shared, read-only node behind this handle
    fn node(&self) -> Arc<dyn ProgressNode>;
}
