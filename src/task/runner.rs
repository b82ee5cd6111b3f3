//! Single-shot item tasks wrapped as leaf tasks
//!
//! An [`ItemTask`] maps one input to an optional output and knows nothing about
//! progress. [`WrappedTask`] gives it a place in the progress tree and turns its
//! outcome into a success or failure signal.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::hub::{EventHandler, SubscriptionId};
use super::leaf::Task;
use super::{ProgressNode, TaskContext, Trackable};
use crate::error::Result;
use crate::log::ActivityLog;

/// Capabilities handed to an [`ItemTask`] while it runs
#[derive(Clone, Debug)]
pub struct ItemContext {
    context: TaskContext,
}

impl ItemContext {
    /// The run's activity log
    pub fn log(&self) -> &Arc<dyn ActivityLog> {
        self.context.log()
    }

    /// The run's cancellation signal
    pub fn cancellation_token(&self) -> &CancellationToken {
        self.context.cancellation_token()
    }

    /// Log an error and record one failure
    pub fn fail(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        self.context.fail(message, cause);
    }
}

/// One unit of work on one input
///
/// `Ok(None)` means the item failed in a way the task already reported; errors are
/// reserved for cancellation and failures the caller must see.
#[async_trait]
pub trait ItemTask<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send,
{
    /// Name used in log lines
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Process `input`
    async fn run(&self, input: I, context: &ItemContext) -> Result<Option<O>>;
}

/// Leaf task running an [`ItemTask`]
pub struct WrappedTask<T> {
    leaf: Task,
    inner: T,
}

impl<T> fmt::Debug for WrappedTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedTask")
            .field("leaf", &self.leaf)
            .finish_non_exhaustive()
    }
}

impl<T> WrappedTask<T> {
    /// Wrap `inner` with the default estimation of one unit
    pub fn new(inner: T) -> Self {
        Self {
            leaf: Task::new(),
            inner,
        }
    }

    /// Set the forecast work size of the wrapped task
    pub fn set_estimation(&self, estimation: u64) {
        self.leaf.set_estimation(estimation);
    }

    /// Current forecast work size
    pub fn estimation(&self) -> u64 {
        self.leaf.estimation()
    }

    /// Current completed work
    pub fn progress(&self) -> u64 {
        self.leaf.progress()
    }

    /// Register an observer for the leaf's events
    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.leaf.subscribe(handler)
    }

    /// Run the task on `input`
    ///
    /// Progress is reset to zero, the outcome recorded (`Some` as a success, `None` as
    /// a failure) and progress forced to the estimation. Errors propagate unchanged
    /// without touching the accumulator.
    pub async fn run<I, O>(&self, input: I) -> Result<Option<O>>
    where
        T: ItemTask<I, O>,
        I: fmt::Debug + Send + 'static,
        O: Send,
    {
        self.leaf.set_progress(0);
        let context = self.leaf.context();
        let name = self.inner.name();
        context
            .log()
            .debug(&format!("Running '{name}' task on '{input:?}'."));

        let item_context = ItemContext {
            context: context.clone(),
        };
        let result = self.inner.run(input, &item_context).await?;

        if result.is_some() {
            context.accumulator().success_item();
            context.log().debug(&format!("Task '{name}' finished."));
        } else {
            context.accumulator().failure_occurred();
            context.log().debug(&format!("Task '{name}' failed."));
        }

        self.leaf.complete();
        Ok(result)
    }
}

impl<T> Trackable for WrappedTask<T> {
    fn node(&self) -> Arc<dyn ProgressNode> {
        self.leaf.node()
    }
}
