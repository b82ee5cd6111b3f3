//! Container with a lifecycle status and a spotlighted current operation

use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::container::ContainerCore;
use super::hub::{EventHandler, SubscriptionId};
use super::{ProgressNode, TaskContext, Trackable};
use crate::error::Result;
use crate::types::{CurrentOperation, Event, Status, TaskId};
use crate::utils::lock;

struct SubDownloader {
    core: Arc<DownloaderCore>,
    wiring: SubscriptionId,
}

pub(crate) struct DownloaderCore {
    container: Arc<ContainerCore>,
    status: Mutex<Status>,
    subs: Mutex<Vec<SubDownloader>>,
    current: Mutex<CurrentOperation>,
}

impl std::fmt::Debug for DownloaderCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloaderCore")
            .field("container", &self.container)
            .field("status", &self.status())
            .field("subs", &lock(&self.subs).len())
            .finish_non_exhaustive()
    }
}

impl DownloaderCore {
    fn status(&self) -> Status {
        *lock(&self.status)
    }

    fn set_status(&self, next: Status) {
        let task = self.container.task();
        let _turn = task.turn();
        {
            let mut status = lock(&self.status);
            if *status == next {
                return;
            }
            if !status.can_transition_to(next) {
                let from = *status;
                tracing::debug!(
                    task = %task.id(),
                    from = ?from,
                    to = ?next,
                    "ignoring status change"
                );
                return;
            }
            *status = next;
        }
        task.publish(vec![Event::StatusChanged {
            task: task.id(),
            status: next,
        }]);
    }

    fn add_sub(self: &Arc<Self>, sub: &Downloader, spotlight: bool) {
        self.container.add(sub.core.clone());

        let weak: Weak<Self> = Arc::downgrade(self);
        let wiring = sub.core.container.task().hub().attach(Arc::new(move |event: &Event| {
            if let Some(parent) = weak.upgrade() {
                parent.on_sub_event(event, spotlight);
            }
        }));
        lock(&self.subs).push(SubDownloader {
            core: Arc::clone(&sub.core),
            wiring,
        });
    }

    fn on_sub_event(&self, event: &Event, spotlight: bool) {
        match event {
            Event::StatusChanged { status, .. } => self.on_sub_status(*status),
            Event::CurrentOperationEstimationChanged { task, estimation } => {
                self.set_current_estimation(*task, *estimation);
            }
            Event::CurrentOperationProgressChanged {
                task,
                info,
                progress,
            } => self.set_current_progress(*task, info, *progress),
            Event::PreliminaryResultsReady { .. } => self.container.task().emit(event.clone()),
            Event::EstimationChanged { task, estimation } if spotlight => {
                self.set_current_estimation(*task, *estimation);
            }
            Event::ProgressChanged {
                task,
                info,
                progress,
            } if spotlight => self.set_current_progress(*task, info, *progress),
            _ => {}
        }
    }

    /// Mirror a sub-downloader's status; `Done` only once every sub-downloader is done
    fn on_sub_status(&self, status: Status) {
        if status != Status::Done {
            self.set_status(status);
            return;
        }
        let all_done = lock(&self.subs)
            .iter()
            .all(|sub| sub.core.status() == Status::Done);
        if all_done {
            self.set_status(Status::Done);
        }
    }

    fn set_current_estimation(&self, task: TaskId, estimation: u64) {
        let own = self.container.task();
        let _turn = own.turn();
        {
            let mut current = lock(&self.current);
            current.task = Some(task);
            current.estimation = estimation;
        }
        own.publish(vec![Event::CurrentOperationEstimationChanged { task, estimation }]);
    }

    fn set_current_progress(&self, task: TaskId, info: &str, progress: u64) {
        let own = self.container.task();
        let _turn = own.turn();
        {
            let mut current = lock(&self.current);
            current.task = Some(task);
            current.progress = progress;
            current.info = info.to_string();
        }
        own.publish(vec![Event::CurrentOperationProgressChanged {
            task,
            info: info.to_string(),
            progress,
        }]);
    }

    fn clear(&self) {
        let detached = std::mem::take(&mut *lock(&self.subs));
        for sub in detached {
            sub.core.container.task().hub().unsubscribe(sub.wiring);
        }
        self.container.clear();

        let task = self.container.task();
        let _turn = task.turn();
        *lock(&self.current) = CurrentOperation::default();
        let reset = {
            let mut status = lock(&self.status);
            std::mem::replace(&mut *status, Status::Initialized) != Status::Initialized
        };
        if reset {
            task.publish(vec![Event::StatusChanged {
                task: task.id(),
                status: Status::Initialized,
            }]);
        }
    }
}

impl ProgressNode for DownloaderCore {
    fn id(&self) -> TaskId {
        self.container.task().id()
    }

    fn estimation(&self) -> u64 {
        self.container.task().estimation()
    }

    fn progress(&self) -> u64 {
        self.container.task().progress()
    }

    fn info(&self) -> String {
        self.container.task().info()
    }

    fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.container.task().hub().subscribe(handler)
    }

    fn attach(&self, handler: EventHandler) -> SubscriptionId {
        self.container.task().hub().attach(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.container.task().hub().unsubscribe(id)
    }

    fn adopt(&self, context: &TaskContext) {
        self.container.adopt(context);
    }

    fn lifecycle(&self) -> Option<Status> {
        Some(self.status())
    }
}

/// Task container with a domain status and a "current operation" stream
///
/// Overall progress is the container sum. The current operation is whichever
/// sub-downloader registered with [`add_as_current_operation`](Self::add_as_current_operation)
/// reported last, re-published through the `CurrentOperation*` events so a UI can show
/// "12/48 files" next to "current file: 3/10 MB".
///
/// Status follows the most recent report of any sub-downloader, except `Done`, which
/// is taken only once every sub-downloader is `Done`. `Done` and `Error` are terminal
/// until [`clear`](Self::clear).
#[derive(Debug)]
pub struct Downloader {
    core: Arc<DownloaderCore>,
}

impl Downloader {
    /// Create a downloader for a fresh run with the given guess estimation
    pub fn new(guess: u64) -> Self {
        Self::with_context(guess, TaskContext::default())
    }

    /// Create a downloader bound to a run context, typically the root of a run
    pub fn with_context(guess: u64, context: TaskContext) -> Self {
        Self {
            core: Arc::new(DownloaderCore {
                container: ContainerCore::new(guess, context),
                status: Mutex::new(Status::Initialized),
                subs: Mutex::new(Vec::new()),
                current: Mutex::new(CurrentOperation::default()),
            }),
        }
    }

    /// Identity carried by this downloader's events
    pub fn id(&self) -> TaskId {
        self.core.container.task().id()
    }

    /// Current lifecycle status
    pub fn status(&self) -> Status {
        self.core.status()
    }

    /// Current aggregate estimation
    pub fn estimation(&self) -> u64 {
        self.core.container.task().estimation()
    }

    /// Current aggregate progress
    pub fn progress(&self) -> u64 {
        self.core.container.task().progress()
    }

    /// Current activity label
    pub fn info(&self) -> String {
        self.core.container.task().info()
    }

    /// Snapshot of the spotlighted sub-operation
    pub fn current_operation(&self) -> CurrentOperation {
        lock(&self.core.current).clone()
    }

    /// The run context shared with every child
    pub fn context(&self) -> TaskContext {
        self.core.container.task().context()
    }

    /// Shortcut for the context's cancellation signal
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context().cancellation_token().clone()
    }

    /// Set this downloader's own estimation; the next child change recomputes it
    pub fn set_estimation(&self, estimation: u64) {
        self.core.container.task().set_estimation(estimation);
    }

    /// Set this downloader's own progress; the next child change recomputes it
    pub fn set_progress(&self, progress: u64) {
        self.core.container.task().set_progress(progress);
    }

    /// Add `delta` units to this downloader's own progress
    pub fn advance(&self, delta: u64) {
        self.core.container.task().advance(delta);
    }

    /// Force progress up to the estimation without touching the status
    pub fn complete(&self) {
        self.core.container.task().complete();
    }

    /// Set the activity label
    pub fn set_info(&self, info: impl Into<String>) {
        self.core.container.task().set_info(info.into());
    }

    /// Move to another lifecycle status; ignored once terminal
    pub fn set_status(&self, status: Status) {
        self.core.set_status(status);
    }

    /// Wire a plain child task
    pub fn add_task(&self, task: &impl Trackable) {
        self.core.container.add(task.node());
    }

    /// Wire a sub-downloader: its numbers join the sums, its status is mirrored and
    /// its current-operation and preliminary-results events are re-published
    pub fn add_sub_downloader(&self, sub: &Downloader) {
        self.core.add_sub(sub, false);
    }

    /// Wire a sub-downloader and spotlight it as the current operation
    ///
    /// Its estimation and progress are announced immediately and then followed as
    /// `CurrentOperation*` events.
    pub fn add_as_current_operation(&self, sub: &Downloader) {
        self.core.add_sub(sub, true);
        let (estimation, info, progress) = {
            let task = sub.core.container.task();
            let state = task.state();
            (state.estimation, state.info.clone(), state.progress)
        };
        self.core.set_current_estimation(sub.id(), estimation);
        self.core.set_current_progress(sub.id(), &info, progress);
    }

    /// Declare the children complete; see [`TaskContainer::reestimate`](super::TaskContainer::reestimate)
    pub fn reestimate(&self) {
        self.core.container.reestimate();
    }

    /// Replace the guess estimation
    pub fn set_guess_estimation(&self, guess: u64) {
        self.core.container.set_guess_estimation(guess);
    }

    /// Detach children and sub-downloaders, reset numbers, current operation and status
    pub fn clear(&self) {
        self.core.clear();
    }

    /// Force progress to the estimation, then move to `Done`
    pub fn done(&self) {
        self.complete();
        self.core.set_status(Status::Done);
    }

    /// Force progress to the estimation, move to `Error` and record one failure
    pub fn error(&self) {
        self.complete();
        self.core.set_status(Status::Error);
        self.context().accumulator().failure_occurred();
    }

    /// Publish partial results for display before the run finishes
    pub fn emit_preliminary_results<T: Serialize>(&self, results: &T) -> Result<()> {
        let results = serde_json::to_value(results)?;
        self.core.container.task().emit(Event::PreliminaryResultsReady {
            task: self.id(),
            results,
        });
        Ok(())
    }

    /// Log an error and record one failure
    pub fn fail(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        self.core.container.task().fail(message, cause);
    }

    /// Register an observer for this downloader's events
    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.core.container.task().hub().subscribe(handler)
    }

    /// Remove an observer
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.container.task().hub().unsubscribe(id)
    }
}

impl Trackable for Downloader {
    fn node(&self) -> Arc<dyn ProgressNode> {
        self.core.clone()
    }
}
