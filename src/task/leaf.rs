//! Node state shared by every kind of task, and the leaf [`Task`] handle

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use super::hub::{EventHandler, EventHub, SubscriptionId};
use super::{ProgressNode, TaskContext, Trackable};
use crate::types::{Event, TaskId};
use crate::utils::lock;

/// Estimation of a task that has not said anything about its size yet
pub(crate) const DEFAULT_ESTIMATION: u64 = 1;

#[derive(Debug)]
pub(crate) struct TaskState {
    pub(crate) estimation: u64,
    pub(crate) progress: u64,
    pub(crate) info: String,
}

/// Estimation, progress, label, context and subscribers of one node
///
/// Mutations are staged under the state lock and collect the events they cause;
/// events are published only after the lock is released. Every mutation holds the
/// node's turn from staging until its events are handed out, so observers receive
/// one node's events in the order the changes were applied.
#[derive(Debug)]
pub(crate) struct TaskCore {
    id: TaskId,
    turn: Mutex<()>,
    state: Mutex<TaskState>,
    context: Mutex<TaskContext>,
    hub: EventHub,
}

impl TaskCore {
    pub(crate) fn new(estimation: u64, context: TaskContext) -> Self {
        Self {
            id: TaskId::next(),
            turn: Mutex::new(()),
            state: Mutex::new(TaskState {
                estimation,
                progress: 0,
                info: String::new(),
            }),
            context: Mutex::new(context),
            hub: EventHub::default(),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn context(&self) -> TaskContext {
        lock(&self.context).clone()
    }

    pub(crate) fn set_context(&self, context: &TaskContext) {
        *lock(&self.context) = context.clone();
    }

    /// Exclusive right to change this node and publish the result
    ///
    /// Taken before the state lock and held across [`publish`](Self::publish).
    /// Locks are always taken child first, then parent.
    pub(crate) fn turn(&self) -> MutexGuard<'_, ()> {
        lock(&self.turn)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, TaskState> {
        lock(&self.state)
    }

    pub(crate) fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub(crate) fn estimation(&self) -> u64 {
        self.state().estimation
    }

    pub(crate) fn progress(&self) -> u64 {
        self.state().progress
    }

    pub(crate) fn info(&self) -> String {
        self.state().info.clone()
    }

    /// Change the label; it travels with the next progress notification
    pub(crate) fn set_info(&self, info: String) {
        self.state().info = info;
    }

    pub(crate) fn set_estimation(&self, estimation: u64) {
        let _turn = self.turn();
        let mut events = Vec::new();
        self.stage_estimation(&mut self.state(), estimation, &mut events);
        self.publish(events);
    }

    pub(crate) fn set_progress(&self, progress: u64) {
        let _turn = self.turn();
        let mut events = Vec::new();
        self.stage_progress(&mut self.state(), progress, &mut events);
        self.publish(events);
    }

    pub(crate) fn advance(&self, delta: u64) {
        let _turn = self.turn();
        let mut events = Vec::new();
        {
            let mut state = self.state();
            let progress = state.progress.saturating_add(delta);
            self.stage_progress(&mut state, progress, &mut events);
        }
        self.publish(events);
    }

    /// Force progress up to the current estimation
    pub(crate) fn complete(&self) {
        let _turn = self.turn();
        let mut events = Vec::new();
        {
            let mut state = self.state();
            let estimation = state.estimation;
            self.stage_progress(&mut state, estimation, &mut events);
        }
        self.publish(events);
    }

    pub(crate) fn stage_estimation(&self, state: &mut TaskState, estimation: u64, out: &mut Vec<Event>) {
        if estimation == state.estimation {
            return;
        }
        state.estimation = estimation;
        out.push(Event::EstimationChanged {
            task: self.id,
            estimation,
        });
    }

    /// Apply a progress value; an unchanged nonzero value is not re-announced, zero always is
    pub(crate) fn stage_progress(&self, state: &mut TaskState, progress: u64, out: &mut Vec<Event>) {
        if progress == state.progress && progress != 0 {
            return;
        }
        if progress > state.estimation {
            self.stage_estimation(state, progress, out);
        }
        state.progress = progress;
        out.push(Event::ProgressChanged {
            task: self.id,
            info: state.info.clone(),
            progress,
        });
    }

    /// Hand `events` to the subscribers; the caller holds the turn
    pub(crate) fn publish(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let dispatcher = self.context().dispatcher().clone();
        for event in events {
            self.hub.emit(event, &dispatcher);
        }
    }

    /// Publish one event that changes no state
    pub(crate) fn emit(&self, event: Event) {
        let _turn = self.turn();
        self.publish(vec![event]);
    }

    pub(crate) fn fail(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        self.context().fail(message, cause);
    }
}

impl ProgressNode for TaskCore {
    fn id(&self) -> TaskId {
        self.id
    }

    fn estimation(&self) -> u64 {
        TaskCore::estimation(self)
    }

    fn progress(&self) -> u64 {
        TaskCore::progress(self)
    }

    fn info(&self) -> String {
        TaskCore::info(self)
    }

    fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.hub.subscribe(handler)
    }

    fn attach(&self, handler: EventHandler) -> SubscriptionId {
        self.hub.attach(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    fn adopt(&self, context: &TaskContext) {
        self.set_context(context);
    }
}

/// Leaf unit of trackable work
///
/// The handle is the only way to change the task's numbers; containers and observers
/// get a read-only [`ProgressNode`] through [`Trackable::node`].
#[derive(Debug)]
pub struct Task {
    core: Arc<TaskCore>,
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl Task {
    /// Create a task with an estimation of one unit and a fresh context
    pub fn new() -> Self {
        Self::with_estimation(DEFAULT_ESTIMATION)
    }

    /// Create a task with a known estimation
    pub fn with_estimation(estimation: u64) -> Self {
        Self::with_context(estimation, TaskContext::default())
    }

    /// Create a task bound to a run context, for use outside any container
    pub fn with_context(estimation: u64, context: TaskContext) -> Self {
        Self {
            core: Arc::new(TaskCore::new(estimation, context)),
        }
    }

    /// Identity carried by this task's events
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Current forecast work size
    pub fn estimation(&self) -> u64 {
        self.core.estimation()
    }

    /// Current completed work
    pub fn progress(&self) -> u64 {
        self.core.progress()
    }

    /// Current activity label
    pub fn info(&self) -> String {
        self.core.info()
    }

    /// The run context this task currently belongs to
    pub fn context(&self) -> TaskContext {
        self.core.context()
    }

    /// Shortcut for the context's cancellation signal
    pub fn cancellation_token(&self) -> CancellationToken {
        self.core.context().cancellation_token().clone()
    }

    /// Set the forecast work size; notifies only when the value changes
    pub fn set_estimation(&self, estimation: u64) {
        self.core.set_estimation(estimation);
    }

    /// Set the completed work
    ///
    /// A value above the estimation raises the estimation first. Setting the same
    /// nonzero value twice notifies once; setting zero always notifies.
    pub fn set_progress(&self, progress: u64) {
        self.core.set_progress(progress);
    }

    /// Add `delta` units to the completed work
    pub fn advance(&self, delta: u64) {
        self.core.advance(delta);
    }

    /// Force progress up to the estimation
    pub fn complete(&self) {
        self.core.complete();
    }

    /// Set the activity label carried by subsequent progress notifications
    pub fn set_info(&self, info: impl Into<String>) {
        self.core.set_info(info.into());
    }

    /// Log an error and record one failure with the run's accumulator
    pub fn fail(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        self.core.fail(message, cause);
    }

    /// Register an observer for this task's events
    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.core.hub().subscribe(handler)
    }

    /// Remove an observer
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.hub().unsubscribe(id)
    }
}

impl Trackable for Task {
    fn node(&self) -> Arc<dyn ProgressNode> {
        self.core.clone()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Reported {
        estimation: AtomicU64,
        progress: AtomicU64,
        progress_events: AtomicU64,
    }

    fn watch(task: &Task) -> Arc<Reported> {
        let reported = Arc::new(Reported {
            estimation: AtomicU64::new(0),
            progress: AtomicU64::new(0),
            progress_events: AtomicU64::new(0),
        });
        let r = Arc::clone(&reported);
        task.subscribe(Arc::new(move |event: &Event| match event {
            Event::EstimationChanged { estimation, .. } => {
                r.estimation.store(*estimation, Ordering::SeqCst);
            }
            Event::ProgressChanged { progress, .. } => {
                r.progress.store(*progress, Ordering::SeqCst);
                r.progress_events.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }));
        reported
    }

    #[test]
    fn estimation_defaults_to_one_and_reports_changes() {
        let task = Task::new();
        let reported = watch(&task);
        assert_eq!(task.estimation(), 1);

        task.set_estimation(3);
        assert_eq!(task.estimation(), 3);
        assert_eq!(reported.estimation.load(Ordering::SeqCst), 3);

        for expected in 1..=3 {
            task.advance(1);
            assert_eq!(reported.progress.load(Ordering::SeqCst), expected);
        }
    }

    #[test]
    fn progress_above_estimation_raises_estimation_first() {
        let task = Task::with_estimation(2);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        task.subscribe(Arc::new(move |event: &Event| o.lock().unwrap().push(event.clone())));

        task.set_progress(5);
        assert_eq!(task.estimation(), 5);
        assert_eq!(task.progress(), 5);

        let events = order.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                Event::EstimationChanged {
                    task: task.id(),
                    estimation: 5
                },
                Event::ProgressChanged {
                    task: task.id(),
                    info: String::new(),
                    progress: 5
                },
            ]
        );
    }

    #[test]
    fn progress_never_exceeds_estimation_after_set() {
        let task = Task::with_estimation(4);
        for value in [0, 3, 9, 2, 9, 15, 1] {
            task.set_progress(value);
            assert!(task.progress() <= task.estimation(), "after {value}");
        }
    }

    #[test]
    fn same_nonzero_progress_notifies_once() {
        let task = Task::with_estimation(10);
        let reported = watch(&task);
        task.set_progress(4);
        task.set_progress(4);
        assert_eq!(reported.progress_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_progress_always_notifies() {
        let task = Task::with_estimation(10);
        let reported = watch(&task);
        task.set_progress(0);
        task.set_progress(0);
        assert_eq!(reported.progress_events.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unchanged_estimation_is_silent() {
        let task = Task::with_estimation(3);
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        task.subscribe(Arc::new(move |event: &Event| {
            if matches!(event, Event::EstimationChanged { .. }) {
                c.fetch_add(1, Ordering::SeqCst);
            }
        }));
        task.set_estimation(3);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn info_travels_with_progress() {
        let task = Task::with_estimation(3);
        let (_, mut rx) = task.node().subscribe_channel();
        task.set_info("report.pdf");
        task.set_progress(1);
        match rx.try_recv().unwrap() {
            Event::ProgressChanged { info, progress, .. } => {
                assert_eq!(info, "report.pdf");
                assert_eq!(progress, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn fail_reports_to_log_and_accumulator() {
        let log = Arc::new(MemoryLog::new());
        let task = Task::with_context(1, TaskContext::default().with_log(log.clone()));
        let cause = std::io::Error::other("connection reset");
        task.fail("download failed", Some(&cause));

        assert_eq!(log.errors(), vec!["download failed".to_string()]);
        assert_eq!(task.context().accumulator().failures(), 1);
    }
}
