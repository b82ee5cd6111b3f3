//! Composite node summing its children

use std::sync::{Arc, Mutex, Weak};

use tokio_util::sync::CancellationToken;

use super::hub::{EventHandler, SubscriptionId};
use super::leaf::TaskCore;
use super::{ProgressNode, TaskContext, Trackable};
use crate::types::{Event, TaskId};
use crate::utils::lock;

struct Child {
    node: Arc<dyn ProgressNode>,
    wiring: SubscriptionId,
}

#[derive(Default)]
struct Children {
    list: Vec<Child>,
    guess: u64,
    is_final: bool,
}

impl Children {
    fn estimation_sum(&self) -> u64 {
        self.list.iter().map(|c| c.node.estimation()).sum()
    }

    fn progress_sum(&self) -> u64 {
        self.list.iter().map(|c| c.node.progress()).sum()
    }

    /// `sum` once final, otherwise the larger of guess and sum
    fn aggregate_estimation(&self) -> u64 {
        let sum = self.estimation_sum();
        if self.is_final { sum } else { sum.max(self.guess) }
    }
}

/// Shared state of a container; owned through `Arc` so child wiring can hold a `Weak`
pub(crate) struct ContainerCore {
    task: TaskCore,
    children: Mutex<Children>,
}

impl std::fmt::Debug for ContainerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let children = lock(&self.children);
        f.debug_struct("ContainerCore")
            .field("task", &self.task)
            .field("children", &children.list.len())
            .field("guess", &children.guess)
            .field("is_final", &children.is_final)
            .finish()
    }
}

impl ContainerCore {
    pub(crate) fn new(guess: u64, context: TaskContext) -> Arc<Self> {
        Arc::new(Self {
            task: TaskCore::new(guess, context),
            children: Mutex::new(Children {
                guess,
                ..Children::default()
            }),
        })
    }

    pub(crate) fn task(&self) -> &TaskCore {
        &self.task
    }

    pub(crate) fn add(self: &Arc<Self>, node: Arc<dyn ProgressNode>) {
        node.adopt(&self.task.context());

        let weak: Weak<Self> = Arc::downgrade(self);
        let wiring = node.attach(Arc::new(move |event: &Event| {
            if let Some(container) = weak.upgrade() {
                container.on_child_event(event);
            }
        }));

        let _turn = self.task.turn();
        let mut events = Vec::new();
        {
            let mut children = lock(&self.children);
            children.list.push(Child { node, wiring });
            let estimation = children.aggregate_estimation();
            let progress = children.progress_sum();
            let mut state = self.task.state();
            self.task.stage_estimation(&mut state, estimation, &mut events);
            if progress != state.progress {
                self.task.stage_progress(&mut state, progress, &mut events);
            }
        }
        self.task.publish(events);
    }

    pub(crate) fn child_count(&self) -> usize {
        lock(&self.children).list.len()
    }

    pub(crate) fn reestimate(&self) {
        let _turn = self.task.turn();
        let mut events = Vec::new();
        {
            let mut children = lock(&self.children);
            children.is_final = true;
            let estimation = children.estimation_sum();
            self.task.stage_estimation(&mut self.task.state(), estimation, &mut events);
        }
        self.task.publish(events);
    }

    pub(crate) fn set_guess_estimation(&self, guess: u64) {
        let _turn = self.task.turn();
        let mut events = Vec::new();
        {
            let mut children = lock(&self.children);
            children.guess = guess;
            let mut state = self.task.state();
            if guess > state.estimation {
                self.task.stage_estimation(&mut state, guess, &mut events);
                children.is_final = false;
            }
        }
        self.task.publish(events);
    }

    pub(crate) fn clear(&self) {
        let _turn = self.task.turn();
        let mut events = Vec::new();
        let detached = {
            let mut children = lock(&self.children);
            children.is_final = false;
            let guess = children.guess;
            let mut state = self.task.state();
            self.task.stage_progress(&mut state, 0, &mut events);
            self.task.stage_estimation(&mut state, guess, &mut events);
            std::mem::take(&mut children.list)
        };
        for child in detached {
            child.node.unsubscribe(child.wiring);
        }
        self.task.publish(events);
    }

    /// Recompute the aggregates; runs on the child's thread while the child holds its turn
    fn on_child_event(&self, event: &Event) {
        if !matches!(event, Event::EstimationChanged { .. } | Event::ProgressChanged { .. }) {
            return;
        }
        let _turn = self.task.turn();
        let mut events = Vec::new();
        match event {
            Event::EstimationChanged { .. } => {
                let children = lock(&self.children);
                let estimation = children.aggregate_estimation();
                self.task.stage_estimation(&mut self.task.state(), estimation, &mut events);
            }
            Event::ProgressChanged { info, .. } => {
                let children = lock(&self.children);
                let progress = children.progress_sum();
                let mut state = self.task.state();
                if !info.is_empty() {
                    state.info.clone_from(info);
                }
                self.task.stage_progress(&mut state, progress, &mut events);
            }
            _ => return,
        }
        self.task.publish(events);
    }

    fn adopt_all(&self, context: &TaskContext) {
        self.task.set_context(context);
        let nodes: Vec<_> = lock(&self.children)
            .list
            .iter()
            .map(|c| Arc::clone(&c.node))
            .collect();
        for node in nodes {
            node.adopt(context);
        }
    }
}

impl ProgressNode for ContainerCore {
    fn id(&self) -> TaskId {
        self.task.id()
    }

    fn estimation(&self) -> u64 {
        self.task.estimation()
    }

    fn progress(&self) -> u64 {
        self.task.progress()
    }

    fn info(&self) -> String {
        self.task.info()
    }

    fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.task.hub().subscribe(handler)
    }

    fn attach(&self, handler: EventHandler) -> SubscriptionId {
        self.task.hub().attach(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.task.hub().unsubscribe(id)
    }

    fn adopt(&self, context: &TaskContext) {
        self.adopt_all(context);
    }
}

/// Task made of child tasks
///
/// Estimation is `max(guess, sum of children)` until [`reestimate`](Self::reestimate)
/// declares the children complete, after which it is the plain sum. Progress is always
/// the live sum of the children's progress.
#[derive(Debug)]
pub struct TaskContainer {
    core: Arc<ContainerCore>,
}

impl TaskContainer {
    /// Create a container for a fresh run with the given guess (zero for none)
    pub fn new(guess: u64) -> Self {
        Self::with_context(guess, TaskContext::default())
    }

    /// Create a container bound to an existing run context
    pub fn with_context(guess: u64, context: TaskContext) -> Self {
        Self {
            core: ContainerCore::new(guess, context),
        }
    }

    /// Identity carried by this container's events
    pub fn id(&self) -> TaskId {
        self.core.task().id()
    }

    /// Current aggregate estimation
    pub fn estimation(&self) -> u64 {
        self.core.task().estimation()
    }

    /// Current aggregate progress
    pub fn progress(&self) -> u64 {
        self.core.task().progress()
    }

    /// Label of the child that most recently reported one
    pub fn info(&self) -> String {
        self.core.task().info()
    }

    /// Number of children currently wired
    pub fn len(&self) -> usize {
        self.core.child_count()
    }

    /// True if no child is wired
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The run context shared with every child
    pub fn context(&self) -> TaskContext {
        self.core.task().context()
    }

    /// Shortcut for the context's cancellation signal
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context().cancellation_token().clone()
    }

    /// Wire a child: it adopts this container's context and its numbers join the sums
    pub fn add_task(&self, task: &impl Trackable) {
        self.core.add(task.node());
    }

    /// Declare the children complete; the guess no longer props up the estimation
    pub fn reestimate(&self) {
        self.core.reestimate();
    }

    /// Replace the guess; a guess above the current estimation raises it and undoes
    /// [`reestimate`](Self::reestimate)
    pub fn set_guess_estimation(&self, guess: u64) {
        self.core.set_guess_estimation(guess);
    }

    /// Detach every child and return to the initial guess with zero progress
    pub fn clear(&self) {
        self.core.clear();
    }

    /// Register an observer for this container's events
    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        self.core.task().hub().subscribe(handler)
    }

    /// Remove an observer
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.task().hub().unsubscribe(id)
    }
}

impl Trackable for TaskContainer {
    fn node(&self) -> Arc<dyn ProgressNode> {
        self.core.clone()
    }
}
