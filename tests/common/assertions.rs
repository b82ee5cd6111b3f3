//! Event recording and assertions for pipeline tests

use std::sync::{Arc, Mutex};

use cloud_dl::task::EventHandler;
use cloud_dl::{Event, Status, TaskId};

/// Collects every event delivered to a handler
#[derive(Clone, Debug, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler appending to this recorder
    pub fn handler(&self) -> EventHandler {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: &Event| events.lock().unwrap().push(event.clone()))
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Statuses announced by `task`, in order
    pub fn statuses_of(&self, task: TaskId) -> Vec<Status> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::StatusChanged { task: t, status } if t == task => Some(status),
                _ => None,
            })
            .collect()
    }

    /// Position of the first event matching `predicate`
    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events().iter().position(predicate)
    }

    /// Estimations announced for current operations
    pub fn current_estimations(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::CurrentOperationEstimationChanged { estimation, .. } => Some(estimation),
                _ => None,
            })
            .collect()
    }

    /// Payloads of every preliminary-results event
    pub fn preliminary_results(&self) -> Vec<serde_json::Value> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::PreliminaryResultsReady { results, .. } => Some(results),
                _ => None,
            })
            .collect()
    }
}

/// Assert that progress announced by `task` never decreases except for resets to zero
pub fn assert_progress_monotonic(events: &[Event], task: TaskId) {
    let mut last = 0;
    for event in events {
        if let Event::ProgressChanged { task: t, progress, .. } = event
            && *t == task
        {
            assert!(
                *progress == 0 || *progress >= last,
                "progress of {task} went from {last} to {progress}"
            );
            last = *progress;
        }
    }
}
