//! Core types for cloud-dl

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a node in the task tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status of a downloader
///
/// `Initialized` moves to `Authenticating`, then through any of the working phases to
/// `Done`. `Error` is reachable from every non-terminal state. `Done` and `Error` are
/// terminal until the downloader is cleared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Initial status of a downloader
    #[default]
    Initialized,
    /// Exchanging the credential for a session
    Authenticating,
    /// Downloading meta-information about the account and its items
    DownloadingMetaInformation,
    /// Listing items without downloading them
    ListingFiles,
    /// Downloading item contents
    DownloadingFiles,
    /// Downloading general account information
    DownloadingAccountInfo,
    /// Downloading geo-location data
    DownloadingGeolocationData,
    /// Downloading calendar events
    DownloadingCalendar,
    /// Successfully finished
    Done,
    /// Finished with an unrecoverable error
    Error,
}

impl Status {
    /// Returns true for `Done` and `Error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Error)
    }

    /// Whether a downloader in this status may move to `next`
    pub fn can_transition_to(&self, next: Status) -> bool {
        !self.is_terminal() && next != Status::Initialized
    }
}

/// Outcome of a run, derived from per-item success and failure signals
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No failures were recorded
    #[default]
    Success,
    /// Some items succeeded and some failed
    Errors,
    /// Failures were recorded and nothing succeeded
    Failure,
}

/// Notification published by a node of the task tree
///
/// Every event names the task it is about. For the current-operation events this is the
/// spotlighted sub-operation, not the downloader re-publishing it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Forecast work size changed
    EstimationChanged {
        /// Task whose estimation changed
        task: TaskId,
        /// New estimation, in work units
        estimation: u64,
    },

    /// Completed work changed (or was re-announced as zero)
    ProgressChanged {
        /// Task whose progress changed
        task: TaskId,
        /// Current activity label, empty if none
        info: String,
        /// New progress, in work units
        progress: u64,
    },

    /// Downloader lifecycle status changed
    StatusChanged {
        /// Downloader whose status changed
        task: TaskId,
        /// New status
        status: Status,
    },

    /// Estimation of the spotlighted sub-operation changed
    CurrentOperationEstimationChanged {
        /// The sub-operation
        task: TaskId,
        /// Its estimation, in work units
        estimation: u64,
    },

    /// Progress of the spotlighted sub-operation changed
    CurrentOperationProgressChanged {
        /// The sub-operation
        task: TaskId,
        /// Its activity label, empty if none
        info: String,
        /// Its progress, in work units
        progress: u64,
    },

    /// Partial results are available for display before the run finishes
    PreliminaryResultsReady {
        /// Downloader that produced the results
        task: TaskId,
        /// The results, serialized
        results: serde_json::Value,
    },
}

impl Event {
    /// The task this event is about
    pub fn task(&self) -> TaskId {
        match self {
            Event::EstimationChanged { task, .. }
            | Event::ProgressChanged { task, .. }
            | Event::StatusChanged { task, .. }
            | Event::CurrentOperationEstimationChanged { task, .. }
            | Event::CurrentOperationProgressChanged { task, .. }
            | Event::PreliminaryResultsReady { task, .. } => *task,
        }
    }
}

/// Snapshot of the spotlighted sub-operation of a downloader
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CurrentOperation {
    /// The sub-operation, if one has reported yet
    pub task: Option<TaskId>,
    /// Last reported estimation
    pub estimation: u64,
    /// Last reported progress
    pub progress: u64,
    /// Last reported activity label
    pub info: String,
}
