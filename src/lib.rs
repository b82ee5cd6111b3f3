//! # cloud-dl
//!
//! Cancellable task tree with hierarchical progress for cloud storage downloaders.
//!
//! ## Design Philosophy
//!
//! cloud-dl is designed to be:
//! - **Provider-agnostic** - Cloud APIs plug in through the [`CloudSource`] and [`Authenticator`] traits
//! - **Progress-first** - Every node reports an estimation and a progress in shared work units
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## The progress tree
//!
//! A [`Task`] is a leaf with an estimation (forecast work size) and a progress. A
//! [`TaskContainer`] sums its children and keeps a guess estimation until told the
//! children are complete. A [`Downloader`] is a container with a lifecycle
//! [`Status`] and a spotlighted "current operation". Cancellation, the
//! [`StatusAccumulator`], the activity log and the event [`Dispatcher`] travel down the
//! tree in a [`TaskContext`].
//!
//! ## Quick Start
//!
//! ```
//! use cloud_dl::{Task, TaskContainer};
//!
//! let container = TaskContainer::new(5);
//! let first = Task::with_estimation(3);
//! let second = Task::with_estimation(3);
//! container.add_task(&first);
//! container.add_task(&second);
//! assert_eq!(container.estimation(), 6);
//!
//! first.set_progress(2);
//! assert_eq!(container.progress(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bounded-size batch launching
pub mod batch;
/// Configuration types
pub mod config;
/// Delivery of events to observers
pub mod dispatch;
/// Error types
pub mod error;
/// Admission gate bounding concurrent operations
pub mod gate;
/// Activity log capability
pub mod log;
/// Phase downloaders and the run orchestrator
pub mod pipeline;
/// Cooldown and retry with exponential backoff
pub mod retry;
/// Cloud data-source, authentication and layout seams
pub mod source;
/// Run outcome accumulation
pub mod status;
/// The progress tree
pub mod task;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{ConcurrencyConfig, Config, RetryConfig, RunSettings};
pub use dispatch::{DispatchQueue, Dispatcher, ImmediateDispatcher, QueueDispatcher, dispatch_queue};
pub use error::{Error, Result, SourceError};
pub use gate::{AdmissionGate, GatePermit};
pub use log::{ActivityLog, MemoryLog, TracingLog};
pub use pipeline::{CloudDownloader, DownloadedFile, MetaInformation, RunReport};
pub use source::{Authenticator, CloudSource, Credential, FlatLayout, LayoutResolver, RemoteItem};
pub use status::StatusAccumulator;
pub use task::{
    Downloader, ItemContext, ItemTask, ProgressNode, Task, TaskContainer, TaskContext, Trackable,
    WrappedTask,
};
pub use types::{CurrentOperation, Event, RunStatus, Status, TaskId};

/// Run a downloader, cancelling it when a termination signal arrives.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A signal cancels the run's token; the run then unwinds and this returns
/// [`Error::Cancelled`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use cloud_dl::{CloudDownloader, Config, Credential, RunSettings, run_with_shutdown};
///
/// # async fn demo(authenticator: Arc<dyn cloud_dl::Authenticator>) -> Result<(), Box<dyn std::error::Error>> {
/// let downloader = CloudDownloader::new(authenticator, Config::default())?;
/// let settings = RunSettings {
///     target_directory: "backup".into(),
///     download_files: true,
///     credential: Credential::new("refresh-token"),
/// };
/// let report = run_with_shutdown(downloader, &settings).await?;
/// println!("{:?}", report.outcome);
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(downloader: CloudDownloader, settings: &RunSettings) -> Result<RunReport> {
    let cancel = downloader.cancellation_token();
    let run = downloader.run(settings);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        _ = wait_for_signal() => {
            tracing::info!("Cancelling run");
            cancel.cancel();
        }
    }
    run.await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register one signal handler, waiting for the other");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
