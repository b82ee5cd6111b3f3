//! Phase pipeline: authenticate, collect meta-information, download files
//!
//! [`CloudDownloader`] is the root of the progress tree for one run. It registers
//! one sub-downloader per phase before starting any of them, so its status only
//! reaches `Done` once every phase has.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cloud_dl::{CloudDownloader, Config, Credential, RunSettings};
//! # async fn demo(authenticator: Arc<dyn cloud_dl::Authenticator>) -> cloud_dl::Result<()> {
//! let downloader = CloudDownloader::new(authenticator, Config::default())?;
//! let (_, mut events) = downloader.subscribe_channel();
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! });
//!
//! let report = downloader
//!     .run(&RunSettings {
//!         target_directory: "backup".into(),
//!         download_files: true,
//!         credential: Credential::new("refresh-token"),
//!     })
//!     .await?;
//! println!("{:?}: {} files", report.outcome, report.downloaded.len());
//! # Ok(())
//! # }
//! ```

mod files;
mod listing;
mod metadata;

pub use files::{FileDownloader, FilesDownloader};
pub use listing::ListingDownloader;
pub use metadata::{AccountInfoTask, MetaInformationDownloader};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RunSettings};
use crate::error::{Error, Result};
use crate::retry::execute_with_backoff;
use crate::source::{Authenticator, FlatLayout, LayoutResolver, RemoteItem};
use crate::task::{Downloader, ProgressNode, SubscriptionId, TaskContext, Trackable};
use crate::types::{Event, RunStatus, Status};

/// Account information and item metadata collected by the meta-information phase
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaInformation {
    /// Provider-specific account information, `None` if it could not be fetched
    pub account: Option<serde_json::Value>,
    /// Items whose metadata was fetched, in listing order
    ///
    /// Items whose metadata request failed are left out, so this can be shorter than
    /// the listing.
    pub files: Vec<RemoteItem>,
}

/// An item stored on the local filesystem
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadedFile {
    /// Metadata of the item as returned by the provider
    pub item: RemoteItem,
    /// Where the content was written
    pub path: PathBuf,
}

/// Summary of one run
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    /// Last lifecycle status of the root downloader
    pub status: Status,
    /// Outcome derived from per-item successes and failures
    pub outcome: RunStatus,
    /// Number of items that succeeded
    pub successes: u64,
    /// Number of failures recorded
    pub failures: u64,
    /// Collected meta-information; empty if authentication failed
    pub meta: MetaInformation,
    /// One slot per entry of `meta.files`, in the same order; empty if files were not
    /// downloaded
    ///
    /// Slots line up with `meta.files`, not with the raw listing: an item whose
    /// metadata failed has no slot. Folders and failed downloads are `None`.
    pub downloaded: Vec<Option<DownloadedFile>>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

/// Root downloader for one run against one cloud account
///
/// Owns a fresh [`TaskContext`]: cancellation signal, accumulator, log and
/// dispatcher are shared with every phase and leaf of the run. A downloader runs
/// once; [`run`](Self::run) consumes it.
#[derive(Debug)]
pub struct CloudDownloader {
    downloader: Downloader,
    authenticator: Arc<dyn Authenticator>,
    layout: Arc<dyn LayoutResolver>,
    config: Config,
}

impl CloudDownloader {
    /// Estimation before any phase has reported
    pub const GUESS_ESTIMATION: u64 = 10;

    /// Create a root downloader with a fresh run context
    ///
    /// Returns [`Error::Config`] if `config` does not validate.
    pub fn new(authenticator: Arc<dyn Authenticator>, config: Config) -> Result<Self> {
        Self::with_context(authenticator, config, TaskContext::default())
    }

    /// Create a root downloader sharing `context` with the whole tree
    pub fn with_context(
        authenticator: Arc<dyn Authenticator>,
        config: Config,
        context: TaskContext,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            downloader: Downloader::with_context(Self::GUESS_ESTIMATION, context),
            authenticator,
            layout: Arc::new(FlatLayout),
            config,
        })
    }

    /// Store files with `layout` instead of directly under the target directory
    pub fn with_layout(mut self, layout: Arc<dyn LayoutResolver>) -> Self {
        self.layout = layout;
        self
    }

    /// The root progress node
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// The run's cancellation signal; cancel it to abort the run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.downloader.cancellation_token()
    }

    /// Receive the root's events, including re-published current-operation events
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        self.downloader.node().subscribe_channel()
    }

    /// Run every phase
    ///
    /// Authentication failure puts the root into `Error` and returns a report without
    /// meta-information. Cancellation returns [`Error::Cancelled`] and is not counted
    /// as a failure.
    pub async fn run(self, settings: &RunSettings) -> Result<RunReport> {
        let started_at = Utc::now();
        let result = self.run_phases(settings).await;
        let (meta, downloaded) = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_cancelled() {
                    self.downloader
                        .context()
                        .log()
                        .message("Operation was cancelled.");
                }
                return Err(e);
            }
        };

        let accumulator = Arc::clone(self.downloader.context().accumulator());
        let report = RunReport {
            status: self.downloader.status(),
            outcome: accumulator.status(),
            successes: accumulator.successes(),
            failures: accumulator.failures(),
            meta,
            downloaded,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            task = %self.downloader.id(),
            status = ?report.status,
            outcome = ?report.outcome,
            successes = report.successes,
            failures = report.failures,
            "run finished"
        );
        Ok(report)
    }

    async fn run_phases(
        &self,
        settings: &RunSettings,
    ) -> Result<(MetaInformation, Vec<Option<DownloadedFile>>)> {
        let context = self.downloader.context();
        let log = context.log().clone();
        let cancel = context.cancellation_token().clone();

        log.message(&format!(
            "Started downloading, target directory = {}.",
            settings.target_directory.display()
        ));
        self.downloader.set_status(Status::Authenticating);
        log.message("Authenticating...");

        let retry = &self.config.retry;
        let source = match execute_with_backoff(retry, retry.cooldown, &cancel, |ct| {
            self.authenticator.authenticate(&settings.credential, ct)
        })
        .await
        {
            Ok(source) => source,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                log.error("Authorization error.", Some(&e));
                self.downloader.error();
                return Ok((MetaInformation::default(), Vec::new()));
            }
        };
        log.message("Authentication successful.");

        let meta_phase = MetaInformationDownloader::new(Arc::clone(&source), &self.config);
        self.downloader.add_sub_downloader(meta_phase.downloader());
        let files_phase = settings.download_files.then(|| {
            FilesDownloader::new(
                source,
                Arc::clone(&self.layout),
                settings.target_directory.clone(),
                &self.config,
            )
        });
        if let Some(files_phase) = &files_phase {
            self.downloader.add_sub_downloader(files_phase.downloader());
        }

        self.downloader.set_status(Status::DownloadingMetaInformation);
        ensure_running(&cancel)?;
        log.message("Downloading meta-information...");
        let meta = meta_phase.run().await?;

        self.downloader.emit_preliminary_results(&meta)?;

        let downloaded = match &files_phase {
            Some(files_phase) => {
                self.downloader.set_status(Status::DownloadingFiles);
                ensure_running(&cancel)?;
                log.message("Downloading files...");
                files_phase.run(&meta.files).await?
            }
            None => Vec::new(),
        };

        self.downloader.done();
        Ok((meta, downloaded))
    }
}

fn ensure_running(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
