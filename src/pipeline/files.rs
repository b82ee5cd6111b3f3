//! Files phase: stream item contents into the target directory

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::DownloadedFile;
use crate::batch::process_in_chunks;
use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::gate::AdmissionGate;
use crate::retry::execute_with_backoff;
use crate::source::{CloudSource, LayoutResolver, RemoteItem};
use crate::task::Downloader;
use crate::types::Status;
use crate::utils::{create_unique, weight_for_size};

/// Downloads the content of one item
///
/// Weighted by size (one unit per megabyte, at least one). Registered as the current
/// operation of the [`FilesDownloader`], so a UI can follow the bytes of the file in
/// flight. It never takes a status of its own: the outcome is recorded in the run's
/// accumulator and the result slot.
#[derive(Debug)]
pub struct FileDownloader {
    downloader: Downloader,
    source: Arc<dyn CloudSource>,
    retry: RetryConfig,
    cooldown: Duration,
}

impl FileDownloader {
    /// Create a downloader for `item`, labelled with its name
    pub fn new(item: &RemoteItem, source: Arc<dyn CloudSource>, retry: RetryConfig, cooldown: Duration) -> Self {
        let downloader = Downloader::new(weight_for_size(item.size.unwrap_or(0)));
        downloader.set_info(item.name.clone());
        Self {
            downloader,
            source,
            retry,
            cooldown,
        }
    }

    /// The progress node of this download
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Store `item` at `target`, or next to it under a numbered name if taken
    ///
    /// Returns `None` after logging and counting a failure. Cancellation propagates and
    /// removes the partial file.
    pub async fn run(
        &self,
        item: &RemoteItem,
        target: &Path,
        gate: &AdmissionGate,
    ) -> Result<Option<DownloadedFile>> {
        let context = self.downloader.context();
        let cancel = context.cancellation_token().clone();

        if item.size == Some(0) {
            return match create_unique(target).await {
                Ok((path, _file)) => Ok(Some(self.finished(item, path))),
                Err(e) => {
                    self.downloader
                        .fail(&format!("Saving zero-length item '{}' error.", item.name), Some(&e));
                    self.downloader.complete();
                    Ok(None)
                }
            };
        }

        let _permit = gate.acquire(&cancel).await?;
        context
            .log()
            .debug(&format!("Starting to download '{}'.", item.name));

        match self.fetch(item, target, &cancel).await {
            Ok(path) => {
                context.log().debug(&format!(
                    "Item '{}' downloading finished, saved as {}.",
                    item.name,
                    path.display()
                ));
                Ok(Some(self.finished(item, path)))
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                self.downloader
                    .fail(&format!("Downloading item '{}' error.", item.name), Some(&e));
                self.downloader.complete();
                Ok(None)
            }
        }
    }

    fn finished(&self, item: &RemoteItem, path: PathBuf) -> DownloadedFile {
        self.downloader.context().accumulator().success_item();
        self.downloader.complete();
        DownloadedFile {
            item: item.clone(),
            path,
        }
    }

    async fn fetch(&self, item: &RemoteItem, target: &Path, cancel: &CancellationToken) -> Result<PathBuf> {
        let (path, mut file) = create_unique(target).await?;
        match self.stream_into(item, &mut file, cancel).await {
            Ok(()) => Ok(path),
            Err(e) => {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %cleanup, "failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    async fn stream_into(&self, item: &RemoteItem, file: &mut File, cancel: &CancellationToken) -> Result<()> {
        let mut stream = execute_with_backoff(&self.retry, self.cooldown, cancel, |ct| {
            self.source.open_content(item, ct)
        })
        .await?;

        let units = self.downloader.estimation();
        let mut received: u64 = 0;
        let mut reported: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if let Some(size) = item.size
                && size > 0
            {
                let done = units_for(received, size, units);
                if done > reported {
                    reported = done;
                    self.downloader.set_progress(done);
                }
            }
        }

        file.flush().await?;
        Ok(())
    }
}

/// Work units covered by `received` of `size` bytes, for an item worth `units`
fn units_for(received: u64, size: u64, units: u64) -> u64 {
    let done = u128::from(received) * u128::from(units) / u128::from(size);
    u64::try_from(done).unwrap_or(u64::MAX).min(units)
}

/// Downloads item contents into the target directory
///
/// Directories for every item are resolved and created before the first download;
/// a failure there is fatal for the phase. The guess estimation is the total weight
/// of all files, so overall progress tracks bytes rather than file count.
#[derive(Debug)]
pub struct FilesDownloader {
    downloader: Downloader,
    source: Arc<dyn CloudSource>,
    layout: Arc<dyn LayoutResolver>,
    target_directory: PathBuf,
    config: Config,
}

impl FilesDownloader {
    /// Create the phase writing under `target_directory`
    pub fn new(
        source: Arc<dyn CloudSource>,
        layout: Arc<dyn LayoutResolver>,
        target_directory: impl Into<PathBuf>,
        config: &Config,
    ) -> Self {
        Self {
            downloader: Downloader::new(0),
            source,
            layout,
            target_directory: target_directory.into(),
            config: config.clone(),
        }
    }

    /// The progress node of this phase
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Download every non-folder item
    ///
    /// One slot per item, in order: folders and failed downloads are `None`. A layout
    /// failure puts the phase into `Error` and yields an empty list.
    pub async fn run(&self, items: &[RemoteItem]) -> Result<Vec<Option<DownloadedFile>>> {
        let context = self.downloader.context();
        let log = context.log().clone();
        let cancel = context.cancellation_token().clone();

        let total_bytes: u64 = items.iter().filter_map(|item| item.size).sum();
        log.message(&format!(
            "Items to download: {}, overall size: {total_bytes} bytes.",
            items.len()
        ));

        let targets = match self.prepare_targets(items).await {
            Ok(targets) => targets,
            Err(e) => {
                log.error(
                    "Unexpected error while creating directory structure, aborting download.",
                    Some(&e),
                );
                self.downloader.error();
                return Ok(Vec::new());
            }
        };

        let guess = items
            .iter()
            .filter(|item| !item.is_folder)
            .map(|item| weight_for_size(item.size.unwrap_or(0)))
            .sum();
        self.downloader.set_guess_estimation(guess);

        let threads = self.config.concurrency.download_threads;
        let gate = AdmissionGate::new(i64::try_from(threads).unwrap_or(i64::MAX))?;
        let cooldown = self.config.retry.per_item_cooldown(threads);

        let work: Vec<(&RemoteItem, Option<PathBuf>)> = items.iter().zip(targets).collect();
        let result = process_in_chunks(
            work,
            self.config.concurrency.task_chunk_size,
            &cancel,
            |(item, target)| self.download_one(item, target, &gate, cooldown),
        )
        .await;

        match result {
            Ok(files) => {
                self.downloader.done();
                Ok(files)
            }
            Err(e) => {
                if e.is_cancelled() {
                    log.message("Operation was cancelled.");
                }
                Err(e)
            }
        }
    }

    async fn download_one(
        &self,
        item: &RemoteItem,
        target: Option<PathBuf>,
        gate: &AdmissionGate,
        cooldown: Duration,
    ) -> Result<Option<DownloadedFile>> {
        self.downloader.set_status(Status::DownloadingFiles);
        let Some(target) = target else {
            return Ok(None);
        };

        let file = FileDownloader::new(item, Arc::clone(&self.source), self.config.retry.clone(), cooldown);
        self.downloader.add_as_current_operation(file.downloader());
        file.run(item, &target, gate).await
    }

    /// Resolve a path for every file and create its parent directory
    async fn prepare_targets(&self, items: &[RemoteItem]) -> Result<Vec<Option<PathBuf>>> {
        tokio::fs::create_dir_all(&self.target_directory)
            .await
            .map_err(|e| layout_error(&self.target_directory, &e))?;

        let mut targets = Vec::with_capacity(items.len());
        for item in items {
            if item.is_folder {
                targets.push(None);
                continue;
            }
            let path = self.layout.resolve(item, items, &self.target_directory)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| layout_error(parent, &e))?;
            }
            targets.push(Some(path));
        }
        Ok(targets)
    }
}

fn layout_error(path: &Path, e: &std::io::Error) -> Error {
    Error::Layout {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
