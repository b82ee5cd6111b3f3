//! Listing phase: page through the account, then fetch full metadata per item

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::batch::process_in_chunks;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gate::AdmissionGate;
use crate::retry::execute_with_backoff;
use crate::source::{CloudSource, RemoteItem};
use crate::task::Downloader;
use crate::types::Status;

/// Lists every item of the account and fetches its metadata
///
/// Estimation starts at [`GUESS_ESTIMATION`](Self::GUESS_ESTIMATION), grows by one per
/// extra listing page and by one per listed item. Each page and each metadata request
/// advances progress by one.
#[derive(Debug)]
pub struct ListingDownloader {
    downloader: Downloader,
    source: Arc<dyn CloudSource>,
    config: Config,
}

impl ListingDownloader {
    /// Estimation before the first page is listed
    pub const GUESS_ESTIMATION: u64 = 10;

    /// Create the phase for an authenticated session
    pub fn new(source: Arc<dyn CloudSource>, config: &Config) -> Self {
        Self {
            downloader: Downloader::new(Self::GUESS_ESTIMATION),
            source,
            config: config.clone(),
        }
    }

    /// The progress node of this phase
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// List the account and fetch metadata for every item
    ///
    /// The result keeps the listing order; items whose metadata could not be fetched
    /// are `None` and counted as failures. A listing failure other than cancellation
    /// puts the phase into `Error` and yields an empty list.
    pub async fn run(&self) -> Result<Vec<Option<RemoteItem>>> {
        let context = self.downloader.context();
        let cancel = context.cancellation_token().clone();
        context.log().message("Downloading items info...");

        self.downloader.set_status(Status::ListingFiles);
        let items = match self.list_all(&cancel).await {
            Ok(items) => items,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                context.log().error("Items listing error.", Some(&e));
                self.downloader.error();
                return Ok(Vec::new());
            }
        };

        context
            .log()
            .message(&format!("Listed {} items.", items.len()));
        self.downloader
            .set_estimation(self.downloader.estimation() + items.len() as u64);

        let threads = self.config.concurrency.download_threads;
        let gate = AdmissionGate::new(i64::try_from(threads).unwrap_or(i64::MAX))?;
        let cooldown = self.config.retry.per_item_cooldown(threads);

        self.downloader.set_status(Status::DownloadingMetaInformation);
        let result = process_in_chunks(
            items,
            self.config.concurrency.task_chunk_size,
            &cancel,
            |item| self.fetch_metadata(item, &gate, cooldown, &cancel),
        )
        .await?;

        self.downloader.done();
        Ok(result)
    }

    async fn list_all(&self, cancel: &CancellationToken) -> Result<Vec<RemoteItem>> {
        let retry = &self.config.retry;
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        let mut first = true;

        loop {
            if !first {
                self.downloader
                    .set_estimation(self.downloader.estimation() + 1);
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
            }
            first = false;

            let page = execute_with_backoff(retry, retry.cooldown, cancel, |ct| {
                self.source.list_page(page_token.clone(), ct)
            })
            .await?;
            self.downloader.advance(1);

            tracing::trace!(
                task = %self.downloader.id(),
                items = page.items.len(),
                more = page.next_page.is_some(),
                "listed page"
            );

            items.extend(page.items);
            match page.next_page {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(items),
            }
        }
    }

    async fn fetch_metadata(
        &self,
        item: RemoteItem,
        gate: &AdmissionGate,
        cooldown: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<RemoteItem>> {
        let _permit = gate.acquire(cancel).await?;

        let fetched = execute_with_backoff(&self.config.retry, cooldown, cancel, |ct| {
            self.source.item_metadata(&item, ct)
        })
        .await;

        match fetched {
            Ok(full) => {
                self.downloader.advance(1);
                self.downloader.context().accumulator().success_item();
                Ok(Some(full))
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                self.downloader.fail(
                    &format!("Downloading meta-information for item '{}' failed.", item.name),
                    Some(&e),
                );
                self.downloader.advance(1);
                Ok(None)
            }
        }
    }
}
