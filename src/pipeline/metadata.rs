//! Meta-information phase: account info plus the item listing

use std::sync::Arc;

use async_trait::async_trait;

use super::MetaInformation;
use super::listing::ListingDownloader;
use crate::config::{Config, RetryConfig};
use crate::error::Result;
use crate::retry::execute_with_backoff;
use crate::source::CloudSource;
use crate::task::{Downloader, ItemContext, ItemTask, WrappedTask};
use crate::types::Status;

/// Fetches general account information
#[derive(Debug)]
pub struct AccountInfoTask {
    retry: RetryConfig,
}

impl AccountInfoTask {
    /// Task retrying with the given settings
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }
}

#[async_trait]
impl ItemTask<Arc<dyn CloudSource>, serde_json::Value> for AccountInfoTask {
    fn name(&self) -> &str {
        "account info"
    }

    async fn run(
        &self,
        source: Arc<dyn CloudSource>,
        context: &ItemContext,
    ) -> Result<Option<serde_json::Value>> {
        context.log().message("Downloading account info...");
        let cancel = context.cancellation_token();
        match execute_with_backoff(&self.retry, self.retry.cooldown, cancel, |ct| {
            source.account_info(ct)
        })
        .await
        {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                context.fail("Account info download failed.", Some(&e));
                Ok(None)
            }
        }
    }
}

/// Collects account information and item metadata
///
/// The listing runs as this phase's current operation, so its page and item counts
/// are what a UI shows while meta-information is downloading.
#[derive(Debug)]
pub struct MetaInformationDownloader {
    downloader: Downloader,
    listing: ListingDownloader,
    account: WrappedTask<AccountInfoTask>,
    source: Arc<dyn CloudSource>,
}

impl MetaInformationDownloader {
    /// Create the phase and wire its listing and account-info children
    pub fn new(source: Arc<dyn CloudSource>, config: &Config) -> Self {
        let downloader = Downloader::new(0);
        let listing = ListingDownloader::new(Arc::clone(&source), config);
        let account = WrappedTask::new(AccountInfoTask::new(config.retry.clone()));
        downloader.add_as_current_operation(listing.downloader());
        downloader.add_task(&account);
        Self {
            downloader,
            listing,
            account,
            source,
        }
    }

    /// The progress node of this phase
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Download account info, then list items and fetch their metadata
    ///
    /// Account info goes first: the phase mirrors the listing's `Done`, after which it
    /// takes no further status.
    pub async fn run(&self) -> Result<MetaInformation> {
        let log = self.downloader.context().log().clone();
        let result = self.collect().await;
        if let Err(e) = &result
            && e.is_cancelled()
        {
            log.message("Operation was cancelled.");
        }
        result
    }

    async fn collect(&self) -> Result<MetaInformation> {
        self.downloader.set_status(Status::DownloadingAccountInfo);
        let account = self.account.run(Arc::clone(&self.source)).await?;

        let files = self.listing.run().await?.into_iter().flatten().collect();

        self.downloader.done();
        Ok(MetaInformation { account, files })
    }
}
