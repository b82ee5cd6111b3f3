//! In-memory cloud source and authenticator

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use cloud_dl::source::{ContentStream, ItemPage};
use cloud_dl::{
    Authenticator, CloudSource, Credential, Error, RemoteItem, Result, SourceError,
};

use super::config::GOOD_TOKEN;

/// Counts requests that are currently being served
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    /// Highest number of simultaneous requests seen so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cloud account served from memory
///
/// Content defaults to `size` bytes of `b'x'`, delivered in chunks of `chunk_size`.
#[derive(Debug)]
pub struct FakeSource {
    pages: Vec<Vec<RemoteItem>>,
    contents: HashMap<String, Vec<u8>>,
    chunk_size: usize,
    failing_metadata: HashSet<String>,
    failing_content: HashSet<String>,
    stalled_content: HashSet<String>,
    listing_error: Option<SourceError>,
    transient_listing_failures: AtomicU32,
    account: Option<serde_json::Value>,
    list_calls: AtomicU32,
    latency: Duration,
    /// Metadata requests being served
    pub metadata_in_flight: Arc<InFlight>,
    /// Content streams open, tracked once a latency is set
    pub content_in_flight: Arc<InFlight>,
    /// Notified each time a content stream is opened
    pub opened: Notify,
    /// Ids of items whose content was opened, in order
    pub opened_ids: Mutex<Vec<String>>,
}

impl FakeSource {
    /// Account listing `pages`, one inner vector per page
    pub fn new(pages: Vec<Vec<RemoteItem>>) -> Self {
        Self {
            pages,
            contents: HashMap::new(),
            chunk_size: 400_000,
            failing_metadata: HashSet::new(),
            failing_content: HashSet::new(),
            stalled_content: HashSet::new(),
            listing_error: None,
            transient_listing_failures: AtomicU32::new(0),
            account: Some(json!({ "user": "test@example.com", "quota": 15_000_000_000u64 })),
            list_calls: AtomicU32::new(0),
            latency: Duration::ZERO,
            metadata_in_flight: Arc::default(),
            content_in_flight: Arc::default(),
            opened: Notify::new(),
            opened_ids: Mutex::new(Vec::new()),
        }
    }

    /// Serve `bytes` as the content of item `id`
    pub fn with_content(mut self, id: &str, bytes: &[u8]) -> Self {
        self.contents.insert(id.to_string(), bytes.to_vec());
        self
    }

    /// Reject metadata requests for item `id`
    pub fn failing_metadata(mut self, id: &str) -> Self {
        self.failing_metadata.insert(id.to_string());
        self
    }

    /// Fail the content stream of item `id` after its first chunk
    pub fn failing_content(mut self, id: &str) -> Self {
        self.failing_content.insert(id.to_string());
        self
    }

    /// Make the content stream of item `id` deliver one chunk and then never finish
    pub fn stalled_content(mut self, id: &str) -> Self {
        self.stalled_content.insert(id.to_string());
        self
    }

    /// Reject every listing request
    pub fn listing_error(mut self, error: SourceError) -> Self {
        self.listing_error = Some(error);
        self
    }

    /// Fail the first `count` listing requests with a transient error
    pub fn transient_listing_failures(self, count: u32) -> Self {
        self.transient_listing_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Spend `latency` on every metadata request and every content chunk
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make account info unavailable
    pub fn without_account(mut self) -> Self {
        self.account = None;
        self
    }

    /// Number of listing requests received, including failed ones
    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn content_of(&self, item: &RemoteItem) -> Vec<u8> {
        self.contents.get(&item.id).cloned().unwrap_or_else(|| {
            let size = usize::try_from(item.size.unwrap_or(0)).unwrap_or(0);
            vec![b'x'; size]
        })
    }
}

#[async_trait]
impl CloudSource for FakeSource {
    async fn list_page(&self, page_token: Option<String>, _cancel: CancellationToken) -> Result<ItemPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.listing_error {
            return Err(Error::Source(error.clone()));
        }
        let pending = self.transient_listing_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_listing_failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::Source(SourceError::Transient("rate limit exceeded".into())));
        }

        let index = match page_token {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| Error::Source(SourceError::Rejected(format!("bad token {token}"))))?,
        };
        let items = self.pages.get(index).cloned().unwrap_or_default();
        let next_page = (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1));
        Ok(ItemPage { items, next_page })
    }

    async fn account_info(&self, _cancel: CancellationToken) -> Result<serde_json::Value> {
        self.account
            .clone()
            .ok_or_else(|| Error::Source(SourceError::Rejected("account info disabled".into())))
    }

    async fn item_metadata(&self, item: &RemoteItem, _cancel: CancellationToken) -> Result<RemoteItem> {
        let _serving = self.metadata_in_flight.enter();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing_metadata.contains(&item.id) {
            return Err(Error::Source(SourceError::NotFound(item.id.clone())));
        }
        let mut full = item.clone();
        full.metadata = json!({ "id": item.id, "full": true });
        Ok(full)
    }

    async fn open_content(&self, item: &RemoteItem, _cancel: CancellationToken) -> Result<ContentStream> {
        self.opened_ids.lock().unwrap().push(item.id.clone());
        self.opened.notify_one();

        let content = self.content_of(item);
        let chunks: Vec<Result<Vec<u8>>> = content
            .chunks(self.chunk_size.max(1))
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();

        if self.stalled_content.contains(&item.id) {
            let first = chunks.into_iter().take(1);
            return Ok(futures::stream::iter(first)
                .chain(futures::stream::pending())
                .boxed());
        }
        if self.failing_content.contains(&item.id) {
            let first = chunks.into_iter().take(1);
            let failure = Err(Error::Source(SourceError::Rejected("connection dropped".into())));
            return Ok(futures::stream::iter(first.chain(std::iter::once(failure))).boxed());
        }
        if self.latency.is_zero() {
            return Ok(futures::stream::iter(chunks).boxed());
        }
        let latency = self.latency;
        let serving = self.content_in_flight.enter();
        Ok(futures::stream::iter(chunks)
            .then(move |chunk| async move {
                tokio::time::sleep(latency).await;
                chunk
            })
            .map(move |chunk| {
                let _held = &serving;
                chunk
            })
            .boxed())
    }
}

/// Accepts only [`GOOD_TOKEN`] and hands out the shared fake source
#[derive(Debug)]
pub struct FakeAuthenticator {
    source: Arc<FakeSource>,
}

impl FakeAuthenticator {
    /// Authenticator handing out `source`
    pub fn new(source: Arc<FakeSource>) -> Arc<Self> {
        Arc::new(Self { source })
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(
        &self,
        credential: &Credential,
        _cancel: CancellationToken,
    ) -> Result<Arc<dyn CloudSource>> {
        if credential.expose() != GOOD_TOKEN {
            return Err(Error::Authentication("invalid_grant".into()));
        }
        let source: Arc<dyn CloudSource> = self.source.clone();
        Ok(source)
    }
}

/// A plain file item of `size` bytes
pub fn file(id: &str, name: &str, size: u64) -> RemoteItem {
    RemoteItem::file(id, name, size)
}

/// A folder item
pub fn folder(id: &str, name: &str) -> RemoteItem {
    RemoteItem::folder(id, name)
}
