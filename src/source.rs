//! Seams to the cloud provider: authentication, listing, metadata and content
//!
//! The pipeline only interprets what these traits return: data, a
//! [`SourceError::NotFound`](crate::error::SourceError::NotFound) sentinel, a
//! retryable [`SourceError::Transient`](crate::error::SourceError::Transient) and
//! cancellation. Provider adapters (HTTP clients, OAuth flows) live outside this crate.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Opaque bearer or refresh credential produced by the OAuth collaborator
///
/// Never inspected by the engine. `Debug` output is redacted so the secret does not
/// end up in logs.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a credential string
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw credential, for handing to a provider adapter
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// One item stored in the cloud, as listed by the provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Provider-assigned identifier
    pub id: String,
    /// Display name, not sanitized
    pub name: String,
    /// Content size in bytes; `None` for items without binary content
    #[serde(default)]
    pub size: Option<u64>,
    /// Whether the item is a folder
    #[serde(default)]
    pub is_folder: bool,
    /// Provider-specific metadata, filled by [`CloudSource::item_metadata`]
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RemoteItem {
    /// A file item with the given size and no metadata yet
    pub fn file(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size: Some(size),
            is_folder: false,
            metadata: serde_json::Value::Null,
        }
    }

    /// A folder item
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size: None,
            is_folder: true,
            metadata: serde_json::Value::Null,
        }
    }
}

/// One page of a listing
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPage {
    /// Items on this page
    pub items: Vec<RemoteItem>,
    /// Token for the next page, `None` on the last one
    pub next_page: Option<String>,
}

/// Content of one item, delivered as byte chunks
pub type ContentStream = BoxStream<'static, Result<Vec<u8>>>;

/// An authenticated session with one cloud account
///
/// Every call receives the run's cancellation token and should abort its I/O when
/// it fires, returning [`Error::Cancelled`](crate::Error::Cancelled).
#[async_trait]
pub trait CloudSource: Send + Sync + fmt::Debug {
    /// Fetch one page of the account's item list; `None` asks for the first page
    async fn list_page(
        &self,
        page_token: Option<String>,
        cancel: CancellationToken,
    ) -> Result<ItemPage>;

    /// Fetch general information about the account
    async fn account_info(&self, cancel: CancellationToken) -> Result<serde_json::Value>;

    /// Fetch the full metadata of a listed item
    async fn item_metadata(&self, item: &RemoteItem, cancel: CancellationToken) -> Result<RemoteItem>;

    /// Open the binary content of an item
    async fn open_content(&self, item: &RemoteItem, cancel: CancellationToken) -> Result<ContentStream>;
}

/// Turns a credential into a session
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Exchange `credential` for a session
    ///
    /// A rejected credential is reported as [`Error::Authentication`](crate::Error::Authentication).
    async fn authenticate(
        &self,
        credential: &Credential,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn CloudSource>>;
}

/// Decides where each item is stored locally
pub trait LayoutResolver: Send + Sync + fmt::Debug {
    /// Local path for `item` under `root`
    ///
    /// `items` is the whole batch, for layouts that rebuild a folder hierarchy. The
    /// parent directory of the returned path is created by the caller.
    fn resolve(&self, item: &RemoteItem, items: &[RemoteItem], root: &Path) -> Result<PathBuf>;
}

/// Stores every item directly under the target directory
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatLayout;

impl LayoutResolver for FlatLayout {
    fn resolve(&self, item: &RemoteItem, _items: &[RemoteItem], root: &Path) -> Result<PathBuf> {
        Ok(root.join(sanitize_file_name(&item.name)))
    }
}

/// Replace characters that are not allowed in file names on common filesystems
///
/// Path separators, `: * ? " < > |` and control characters become `_`. Names that
/// would be empty or refer to the current or parent directory become `unnamed`.
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = sanitized.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("1//refresh-token");
        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
        assert_eq!(credential.expose(), "1//refresh-token");
    }

    #[test]
    fn credential_deserializes_from_a_plain_string() {
        let credential: Credential = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(credential.expose(), "abc");
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_file_name("a/b\\c:d*e?f"), "a_b_c_d_e_f");
        assert_eq!(sanitize_file_name("report <final>.pdf"), "report _final_.pdf");
        assert_eq!(sanitize_file_name("tab\there"), "tab_here");
    }

    #[test]
    fn sanitize_never_returns_a_directory_reference() {
        assert_eq!(sanitize_file_name(""), "unnamed");
        assert_eq!(sanitize_file_name("  "), "unnamed");
        assert_eq!(sanitize_file_name(".."), "unnamed");
        assert_eq!(sanitize_file_name("."), "unnamed");
    }

    #[test]
    fn flat_layout_joins_the_sanitized_name() {
        let item = RemoteItem::file("1", "notes/today.txt", 3);
        let path = FlatLayout
            .resolve(&item, std::slice::from_ref(&item), Path::new("/tmp/out"))
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/out/notes_today.txt"));
    }

    #[test]
    fn remote_item_defaults_missing_fields() {
        let item: RemoteItem = serde_json::from_str(r#"{"id":"7","name":"x"}"#).unwrap();
        assert_eq!(item.size, None);
        assert!(!item.is_folder);
        assert!(item.metadata.is_null());
    }
}
