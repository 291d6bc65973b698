//! Host capabilities
//!
//! The capture workflows never talk to a browser directly. They consume the
//! traits in this module: tab lifecycle and in-page queries through
//! [`BrowserHost`], user-facing messages through [`Notifier`], and snapshot
//! storage through [`SnapshotSink`]. [`chromium::ChromiumHost`] drives a real
//! browser over CDP.

pub mod chromium;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, instrument};

pub use chromium::{BrowserConfig, ChromiumHost};

/// Opaque identifier of a browser tab
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    /// Wrap a raw identifier
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events reported by the host, in the order it observed them per tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    /// A tab finished loading a document
    NavigationCompleted {
        /// Tab that loaded
        tab: TabId,
        /// URL of the loaded document
        url: String,
    },
    /// A new tab was created
    Created {
        /// The new tab
        tab: TabId,
        /// Tab that opened it, if known
        opener: Option<TabId>,
    },
    /// A tab became the foreground tab
    Activated {
        /// The activated tab
        tab: TabId,
    },
    /// A tab went away
    Removed {
        /// The removed tab
        tab: TabId,
    },
}

impl TabEvent {
    /// Tab the event refers to
    pub fn tab(&self) -> &TabId {
        match self {
            TabEvent::NavigationCompleted { tab, .. }
            | TabEvent::Created { tab, .. }
            | TabEvent::Activated { tab }
            | TabEvent::Removed { tab } => tab,
        }
    }
}

/// Handle to an in-page control located by a structural matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRef {
    /// Index of the matcher that found the control
    pub matcher: usize,
    /// Host-specific token identifying the element across calls
    pub token: String,
}

/// Tab lifecycle control and in-page queries
#[async_trait]
pub trait BrowserHost: Send + Sync + 'static {
    /// Current URL of a tab
    async fn tab_url(&self, tab: &TabId) -> Result<String>;

    /// Tab that opened `tab`, if any
    async fn tab_opener(&self, tab: &TabId) -> Result<Option<TabId>>;

    /// Visible text of the page
    async fn page_text(&self, tab: &TabId) -> Result<String>;

    /// Full-document HTML snapshot
    async fn document_html(&self, tab: &TabId) -> Result<String>;

    /// Resolved `href` of every anchor in the page, in document order
    async fn anchor_urls(&self, tab: &TabId) -> Result<Vec<String>>;

    /// Try each matcher in order and return the first control found
    async fn find_control(&self, tab: &TabId, matchers: &[String]) -> Result<Option<ControlRef>>;

    /// Activate (click) a previously located control
    async fn click_control(&self, tab: &TabId, control: &ControlRef) -> Result<()>;

    /// Whether a previously located control reports itself expanded
    async fn control_expanded(&self, tab: &TabId, control: &ControlRef) -> Result<bool>;

    /// Open `url` in a new tab without giving it focus
    async fn open_background_tab(&self, url: &str, opener: &TabId) -> Result<TabId>;

    /// Bring a tab to the foreground
    async fn activate_tab(&self, tab: &TabId) -> Result<()>;

    /// Close a tab
    async fn close_tab(&self, tab: &TabId) -> Result<()>;
}

/// A user-visible notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
}

impl Notification {
    /// Build a notification
    pub fn new<T: Into<String>, M: Into<String>>(title: T, message: M) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Sink for user-visible notifications
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Show a notification
    async fn notify(&self, notification: Notification);
}

/// Notifier that reports through the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) {
        info!(title = %notification.title, "{}", notification.message);
    }
}

/// Persistence sink for captured snapshots
#[async_trait]
pub trait SnapshotSink: Send + Sync + 'static {
    /// Store `contents` at `path`
    async fn persist(&self, path: &Path, contents: &[u8]) -> Result<()>;
}

/// Writes snapshots to the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSink;

#[async_trait]
impl SnapshotSink for FileSink {
    #[instrument(skip(self, contents), fields(bytes = contents.len()))]
    async fn persist(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let wrap = |source| Error::Persistence {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(wrap)?;
        }
        tokio::fs::write(path, contents).await.map_err(wrap)?;

        debug!("Snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_event_tab() {
        let event = TabEvent::Created {
            tab: TabId::new("b"),
            opener: Some(TabId::new("a")),
        };
        assert_eq!(event.tab(), &TabId::new("b"));
    }

    #[test]
    fn test_tab_id_serializes_transparently() {
        let json = serde_json::to_string(&TabId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[tokio::test]
    async fn test_file_sink_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/page.html");

        FileSink.persist(&path, b"<html></html>").await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "<html></html>");
    }

    #[tokio::test]
    async fn test_file_sink_reports_persistence_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let err = FileSink
            .persist(&blocker.join("page.html"), b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
    }
}
