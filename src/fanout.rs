//! Link fan-out
//!
//! Scans a loaded page for links matching a pattern and opens each one in a
//! background tab, spaced out so the browser is not flooded.

use crate::error::Result;
use crate::host::{BrowserHost, Notification, Notifier, TabId};
use crate::metrics::{global_metrics, Counter};
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default spacing between background opens
pub const DEFAULT_OPEN_INTERVAL: Duration = Duration::from_secs(1);

/// Order-preserving set of URLs discovered in one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredLinkSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl DiscoveredLinkSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a URL; returns false if it was already present
    pub fn insert(&mut self, url: String) -> bool {
        if !self.seen.insert(url.clone()) {
            return false;
        }
        self.ordered.push(url);
        true
    }

    /// Number of distinct URLs
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether nothing was discovered
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// URLs in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }
}

/// Filter resolved URLs down to the ones to open
///
/// Keeps URLs matching `pattern`, drops any containing `denylist` (when
/// non-empty) and removes duplicates, keeping the first occurrence.
pub fn select_links<I>(urls: I, pattern: &Regex, denylist: &str) -> DiscoveredLinkSet
where
    I: IntoIterator<Item = String>,
{
    let mut links = DiscoveredLinkSet::new();
    for url in urls {
        if !pattern.is_match(&url) {
            continue;
        }
        if !denylist.is_empty() && url.contains(denylist) {
            continue;
        }
        links.insert(url);
    }
    links
}

/// Opens discovered links from a page in background tabs
pub struct LinkFanOut<'a> {
    host: &'a dyn BrowserHost,
    notifier: &'a dyn Notifier,
    interval: Duration,
}

impl<'a> LinkFanOut<'a> {
    /// Create a fan-out with the default open interval
    pub fn new(host: &'a dyn BrowserHost, notifier: &'a dyn Notifier) -> Self {
        Self {
            host,
            notifier,
            interval: DEFAULT_OPEN_INTERVAL,
        }
    }

    /// Override the spacing between opens
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Scan `tab` and open every selected link
    ///
    /// Returns the number of tabs opened. A link that fails to open is logged
    /// and skipped.
    #[instrument(skip(self, pattern), fields(pattern = %pattern))]
    pub async fn run(&self, tab: &TabId, pattern: &Regex, denylist: &str) -> Result<usize> {
        let anchors = self.host.anchor_urls(tab).await?;
        let total = anchors.len();
        let links = select_links(anchors, pattern, denylist);
        debug!(total, matched = links.len(), "Scanned anchors");

        if links.is_empty() {
            return Ok(0);
        }

        info!("Found {} matching links", links.len());
        self.notifier
            .notify(Notification::new(
                "Links Found",
                format!("{} links found", links.len()),
            ))
            .await;

        let mut opened = 0;
        for (i, url) in links.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.interval).await;
            }
            match self.host.open_background_tab(url, tab).await {
                Ok(new_tab) => {
                    debug!(%new_tab, url, "Opened link");
                    global_metrics().record(Counter::LinksOpened);
                    opened += 1;
                }
                Err(e) => warn!(url, "Failed to open link: {}", e),
            }
        }

        Ok(opened)
    }
}
