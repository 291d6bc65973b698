//! Verification gate
//!
//! Suspends a capture while the tab shows a human-verification interstitial.
//! The gate never interacts with the challenge; it only watches navigation
//! events on the tab and re-classifies the page after each one.

use crate::classifier::PageStateClassifier;
use crate::error::{Error, Result};
use crate::host::{BrowserHost, Notification, Notifier, TabEvent, TabId};
use crate::metrics::{global_metrics, Counter};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Timing for the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTimings {
    /// Settle time after the page first reads clear (default: 5s)
    pub quiescence: Duration,
    /// Give up waiting after this long (None = wait for as long as the tab lives)
    pub ceiling: Option<Duration>,
}

impl Default for GateTimings {
    fn default() -> Self {
        Self {
            quiescence: Duration::from_secs(5),
            ceiling: Some(Duration::from_secs(600)),
        }
    }
}

/// How the gate released the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// No interstitial, or it cleared and stayed clear
    Open,
    /// Cleared, then showed verification text again on the final re-check
    Aborted,
    /// Never cleared before the ceiling
    Stuck,
}

/// Human-verification gate for one capture attempt
pub struct VerificationGate<'a> {
    host: &'a dyn BrowserHost,
    classifier: &'a dyn PageStateClassifier,
    notifier: &'a dyn Notifier,
    events: &'a broadcast::Sender<TabEvent>,
    timings: GateTimings,
}

impl<'a> VerificationGate<'a> {
    /// Create a gate listening on `events`
    pub fn new(
        host: &'a dyn BrowserHost,
        classifier: &'a dyn PageStateClassifier,
        notifier: &'a dyn Notifier,
        events: &'a broadcast::Sender<TabEvent>,
        timings: GateTimings,
    ) -> Self {
        Self {
            host,
            classifier,
            notifier,
            events,
            timings,
        }
    }

    /// Whether the tab currently shows verification text
    pub async fn is_active(&self, tab: &TabId) -> Result<bool> {
        let text = self.host.page_text(tab).await?;
        Ok(self.classifier.is_verification(&text))
    }

    /// Block until the page is past any verification interstitial
    #[instrument(skip(self))]
    pub async fn wait(&self, tab: &TabId) -> Result<GateOutcome> {
        // Subscribe before the first check so no navigation slips between them.
        let mut rx = self.events.subscribe();

        if !self.is_active(tab).await? {
            return Ok(GateOutcome::Open);
        }

        info!("Verification page detected, waiting for it to clear");
        global_metrics().record(Counter::GateEngaged);
        self.notifier
            .notify(Notification::new(
                "Verification Required",
                "Complete the verification in the tab; the page will be saved once it clears.",
            ))
            .await;

        let started = Instant::now();
        let deadline = self.timings.ceiling.map(|c| started + c);

        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => return Ok(self.stuck(tab, started)),
                },
                None => rx.recv().await,
            };

            match next {
                Ok(TabEvent::NavigationCompleted { tab: ref t, .. }) if t == tab => {}
                Ok(TabEvent::Removed { tab: ref t }) if t == tab => {
                    return Err(Error::TabClosed(tab.clone()));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event bus lagged, re-checking page");
                }
                Err(RecvError::Closed) => return Ok(self.stuck(tab, started)),
            }

            match self.is_active(tab).await {
                Ok(true) => {
                    debug!("Still verifying");
                    continue;
                }
                Ok(false) => {}
                Err(e) if e.is_tab_closed() => return Err(e),
                Err(e) => {
                    debug!("Verification re-check failed: {}", e);
                    continue;
                }
            }

            info!(
                "Verification cleared, waiting {:?} before resuming",
                self.timings.quiescence
            );
            drop(rx);
            tokio::time::sleep(self.timings.quiescence).await;

            return if self.is_active(tab).await? {
                warn!("Verification page returned after clearing, aborting capture");
                Ok(GateOutcome::Aborted)
            } else {
                Ok(GateOutcome::Open)
            };
        }
    }

    fn stuck(&self, tab: &TabId, started: Instant) -> GateOutcome {
        let err = Error::VerificationStuck {
            tab: tab.clone(),
            waited_secs: started.elapsed().as_secs(),
        };
        warn!("{}", err);
        GateOutcome::Stuck
    }
}
