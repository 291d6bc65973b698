//! Capture orchestrator
//!
//! The per-tab capture workflow:
//!
//! ```text
//! delay ──▶ verification gate ──▶ readiness probe ──▶ extract ──▶ persist ──▶ notify ──▶ close tab
//!                 │                  (optional)
//!                 ▼
//!          abort (no snapshot)
//! ```
//!
//! Probe failure only changes the final notification; the page is captured
//! regardless. Errors from the gate, extraction or persistence are logged,
//! reported to the user and returned to the caller.

use crate::classifier::{PageStateClassifier, PhraseClassifier};
use crate::config::Settings;
use crate::error::Result;
use crate::filename;
use crate::host::{BrowserHost, Notification, Notifier, SnapshotSink, TabEvent, TabId};
use crate::metrics::{global_metrics, Counter};
use crate::readiness::{ProbeOutcome, ProbeTimings, ReadinessProber};
use crate::verification::{GateOutcome, GateTimings, VerificationGate};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// One capture attempt for one tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Tab to capture
    pub tab: TabId,
    /// URL that triggered the capture
    pub url: String,
    /// Filename template
    pub filename_pattern: String,
    /// Folder the snapshot is written to
    pub save_folder: PathBuf,
    /// Run the readiness probe before extraction
    pub reference_expansion: bool,
    /// Wait before starting
    pub delay: Duration,
    /// Close the tab after saving
    pub close_tab: bool,
    /// Ceiling on the verification wait (zero = no ceiling)
    pub verification_timeout: Duration,
}

impl CaptureRequest {
    /// Build a request from the current settings
    pub fn from_settings(tab: TabId, url: impl Into<String>, settings: &Settings) -> Self {
        Self {
            tab,
            url: url.into(),
            filename_pattern: settings.filename_pattern.clone(),
            save_folder: PathBuf::from(&settings.save_folder),
            reference_expansion: !settings.disable_reference_expansion,
            delay: settings.delay(),
            close_tab: settings.close_tab_after_save,
            verification_timeout: settings.verification_timeout(),
        }
    }
}

/// What happened to the collapsible section before extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionStatus {
    /// Expanded and settled
    Expanded,
    /// The probe gave up
    NotExpanded,
    /// Expansion is turned off in the settings
    Disabled,
}

/// Why a capture stopped without a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Verification text came back after the gate cleared
    VerificationReturned,
    /// Verification never cleared
    VerificationStuck,
}

/// Terminal state of a capture workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Snapshot persisted
    Saved {
        /// Where the snapshot went
        path: PathBuf,
        /// Expansion status at extraction time
        expansion: ExpansionStatus,
    },
    /// Stopped at the verification gate
    Aborted(AbortReason),
    /// Another capture for the same tab was in progress
    AlreadyRunning,
}

/// Marks a tab as mid-capture for as long as it lives
struct InFlightGuard {
    tabs: Arc<Mutex<HashSet<TabId>>>,
    tab: TabId,
}

impl InFlightGuard {
    fn acquire(tabs: &Arc<Mutex<HashSet<TabId>>>, tab: &TabId) -> Option<Self> {
        if !tabs.lock().insert(tab.clone()) {
            return None;
        }
        Some(Self {
            tabs: tabs.clone(),
            tab: tab.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tabs.lock().remove(&self.tab);
    }
}

/// Runs capture workflows against a host
pub struct CaptureOrchestrator {
    host: Arc<dyn BrowserHost>,
    notifier: Arc<dyn Notifier>,
    sink: Arc<dyn SnapshotSink>,
    classifier: Arc<dyn PageStateClassifier>,
    events: broadcast::Sender<TabEvent>,
    probe_timings: ProbeTimings,
    quiescence: Duration,
    post_expansion_delay: Duration,
    in_flight: Arc<Mutex<HashSet<TabId>>>,
}

impl CaptureOrchestrator {
    /// Create an orchestrator with default classifier and timings
    ///
    /// `events` is the bus the verification gate subscribes to.
    pub fn new(
        host: Arc<dyn BrowserHost>,
        notifier: Arc<dyn Notifier>,
        sink: Arc<dyn SnapshotSink>,
        events: broadcast::Sender<TabEvent>,
    ) -> Self {
        Self {
            host,
            notifier,
            sink,
            classifier: Arc::new(PhraseClassifier::default()),
            events,
            probe_timings: ProbeTimings::default(),
            quiescence: GateTimings::default().quiescence,
            post_expansion_delay: Duration::from_secs(1),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Replace the page state classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn PageStateClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the readiness probe timings
    pub fn with_probe_timings(mut self, timings: ProbeTimings) -> Self {
        self.probe_timings = timings;
        self
    }

    /// Replace the verification quiescence period
    pub fn with_quiescence(mut self, quiescence: Duration) -> Self {
        self.quiescence = quiescence;
        self
    }

    /// Replace the pause between a confirmed expansion and extraction
    pub fn with_post_expansion_delay(mut self, delay: Duration) -> Self {
        self.post_expansion_delay = delay;
        self
    }

    /// The event bus verification gates subscribe to
    pub fn events(&self) -> &broadcast::Sender<TabEvent> {
        &self.events
    }

    /// Whether a capture is currently running for `tab`
    pub fn is_capturing(&self, tab: &TabId) -> bool {
        self.in_flight.lock().contains(tab)
    }

    /// Run the capture workflow for one request
    #[instrument(skip(self, request), fields(tab = %request.tab, url = %request.url))]
    pub async fn capture(&self, request: CaptureRequest) -> Result<CaptureOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &request.tab) else {
            debug!("Capture already running for this tab, skipping");
            global_metrics().record(Counter::CapturesSkipped);
            return Ok(CaptureOutcome::AlreadyRunning);
        };

        global_metrics().record(Counter::CapturesStarted);

        match self.run(&request).await {
            Ok(outcome) => {
                match &outcome {
                    CaptureOutcome::Saved { .. } => global_metrics().record(Counter::CapturesSaved),
                    CaptureOutcome::Aborted(reason) => {
                        info!(?reason, "Capture aborted at verification gate");
                        global_metrics().record(Counter::CapturesAborted);
                    }
                    CaptureOutcome::AlreadyRunning => {}
                }
                Ok(outcome)
            }
            Err(e) => {
                error!("Error saving HTML: {}", e);
                global_metrics().record(Counter::CapturesFailed);
                self.notifier
                    .notify(Notification::new(
                        "Error Saving HTML",
                        "An error occurred while saving the page. Please try again.",
                    ))
                    .await;
                Err(e)
            }
        }
    }

    async fn run(&self, request: &CaptureRequest) -> Result<CaptureOutcome> {
        let tab = &request.tab;

        if !request.delay.is_zero() {
            debug!("Waiting {:?} before capture", request.delay);
            tokio::time::sleep(request.delay).await;
        }

        let gate = VerificationGate::new(
            self.host.as_ref(),
            self.classifier.as_ref(),
            self.notifier.as_ref(),
            &self.events,
            GateTimings {
                quiescence: self.quiescence,
                ceiling: gate_ceiling(request.verification_timeout),
            },
        );
        match gate.wait(tab).await? {
            GateOutcome::Open => {}
            GateOutcome::Aborted => {
                return Ok(CaptureOutcome::Aborted(AbortReason::VerificationReturned))
            }
            GateOutcome::Stuck => return Ok(CaptureOutcome::Aborted(AbortReason::VerificationStuck)),
        }

        let expansion = if request.reference_expansion {
            let prober = ReadinessProber::new(
                self.host.as_ref(),
                self.classifier.as_ref(),
                self.notifier.as_ref(),
                self.probe_timings,
            );
            match prober.run(tab).await {
                ProbeOutcome::Ready => {
                    tokio::time::sleep(self.post_expansion_delay).await;
                    ExpansionStatus::Expanded
                }
                ProbeOutcome::Exhausted | ProbeOutcome::Abandoned => ExpansionStatus::NotExpanded,
            }
        } else {
            debug!("Reference expansion disabled");
            ExpansionStatus::Disabled
        };

        let html = self.host.document_html(tab).await?;

        let url = match self.host.tab_url(tab).await? {
            current if current.is_empty() => request.url.clone(),
            current => current,
        };
        let name = filename::synthesize(&url, &request.filename_pattern)?;
        let path = request.save_folder.join(name);

        self.sink.persist(&path, html.as_bytes()).await?;
        info!(path = %path.display(), bytes = html.len(), ?expansion, "Snapshot saved");

        self.notifier.notify(saved_notification(expansion)).await;

        if request.close_tab {
            if let Err(e) = self.host.close_tab(tab).await {
                warn!("Failed to close tab after save: {}", e);
            }
        }

        Ok(CaptureOutcome::Saved { path, expansion })
    }
}

/// Zero means wait for as long as the tab lives
fn gate_ceiling(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

/// Success notification for an expansion status
pub fn saved_notification(expansion: ExpansionStatus) -> Notification {
    let message = match expansion {
        ExpansionStatus::Disabled => "Page saved successfully.",
        ExpansionStatus::Expanded => "Page saved successfully with references expanded.",
        ExpansionStatus::NotExpanded => {
            "Page saved without references section. You may want to try again."
        }
    };
    Notification::new("HTML Saved", message)
}
