//! Readiness probe
//!
//! Reveals a collapsed content region (the references section) and confirms
//! the reveal took effect. The probe is an explicit state machine:
//!
//! ```text
//! Searching ──found──▶ Activated ──clicked──▶ ConfirmingExpansion ──expanded──▶ Ready
//!     ▲                                              │
//!     └────────── backoff (attempts left) ◀──────────┘──▶ Exhausted
//! ```
//!
//! Every wait is a timer suspension, so the total time is bounded by
//! `max_attempts × (backoff + max_checks × poll_interval)` plus the final settle.

use crate::classifier::PageStateClassifier;
use crate::host::{BrowserHost, ControlRef, Notification, Notifier, TabId};
use crate::metrics::{global_metrics, Counter};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Timing and bounds for the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimings {
    /// Attempts to locate and expand the control (default: 10)
    pub max_attempts: u32,
    /// Wait between attempts (default: 5s)
    pub backoff: Duration,
    /// Expansion checks per attempt (default: 10)
    pub max_checks: u32,
    /// Interval between expansion checks (default: 500ms)
    pub poll_interval: Duration,
    /// Wait after confirmed expansion for dependent content (default: 2s)
    pub settle: Duration,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_secs(5),
            max_checks: 10,
            poll_interval: Duration::from_millis(500),
            settle: Duration::from_secs(2),
        }
    }
}

impl ProbeTimings {
    /// Upper bound on the probe's wall time
    pub fn worst_case(&self) -> Duration {
        (self.backoff + self.poll_interval * self.max_checks) * self.max_attempts + self.settle
    }
}

/// Result of a probe run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The control expanded and content had time to settle
    Ready,
    /// Attempts ran out without a confirmed expansion
    Exhausted,
    /// The tab went away mid-probe
    Abandoned,
}

impl ProbeOutcome {
    /// Whether the page is ready for capture
    pub fn is_ready(self) -> bool {
        matches!(self, ProbeOutcome::Ready)
    }
}

/// Probe state, owned by a single run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStage {
    /// Looking for the control
    Searching {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Control located and about to be clicked
    Activated {
        /// 1-based attempt number
        attempt: u32,
        /// The located control
        control: ControlRef,
    },
    /// Polling the control's expanded signal
    ConfirmingExpansion {
        /// 1-based attempt number
        attempt: u32,
        /// The clicked control
        control: ControlRef,
        /// Checks performed so far in this attempt
        checks: u32,
    },
    /// Terminal: expanded
    Ready,
    /// Terminal: gave up
    Exhausted,
    /// Terminal: tab gone
    Abandoned,
}

/// Bounded-retry expansion of a page's collapsible section
pub struct ReadinessProber<'a> {
    host: &'a dyn BrowserHost,
    classifier: &'a dyn PageStateClassifier,
    notifier: &'a dyn Notifier,
    timings: ProbeTimings,
}

impl<'a> ReadinessProber<'a> {
    /// Create a prober
    pub fn new(
        host: &'a dyn BrowserHost,
        classifier: &'a dyn PageStateClassifier,
        notifier: &'a dyn Notifier,
        timings: ProbeTimings,
    ) -> Self {
        Self {
            host,
            classifier,
            notifier,
            timings,
        }
    }

    /// Run the probe to a terminal stage
    ///
    /// Never fails: host errors other than a vanished tab count as "not found
    /// yet" and consume the current attempt.
    #[instrument(skip(self), fields(max_attempts = self.timings.max_attempts))]
    pub async fn run(&self, tab: &TabId) -> ProbeOutcome {
        let mut stage = ProbeStage::Searching { attempt: 1 };

        let outcome = loop {
            stage = match stage {
                ProbeStage::Searching { attempt } => self.search(tab, attempt).await,
                ProbeStage::Activated { attempt, control } => {
                    self.activate(tab, attempt, control).await
                }
                ProbeStage::ConfirmingExpansion {
                    attempt,
                    control,
                    checks,
                } => self.confirm(tab, attempt, control, checks).await,
                ProbeStage::Ready => break ProbeOutcome::Ready,
                ProbeStage::Exhausted => break ProbeOutcome::Exhausted,
                ProbeStage::Abandoned => break ProbeOutcome::Abandoned,
            };
        };

        match outcome {
            ProbeOutcome::Ready => {
                info!("References expanded successfully");
                global_metrics().record(Counter::ProbeReady);
            }
            ProbeOutcome::Exhausted => {
                warn!("All attempts exhausted");
                global_metrics().record(Counter::ProbeExhausted);
                self.notifier
                    .notify(Notification::new(
                        "References Section Issue",
                        "Unable to open references section after multiple attempts. HTML saved without references.",
                    ))
                    .await;
            }
            ProbeOutcome::Abandoned => warn!("Tab closed during probe"),
        }
        outcome
    }

    async fn search(&self, tab: &TabId, attempt: u32) -> ProbeStage {
        let found = self
            .host
            .find_control(tab, self.classifier.control_matchers())
            .await;

        let control = match found {
            Ok(Some(control)) => control,
            Ok(None) => {
                debug!(attempt, "References control not found");
                return self.next_attempt(attempt).await;
            }
            Err(e) if e.is_tab_closed() => return ProbeStage::Abandoned,
            Err(e) => {
                debug!(attempt, "Control lookup failed: {}", e);
                return self.next_attempt(attempt).await;
            }
        };

        debug!(attempt, matcher = control.matcher, "References control found");

        // A control that already reports expanded must not be clicked again.
        match self.host.control_expanded(tab, &control).await {
            Ok(true) => {
                debug!("Control already expanded");
                self.settle().await
            }
            Err(e) if e.is_tab_closed() => ProbeStage::Abandoned,
            _ => ProbeStage::Activated { attempt, control },
        }
    }

    async fn activate(&self, tab: &TabId, attempt: u32, control: ControlRef) -> ProbeStage {
        debug!(attempt, "Clicking references control");
        match self.host.click_control(tab, &control).await {
            Ok(()) => ProbeStage::ConfirmingExpansion {
                attempt,
                control,
                checks: 0,
            },
            Err(e) if e.is_tab_closed() => ProbeStage::Abandoned,
            Err(e) => {
                debug!(attempt, "Click failed: {}", e);
                self.next_attempt(attempt).await
            }
        }
    }

    async fn confirm(
        &self,
        tab: &TabId,
        attempt: u32,
        control: ControlRef,
        checks: u32,
    ) -> ProbeStage {
        tokio::time::sleep(self.timings.poll_interval).await;
        let checks = checks + 1;
        debug!(
            "Checking expanded state (check {}/{} in attempt {}/{})",
            checks, self.timings.max_checks, attempt, self.timings.max_attempts
        );

        match self.host.control_expanded(tab, &control).await {
            Ok(true) => return self.settle().await,
            Err(e) if e.is_tab_closed() => return ProbeStage::Abandoned,
            Ok(false) => {}
            Err(e) => debug!("Expansion check failed: {}", e),
        }

        if checks >= self.timings.max_checks {
            debug!(attempt, "Max check attempts reached for this try");
            self.next_attempt(attempt).await
        } else {
            ProbeStage::ConfirmingExpansion {
                attempt,
                control,
                checks,
            }
        }
    }

    async fn next_attempt(&self, attempt: u32) -> ProbeStage {
        if attempt >= self.timings.max_attempts {
            return ProbeStage::Exhausted;
        }
        debug!(
            "Retrying in {:?} (attempt {}/{})",
            self.timings.backoff,
            attempt + 1,
            self.timings.max_attempts
        );
        tokio::time::sleep(self.timings.backoff).await;
        ProbeStage::Searching {
            attempt: attempt + 1,
        }
    }

    async fn settle(&self) -> ProbeStage {
        tokio::time::sleep(self.timings.settle).await;
        ProbeStage::Ready
    }
}
