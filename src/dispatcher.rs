//! Event dispatch
//!
//! A single loop consumes the host's tab events and routes them:
//!
//! ```text
//! TabEvent ──▶ broadcast bus (verification gates)
//!    │
//!    ├─ NavigationCompleted ──▶ capture workflow   (downloadUrlPattern)
//!    │                     └──▶ link fan-out       (openUrlPattern)
//!    ├─ Created ─────────────▶ focus guard: schedule switch back
//!    └─ Activated ───────────▶ focus guard: record original tab
//! ```
//!
//! Workflows run as independent tasks; a failing workflow never stops the loop.

use crate::config::{CompiledSettings, Settings};
use crate::error::Result;
use crate::fanout::{LinkFanOut, DEFAULT_OPEN_INTERVAL};
use crate::focus::FocusGuard;
use crate::host::{BrowserHost, Notifier, TabEvent, TabId};
use crate::orchestrator::{CaptureOrchestrator, CaptureRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Routes tab events to the capture, fan-out and focus workflows
pub struct Dispatcher {
    host: Arc<dyn BrowserHost>,
    notifier: Arc<dyn Notifier>,
    orchestrator: Arc<CaptureOrchestrator>,
    focus: FocusGuard,
    settings: RwLock<CompiledSettings>,
    fan_out_interval: Duration,
}

impl Dispatcher {
    /// Create a dispatcher; fails if the settings' patterns do not compile
    pub fn new(
        host: Arc<dyn BrowserHost>,
        notifier: Arc<dyn Notifier>,
        orchestrator: CaptureOrchestrator,
        settings: &Settings,
    ) -> Result<Self> {
        Ok(Self {
            focus: FocusGuard::new(host.clone()),
            host,
            notifier,
            orchestrator: Arc::new(orchestrator),
            settings: RwLock::new(settings.compile()?),
            fan_out_interval: DEFAULT_OPEN_INTERVAL,
        })
    }

    /// Replace the focus guard
    pub fn with_focus_guard(mut self, focus: FocusGuard) -> Self {
        self.focus = focus;
        self
    }

    /// Override the spacing between fan-out opens
    pub fn with_fan_out_interval(mut self, interval: Duration) -> Self {
        self.fan_out_interval = interval;
        self
    }

    /// The focus guard
    pub fn focus(&self) -> &FocusGuard {
        &self.focus
    }

    /// The capture orchestrator
    pub fn orchestrator(&self) -> &Arc<CaptureOrchestrator> {
        &self.orchestrator
    }

    /// Swap in new settings; rejected if a pattern does not compile
    pub async fn update_settings(&self, settings: &Settings) -> Result<()> {
        let compiled = settings.compile()?;
        *self.settings.write().await = compiled;
        info!("Settings updated");
        Ok(())
    }

    /// Consume events until the host stream closes
    pub async fn run(&self, mut events: mpsc::Receiver<TabEvent>) {
        info!("Dispatcher started");
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("Event stream closed, dispatcher stopping");
    }

    /// Route one event, returning handles to any workflows it started
    #[instrument(skip(self))]
    pub async fn handle(&self, event: TabEvent) -> Vec<JoinHandle<()>> {
        // No gate is listening most of the time.
        let _ = self.orchestrator.events().send(event.clone());

        let mut spawned = Vec::new();
        match event {
            TabEvent::Created { tab, .. } => {
                spawned.extend(self.focus.on_tab_created(&tab));
            }
            TabEvent::Activated { tab } => {
                self.focus.on_tab_activated(&tab).await;
            }
            TabEvent::Removed { tab } => {
                debug!(%tab, "Tab removed");
            }
            TabEvent::NavigationCompleted { tab, url } => {
                let settings = self.settings.read().await.clone();
                if settings.should_capture(&url) {
                    spawned.push(self.spawn_capture(tab.clone(), &url, settings.settings()));
                }
                if let Some(pattern) = settings.fan_out_pattern(&url) {
                    spawned.push(self.spawn_fan_out(
                        tab,
                        pattern.clone(),
                        settings.settings().open_url_denylist.clone(),
                    ));
                }
            }
        }
        spawned
    }

    fn spawn_capture(&self, tab: TabId, url: &str, settings: &Settings) -> JoinHandle<()> {
        info!(%tab, url, "URL matches capture pattern");
        let request = CaptureRequest::from_settings(tab, url, settings);
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            match orchestrator.capture(request).await {
                Ok(outcome) => debug!(?outcome, "Capture finished"),
                Err(e) => warn!("Capture failed: {}", e),
            }
        })
    }

    fn spawn_fan_out(&self, tab: TabId, pattern: regex::Regex, denylist: String) -> JoinHandle<()> {
        info!(%tab, "URL matches open pattern");
        let host = self.host.clone();
        let notifier = self.notifier.clone();
        let interval = self.fan_out_interval;
        tokio::spawn(async move {
            let fan_out = LinkFanOut::new(host.as_ref(), notifier.as_ref()).with_interval(interval);
            match fan_out.run(&tab, &pattern, &denylist).await {
                Ok(opened) => debug!(opened, "Fan-out finished"),
                Err(e) => warn!("Fan-out failed: {}", e),
            }
        })
    }
}
