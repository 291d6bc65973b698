//! Focus guard
//!
//! Tabs opened in the background can still end up in the foreground. The
//! guard remembers which tab the user was working in and switches back to it
//! shortly after any new tab appears.
//!
//! Tab focus is a single process-wide resource, so its state lives in one
//! [`TabFocusState`] shared by every clone of the guard. All mutation happens
//! under its mutex, and the `switching_back` flag is held by a
//! [`CorrectiveSwitch`] value that clears it on drop, whatever the outcome of
//! the switch.

use crate::host::{BrowserHost, TabId};
use crate::metrics::{global_metrics, Counter};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

/// Default debounce between a tab appearing and the corrective switch
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Which tab should hold focus, and whether a switch is in flight
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TabFocusState {
    /// Tab the user was last working in
    pub original: Option<TabId>,
    /// A corrective switch is running
    pub switching_back: bool,
}

/// Holds the `switching_back` flag for one corrective action
struct CorrectiveSwitch<'a> {
    state: &'a Mutex<TabFocusState>,
    target: TabId,
}

impl<'a> CorrectiveSwitch<'a> {
    fn begin(state: &'a Mutex<TabFocusState>) -> Option<Self> {
        let mut guard = state.lock();
        if guard.switching_back {
            return None;
        }
        let target = guard.original.clone()?;
        guard.switching_back = true;
        Some(Self { state, target })
    }
}

impl Drop for CorrectiveSwitch<'_> {
    fn drop(&mut self) {
        self.state.lock().switching_back = false;
    }
}

/// Restores focus to the user's tab after background opens
#[derive(Clone)]
pub struct FocusGuard {
    host: Arc<dyn BrowserHost>,
    state: Arc<Mutex<TabFocusState>>,
    debounce: Duration,
}

impl FocusGuard {
    /// Create a guard with empty state
    pub fn new(host: Arc<dyn BrowserHost>) -> Self {
        Self {
            host,
            state: Arc::new(Mutex::new(TabFocusState::default())),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Override the debounce
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Snapshot of the shared state
    pub fn state(&self) -> TabFocusState {
        self.state.lock().clone()
    }

    /// Handle a new tab
    ///
    /// Schedules a switch back to the original tab when one is known and no
    /// switch is already running. The returned handle resolves once the
    /// switch has settled.
    pub fn on_tab_created(&self, tab: &TabId) -> Option<JoinHandle<()>> {
        {
            let state = self.state.lock();
            if state.switching_back || state.original.is_none() {
                return None;
            }
        }

        debug!(%tab, "Tab created, scheduling focus restore");
        let guard = self.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(guard.debounce).await;
            guard.switch_back().await;
        }))
    }

    /// Handle a tab becoming active
    ///
    /// Records the activated tab's opener, or the tab itself, as the tab to
    /// return to. Ignored while a corrective switch is in flight.
    #[instrument(skip(self))]
    pub async fn on_tab_activated(&self, tab: &TabId) {
        if self.state.lock().switching_back {
            return;
        }

        let opener = match self.host.tab_opener(tab).await {
            Ok(opener) => opener,
            Err(e) => {
                error!("Error in tab activation handler: {}", e);
                return;
            }
        };

        let mut state = self.state.lock();
        if state.switching_back {
            return;
        }
        state.original = Some(opener.unwrap_or_else(|| tab.clone()));
        debug!(original = ?state.original, "Recorded original tab");
    }

    async fn switch_back(&self) {
        let Some(switch) = CorrectiveSwitch::begin(&self.state) else {
            return;
        };

        match self.host.activate_tab(&switch.target).await {
            Ok(()) => {
                debug!(tab = %switch.target, "Switched back to original tab");
                global_metrics().record(Counter::FocusCorrections);
            }
            Err(e) => error!(tab = %switch.target, "Error switching back to original tab: {}", e),
        }
    }
}
