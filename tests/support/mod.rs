//! In-memory host used by the workflow tests.
//!
//! Each test file pulls in only part of this module.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use snapwatch::error::{Error, Result};
use snapwatch::host::{BrowserHost, ControlRef, Notification, Notifier, SnapshotSink, TabId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Behaviour of the collapsible control on a fake page
#[derive(Debug, Clone, Default)]
pub struct FakeControl {
    /// Lookups that miss before the control shows up
    pub appears_after: u32,
    /// Current expanded state
    pub expanded: bool,
    /// Clicking flips the control to expanded
    pub expands_on_click: bool,
    /// Matchers still find the control once it is expanded
    pub matches_when_expanded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeTab {
    pub url: String,
    pub text: String,
    pub html: String,
    pub anchors: Vec<String>,
    pub opener: Option<TabId>,
    pub control: Option<FakeControl>,
}

#[derive(Debug, Default)]
struct HostState {
    tabs: HashMap<TabId, FakeTab>,
    active: Option<TabId>,
    find_calls: u32,
    clicks: u32,
    opened: Vec<(String, TabId, Instant)>,
    closed: Vec<TabId>,
    activations: Vec<TabId>,
    next_id: u32,
}

/// Scriptable [`BrowserHost`]
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    /// Background opens take focus, as some browsers do
    pub steal_focus_on_open: bool,
    /// Time `activate_tab` takes
    pub activate_delay: Duration,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_focus_stealing(mut self) -> Self {
        self.steal_focus_on_open = true;
        self
    }

    pub fn with_activate_delay(mut self, delay: Duration) -> Self {
        self.activate_delay = delay;
        self
    }

    pub fn add_tab(&self, id: &str, url: &str) -> TabId {
        let tab = TabId::new(id);
        self.state.lock().tabs.insert(
            tab.clone(),
            FakeTab {
                url: url.to_string(),
                html: format!("<html><body>{}</body></html>", url),
                ..Default::default()
            },
        );
        tab
    }

    pub fn update_tab(&self, tab: &TabId, f: impl FnOnce(&mut FakeTab)) {
        let mut state = self.state.lock();
        let entry = state.tabs.get_mut(tab).expect("unknown tab");
        f(entry);
    }

    pub fn set_text(&self, tab: &TabId, text: &str) {
        self.update_tab(tab, |t| t.text = text.to_string());
    }

    pub fn remove_tab(&self, tab: &TabId) {
        self.state.lock().tabs.remove(tab);
    }

    pub fn set_active(&self, tab: &TabId) {
        self.state.lock().active = Some(tab.clone());
    }

    pub fn active(&self) -> Option<TabId> {
        self.state.lock().active.clone()
    }

    pub fn find_calls(&self) -> u32 {
        self.state.lock().find_calls
    }

    pub fn clicks(&self) -> u32 {
        self.state.lock().clicks
    }

    pub fn opened(&self) -> Vec<(String, TabId, Instant)> {
        self.state.lock().opened.clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened().into_iter().map(|(url, _, _)| url).collect()
    }

    pub fn closed(&self) -> Vec<TabId> {
        self.state.lock().closed.clone()
    }

    pub fn activations(&self) -> Vec<TabId> {
        self.state.lock().activations.clone()
    }

    fn with_tab<T>(&self, tab: &TabId, f: impl FnOnce(&mut FakeTab) -> T) -> Result<T> {
        let mut state = self.state.lock();
        state
            .tabs
            .get_mut(tab)
            .map(f)
            .ok_or_else(|| Error::TabClosed(tab.clone()))
    }
}

#[async_trait]
impl BrowserHost for FakeHost {
    async fn tab_url(&self, tab: &TabId) -> Result<String> {
        self.with_tab(tab, |t| t.url.clone())
    }

    async fn tab_opener(&self, tab: &TabId) -> Result<Option<TabId>> {
        self.with_tab(tab, |t| t.opener.clone())
    }

    async fn page_text(&self, tab: &TabId) -> Result<String> {
        self.with_tab(tab, |t| t.text.clone())
    }

    async fn document_html(&self, tab: &TabId) -> Result<String> {
        self.with_tab(tab, |t| t.html.clone())
    }

    async fn anchor_urls(&self, tab: &TabId) -> Result<Vec<String>> {
        self.with_tab(tab, |t| t.anchors.clone())
    }

    async fn find_control(&self, tab: &TabId, matchers: &[String]) -> Result<Option<ControlRef>> {
        assert!(!matchers.is_empty());
        let mut state = self.state.lock();
        state.find_calls += 1;
        let calls = state.find_calls;
        let page = state
            .tabs
            .get_mut(tab)
            .ok_or_else(|| Error::TabClosed(tab.clone()))?;

        let visible = match &page.control {
            Some(c) => calls > c.appears_after && (!c.expanded || c.matches_when_expanded),
            None => false,
        };
        Ok(visible.then(|| ControlRef {
            matcher: 0,
            token: "control".to_string(),
        }))
    }

    async fn click_control(&self, tab: &TabId, _control: &ControlRef) -> Result<()> {
        let mut state = self.state.lock();
        state.clicks += 1;
        let page = state
            .tabs
            .get_mut(tab)
            .ok_or_else(|| Error::TabClosed(tab.clone()))?;
        if let Some(control) = page.control.as_mut() {
            if control.expands_on_click {
                control.expanded = true;
            }
        }
        Ok(())
    }

    async fn control_expanded(&self, tab: &TabId, _control: &ControlRef) -> Result<bool> {
        self.with_tab(tab, |t| t.control.as_ref().map(|c| c.expanded).unwrap_or(false))
    }

    async fn open_background_tab(&self, url: &str, opener: &TabId) -> Result<TabId> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let tab = TabId::new(format!("bg-{}", state.next_id));
        state.tabs.insert(
            tab.clone(),
            FakeTab {
                url: url.to_string(),
                opener: Some(opener.clone()),
                ..Default::default()
            },
        );
        state
            .opened
            .push((url.to_string(), tab.clone(), Instant::now()));
        if self.steal_focus_on_open {
            state.active = Some(tab.clone());
        }
        Ok(tab)
    }

    async fn activate_tab(&self, tab: &TabId) -> Result<()> {
        if !self.activate_delay.is_zero() {
            tokio::time::sleep(self.activate_delay).await;
        }
        let mut state = self.state.lock();
        if !state.tabs.contains_key(tab) {
            return Err(Error::TabClosed(tab.clone()));
        }
        state.active = Some(tab.clone());
        state.activations.push(tab.clone());
        Ok(())
    }

    async fn close_tab(&self, tab: &TabId) -> Result<()> {
        let mut state = self.state.lock();
        state
            .tabs
            .remove(tab)
            .ok_or_else(|| Error::TabClosed(tab.clone()))?;
        state.closed.push(tab.clone());
        Ok(())
    }
}

/// Notifier that keeps every notification
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.all().into_iter().map(|n| n.title).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.all().into_iter().map(|n| n.message).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}

/// Snapshot sink that keeps files in memory
#[derive(Default)]
pub struct MemorySink {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    pub fail: bool,
}

impl MemorySink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().keys().cloned().collect()
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotSink for MemorySink {
    async fn persist(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if self.fail {
            return Err(Error::Persistence {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.files
            .lock()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }
}

/// Everything a workflow test needs, wired together
pub struct Harness {
    pub host: Arc<FakeHost>,
    pub notifier: Arc<RecordingNotifier>,
    pub sink: Arc<MemorySink>,
    pub bus: tokio::sync::broadcast::Sender<snapwatch::host::TabEvent>,
}

impl Harness {
    pub fn new(host: FakeHost) -> Self {
        Self::with_sink(host, MemorySink::default())
    }

    pub fn with_sink(host: FakeHost, sink: MemorySink) -> Self {
        Self::build(host, sink, 64)
    }

    pub fn with_bus_capacity(host: FakeHost, capacity: usize) -> Self {
        Self::build(host, MemorySink::default(), capacity)
    }

    fn build(host: FakeHost, sink: MemorySink, capacity: usize) -> Self {
        let (bus, _) = tokio::sync::broadcast::channel(capacity);
        Self {
            host: Arc::new(host),
            notifier: Arc::new(RecordingNotifier::default()),
            sink: Arc::new(sink),
            bus,
        }
    }

    pub fn orchestrator(&self) -> snapwatch::CaptureOrchestrator {
        snapwatch::CaptureOrchestrator::new(
            self.host.clone(),
            self.notifier.clone(),
            self.sink.clone(),
            self.bus.clone(),
        )
    }
}
