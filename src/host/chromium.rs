//! Chromium host over CDP
//!
//! Launches a browser through ChromiumOxide, keeps a page handle per tab and
//! translates CDP target/page events into [`TabEvent`]s.

use super::{BrowserHost, ControlRef, TabEvent, TabId};
use crate::error::{BrowserError, Error, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventLoadEventFired, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateTargetParams, EventTargetCreated, EventTargetDestroyed, TargetId,
};
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Binding the activation hook calls when a page becomes visible
const ACTIVATION_BINDING: &str = "__snapwatchActivated";

/// Attribute used to pin a located control between CDP calls
const CONTROL_ATTRIBUTE: &str = "data-snapwatch-control";

const ACTIVATION_HOOK: &str = r#"
    (() => {
        if (window.__snapwatchHooked) return;
        window.__snapwatchHooked = true;
        document.addEventListener('visibilitychange', () => {
            if (document.visibilityState === 'visible'
                && typeof window.__snapwatchActivated === 'function') {
                window.__snapwatchActivated('visible');
            }
        });
    })()
"#;

/// Claims the current document's load for reporting, at most once per document
const ANNOUNCE_LOAD: &str = r#"
    (() => {
        if (location.protocol === 'about:'
            || document.readyState !== 'complete'
            || window.__snapwatchAnnounced) {
            return false;
        }
        window.__snapwatchAnnounced = true;
        return true;
    })()
"#;

const ANCHOR_SCRIPT: &str = r#"
    (() => {
        const urls = [];
        document.querySelectorAll('a[href]').forEach((el) => {
            try {
                urls.push(new URL(el.getAttribute('href'), document.baseURI).href);
            } catch (e) {}
        });
        return urls;
    })()
"#;

/// Configuration for browser launch
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run in headless mode (default: false, captures follow a user's browsing)
    pub headless: bool,
    /// Browser window width (default: 1920)
    pub width: u32,
    /// Browser window height (default: 1080)
    pub height: u32,
    /// Enable sandbox (default: true)
    pub sandbox: bool,
    /// Path to Chrome/Chromium executable (None = auto-detect)
    pub chrome_path: Option<String>,
    /// Capacity of the tab event channel (default: 256)
    pub event_buffer: usize,
    /// Additional Chrome arguments
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            width: 1920,
            height: 1080,
            sandbox: true,
            chrome_path: None,
            event_buffer: 256,
            extra_args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    /// Create a new config builder
    pub fn builder() -> BrowserConfigBuilder {
        BrowserConfigBuilder::default()
    }
}

/// Builder for BrowserConfig
#[derive(Default)]
pub struct BrowserConfigBuilder {
    config: BrowserConfig,
}

impl BrowserConfigBuilder {
    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    /// Set viewport dimensions
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    /// Enable/disable sandbox
    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.config.sandbox = sandbox;
        self
    }

    /// Set Chrome path
    pub fn chrome_path<S: Into<String>>(mut self, path: S) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    /// Set the event channel capacity
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.config.event_buffer = capacity.max(1);
        self
    }

    /// Add extra Chrome argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.config.extra_args.push(arg.into());
        self
    }

    /// Build the config
    pub fn build(self) -> BrowserConfig {
        self.config
    }
}

/// Tracked pages and the event stream they feed
struct TabRegistry {
    pages: RwLock<HashMap<TabId, Page>>,
    openers: RwLock<HashMap<TabId, TabId>>,
    /// Serializes attachment so a page is fully wired before anyone sees it tracked
    attaching: Mutex<()>,
    events: mpsc::Sender<TabEvent>,
}

/// CDP-backed [`BrowserHost`]
pub struct ChromiumHost {
    browser: Arc<Mutex<Browser>>,
    handler: JoinHandle<()>,
    watcher: JoinHandle<()>,
    tabs: Arc<TabRegistry>,
}

impl ChromiumHost {
    /// Launch a browser and start translating its events
    ///
    /// Returns the host together with the receiving end of its tab event stream.
    #[instrument(skip(config))]
    pub async fn launch(config: BrowserConfig) -> Result<(Self, mpsc::Receiver<TabEvent>)> {
        info!(
            "Launching browser with config: headless={}",
            config.headless
        );

        let mut builder = CdpBrowserConfig::builder();

        builder = builder.viewport(chromiumoxide::handler::viewport::Viewport {
            width: config.width,
            height: config.height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        });

        if !config.headless {
            builder = builder.with_head();
        }

        if !config.sandbox {
            builder = builder.arg("--no-sandbox");
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        for arg in &config.extra_args {
            builder = builder.arg(arg);
        }

        let cdp_config = builder
            .build()
            .map_err(|e| BrowserError::ConfigError(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    warn!("Browser handler event error");
                    break;
                }
            }
            debug!("Browser handler finished");
        });

        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let tabs = Arc::new(TabRegistry {
            pages: RwLock::new(HashMap::new()),
            openers: RwLock::new(HashMap::new()),
            attaching: Mutex::new(()),
            events: tx,
        });

        let created = browser.event_listener::<EventTargetCreated>().await?;
        let destroyed = browser.event_listener::<EventTargetDestroyed>().await?;
        let existing = browser.pages().await?;

        let browser = Arc::new(Mutex::new(browser));

        for page in existing {
            let tab = tab_id(page.target_id());
            tabs.attach(page, tab).await;
        }

        let watcher = tokio::spawn(watch_targets(browser.clone(), created, destroyed, tabs.clone()));

        info!("Browser launched successfully");

        Ok((
            Self {
                browser,
                handler: handler_task,
                watcher,
                tabs,
            },
            rx,
        ))
    }

    /// Open a tab in the foreground
    #[instrument(skip(self))]
    pub async fn open_tab(&self, url: &str) -> Result<TabId> {
        let params = CreateTargetParams::new("about:blank");
        self.open_and_navigate(params, url, None).await
    }

    /// Create a blank target, wire it up, then navigate it
    ///
    /// `new_page` resolves only after the initial document has loaded, so the
    /// real URL is loaded after the listeners exist.
    async fn open_and_navigate(
        &self,
        params: CreateTargetParams,
        url: &str,
        opener: Option<&TabId>,
    ) -> Result<TabId> {
        let page = self
            .browser
            .lock()
            .await
            .new_page(params)
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;

        let tab = tab_id(page.target_id());
        if let Some(opener) = opener {
            self.tabs
                .openers
                .write()
                .await
                .insert(tab.clone(), opener.clone());
        }
        self.tabs.attach(page.clone(), tab.clone()).await;

        page.execute(NavigateParams::new(url))
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;
        Ok(tab)
    }

    /// Close the browser
    #[instrument(skip(self))]
    pub async fn close(self) -> Result<()> {
        info!("Closing browser");

        self.watcher.abort();
        self.tabs.pages.write().await.clear();

        self.browser
            .lock()
            .await
            .close()
            .await
            .map_err(|e| Error::cdp(e.to_string()))?;

        let _ = tokio::time::timeout(Duration::from_secs(5), self.handler).await;

        info!("Browser closed");
        Ok(())
    }

    async fn page(&self, tab: &TabId) -> Result<Page> {
        self.tabs
            .pages
            .read()
            .await
            .get(tab)
            .cloned()
            .ok_or_else(|| Error::TabClosed(tab.clone()))
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, tab: &TabId, script: &str) -> Result<T> {
        self.page(tab)
            .await?
            .evaluate(script)
            .await
            .map_err(|e| Error::extraction(e.to_string()))?
            .into_value()
            .map_err(|e| Error::extraction(e.to_string()))
    }
}

fn tab_id(target: &TargetId) -> TabId {
    TabId::new(target.inner().clone())
}

fn control_selector(control: &ControlRef) -> String {
    format!("[{}=\"{}\"]", CONTROL_ATTRIBUTE, control.token)
}

impl TabRegistry {
    /// Track a page and forward its load and activation events
    ///
    /// A document that finished loading before the listeners existed is
    /// reported once, through the same in-page claim the load listener uses.
    async fn attach(&self, page: Page, tab: TabId) {
        let _attaching = self.attaching.lock().await;
        if self.pages.read().await.contains_key(&tab) {
            return;
        }

        if let Err(e) = install_activation_hook(&page).await {
            warn!(%tab, "Failed to install activation hook: {}", e);
        }

        match page.event_listener::<EventLoadEventFired>().await {
            Ok(mut loads) => {
                let page = page.clone();
                let tab = tab.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    while loads.next().await.is_some() {
                        if !announce_load(&page, &tab, &events).await {
                            break;
                        }
                    }
                });
            }
            Err(e) => warn!(%tab, "Failed to listen for loads: {}", e),
        }

        match page.event_listener::<EventBindingCalled>().await {
            Ok(mut bindings) => {
                let tab = tab.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    while let Some(call) = bindings.next().await {
                        if call.name != ACTIVATION_BINDING {
                            continue;
                        }
                        let event = TabEvent::Activated { tab: tab.clone() };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Err(e) => warn!(%tab, "Failed to listen for activations: {}", e),
        }

        self.pages.write().await.insert(tab.clone(), page.clone());

        // The load may have happened before the listener above existed.
        announce_load(&page, &tab, &self.events).await;
    }
}

/// Emit `NavigationCompleted` if this document's load has not been reported yet
///
/// Returns false once the event stream is closed.
async fn announce_load(page: &Page, tab: &TabId, events: &mpsc::Sender<TabEvent>) -> bool {
    let claimed = match page.evaluate(ANNOUNCE_LOAD).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        Err(e) => {
            debug!(%tab, "Load check failed: {}", e);
            false
        }
    };
    if !claimed {
        return true;
    }

    let url = page.url().await.ok().flatten().unwrap_or_default();
    debug!(%tab, %url, "Navigation completed");
    events
        .send(TabEvent::NavigationCompleted {
            tab: tab.clone(),
            url,
        })
        .await
        .is_ok()
}

async fn install_activation_hook(page: &Page) -> Result<()> {
    let binding = AddBindingParams::builder()
        .name(ACTIVATION_BINDING)
        .build()
        .map_err(|e| Error::cdp(format!("Failed to build binding params: {}", e)))?;
    page.execute(binding).await?;

    let script = AddScriptToEvaluateOnNewDocumentParams::builder()
        .source(ACTIVATION_HOOK)
        .build()
        .map_err(|e| Error::cdp(format!("Failed to build script params: {}", e)))?;
    page.execute(script).await?;

    // The script above only runs for future documents.
    page.evaluate(ACTIVATION_HOOK).await?;

    Ok(())
}

async fn watch_targets(
    browser: Arc<Mutex<Browser>>,
    mut created: chromiumoxide::listeners::EventStream<EventTargetCreated>,
    mut destroyed: chromiumoxide::listeners::EventStream<EventTargetDestroyed>,
    tabs: Arc<TabRegistry>,
) {
    loop {
        let event = tokio::select! {
            Some(ev) = created.next() => {
                let info = &ev.target_info;
                if info.r#type != "page" {
                    continue;
                }
                let tab = tab_id(&info.target_id);
                let opener = info.opener_id.as_ref().map(tab_id);
                if let Some(ref opener) = opener {
                    tabs.openers.write().await.insert(tab.clone(), opener.clone());
                }

                // The handler attaches asynchronously; give it a few chances.
                for _ in 0..10 {
                    let page = browser.lock().await.get_page(info.target_id.clone()).await;
                    if let Ok(page) = page {
                        tabs.attach(page, tab.clone()).await;
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }

                TabEvent::Created { tab, opener }
            }
            Some(ev) = destroyed.next() => {
                let tab = tab_id(&ev.target_id);
                if tabs.pages.write().await.remove(&tab).is_none() {
                    continue;
                }
                tabs.openers.write().await.remove(&tab);
                TabEvent::Removed { tab }
            }
            else => break,
        };

        if tabs.events.send(event).await.is_err() {
            break;
        }
    }
    debug!("Target watcher finished");
}

#[async_trait]
impl BrowserHost for ChromiumHost {
    async fn tab_url(&self, tab: &TabId) -> Result<String> {
        let page = self.page(tab).await?;
        Ok(page.url().await?.unwrap_or_default())
    }

    async fn tab_opener(&self, tab: &TabId) -> Result<Option<TabId>> {
        Ok(self.tabs.openers.read().await.get(tab).cloned())
    }

    async fn page_text(&self, tab: &TabId) -> Result<String> {
        self.eval(tab, "document.body ? document.body.innerText : ''")
            .await
    }

    #[instrument(skip(self))]
    async fn document_html(&self, tab: &TabId) -> Result<String> {
        let html: String = self
            .eval(tab, "document.documentElement.outerHTML")
            .await?;
        debug!("HTML captured: {} bytes", html.len());
        Ok(html)
    }

    async fn anchor_urls(&self, tab: &TabId) -> Result<Vec<String>> {
        self.eval(tab, ANCHOR_SCRIPT).await
    }

    async fn find_control(&self, tab: &TabId, matchers: &[String]) -> Result<Option<ControlRef>> {
        let token = uuid::Uuid::new_v4().to_string();
        let script = format!(
            r#"
                (() => {{
                    const matchers = {};
                    for (let i = 0; i < matchers.length; i++) {{
                        const el = document.querySelector(matchers[i]);
                        if (el) {{
                            el.setAttribute('{}', {});
                            return i;
                        }}
                    }}
                    return -1;
                }})()
            "#,
            serde_json::to_string(matchers)?,
            CONTROL_ATTRIBUTE,
            serde_json::to_string(&token)?,
        );

        let index: i64 = self.eval(tab, &script).await?;
        Ok(usize::try_from(index)
            .ok()
            .map(|matcher| ControlRef { matcher, token }))
    }

    async fn click_control(&self, tab: &TabId, control: &ControlRef) -> Result<()> {
        let script = format!(
            r#"
                (() => {{
                    const el = document.querySelector({});
                    if (!el) return false;
                    el.click();
                    return true;
                }})()
            "#,
            serde_json::to_string(&control_selector(control))?,
        );

        let clicked: bool = self.eval(tab, &script).await?;
        if clicked {
            Ok(())
        } else {
            Err(Error::extraction("control detached from the document"))
        }
    }

    async fn control_expanded(&self, tab: &TabId, control: &ControlRef) -> Result<bool> {
        let script = format!(
            r#"
                (() => {{
                    const el = document.querySelector({});
                    return !!el && el.getAttribute('aria-expanded') === 'true';
                }})()
            "#,
            serde_json::to_string(&control_selector(control))?,
        );
        self.eval(tab, &script).await
    }

    #[instrument(skip(self))]
    async fn open_background_tab(&self, url: &str, opener: &TabId) -> Result<TabId> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .background(true)
            .build()
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;

        self.open_and_navigate(params, url, Some(opener)).await
    }

    async fn activate_tab(&self, tab: &TabId) -> Result<()> {
        self.page(tab).await?.activate().await?;
        Ok(())
    }

    async fn close_tab(&self, tab: &TabId) -> Result<()> {
        let page = self
            .tabs
            .pages
            .write()
            .await
            .remove(tab)
            .ok_or_else(|| Error::TabClosed(tab.clone()))?;
        page.close().await?;
        Ok(())
    }
}
